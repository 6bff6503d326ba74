//! Error types for rexlink-core



/// Result type alias for rexlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame is too short to be valid
    #[error("Frame too short: expected at least {expected} bytes, got {actual} bytes")]
    FrameTooShort {
        expected: usize,
        actual: usize,
    },

    /// Magic prefix is not "REX0"
    #[error("Invalid message header: expected REX0 (0x{expected:08X}), got 0x{actual:08X}")]
    BadMagic {
        expected: u32,
        actual: u32,
    },

    /// Declared length disagrees with the bytes actually present
    #[error("Invalid message size: declared {declared} bytes, found {actual} bytes")]
    LengthMismatch {
        declared: usize,
        actual: usize,
    },

    /// Frame exceeds the configured maximum
    #[error("Frame too large: {size} bytes (max: {max} bytes)")]
    FrameTooLarge {
        size: usize,
        max: usize,
    },

    /// Unknown command code
    #[error("Unknown command code: 0x{0:02X}")]
    UnknownCommand(u32),

    /// An awaiter for this response is already armed
    #[error("A response for {command} is already pending")]
    ResponsePending {
        command: crate::command::Command,
    },

    /// The dispatch table was closed (session disconnected)
    #[error("Session disconnected")]
    Disconnected,

    /// Invalid session state
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),

    /// Device sent a message that violates the protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if the error is fatal to the connection it occurred on
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::BadMagic { .. }
                | Self::LengthMismatch { .. }
                | Self::FrameTooLarge { .. }
        )
    }

    /// Check if error is recoverable (retry might succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ResponsePending { .. })
    }

    /// Check if error requires reconnection
    pub fn requires_reconnect(&self) -> bool {
        self.is_framing()
            || matches!(
                self,
                Self::Disconnected
                    | Self::InvalidSessionState(_)
                    | Self::Protocol(_)
                    | Self::Io(_)
            )
    }
}
