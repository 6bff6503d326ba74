//! High-level error types

use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] rexlink_core::Error),
    
    #[error("Transport error: {0}")]
    Transport(#[from] rexlink_transport::Error),
    
    #[error("Type error: {0}")]
    Types(#[from] rexlink_types::Error),
    
    #[error("Device has not completed negotiation")]
    NotNegotiated,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Serial port {0} already open")]
    SerialPortBusy(usize),

    #[error("Stream closed")]
    StreamClosed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    
    #[error("No route to device: {0}")]
    NoRoute(String),
}

impl Error {
    /// Check if the error means the session is gone
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::Core(rexlink_core::Error::Disconnected)
                | Self::Transport(rexlink_transport::Error::ConnectionClosed)
        )
    }

    /// Check if the session survives this error
    ///
    /// Resource-state errors are reported to the caller and leave the
    /// session untouched.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SerialPortBusy(_) | Self::StreamClosed | Self::Timeout(_) => true,
            Self::Core(e) => e.is_recoverable(),
            Self::Types(_) => true,
            _ => false,
        }
    }

    /// Normalize core disconnection into [`Error::Disconnected`]
    pub(crate) fn from_core(error: rexlink_core::Error) -> Self {
        match error {
            rexlink_core::Error::Disconnected => Self::Disconnected,
            other => Self::Core(other),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(error: Error) -> Self {
        use std::io::ErrorKind;

        let kind = match &error {
            Error::StreamClosed | Error::Disconnected => ErrorKind::NotConnected,
            Error::Timeout(_) => ErrorKind::TimedOut,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(Error::Disconnected.is_disconnected());
        assert!(Error::from_core(rexlink_core::Error::Disconnected).is_disconnected());
        assert!(matches!(
            Error::from_core(rexlink_core::Error::Disconnected),
            Error::Disconnected
        ));
        assert!(!Error::StreamClosed.is_disconnected());
    }

    #[test]
    fn test_resource_errors_are_recoverable() {
        assert!(Error::SerialPortBusy(0).is_recoverable());
        assert!(Error::StreamClosed.is_recoverable());
        assert!(!Error::Disconnected.is_recoverable());
    }

    #[test]
    fn test_io_error_kind() {
        let io: std::io::Error = Error::StreamClosed.into();
        assert_eq!(io.kind(), std::io::ErrorKind::NotConnected);

        let io: std::io::Error = Error::Disconnected.into();
        assert_eq!(io.kind(), std::io::ErrorKind::NotConnected);

        let io: std::io::Error = Error::NotNegotiated.into();
        assert_eq!(io.kind(), std::io::ErrorKind::Other);

        let io: std::io::Error = Error::Timeout(Duration::from_millis(5)).into();
        assert_eq!(io.kind(), std::io::ErrorKind::TimedOut);
    }
}
