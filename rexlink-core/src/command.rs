//! REX protocol command identifiers

use std::fmt;

use crate::error::{Error, Result};

/// Protocol command codes
///
/// The vocabulary is closed: every identifier the device or the client may
/// send is listed here. Frames carrying any other identifier still decode
/// (the envelope keeps the raw `u32`) but nothing will handle them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    // Control
    Discovery = 0x01,
    ConnectionRequest = 0x02,
    FeaturesRequest = 0x0a,
    FeaturesResponse = 0x0b,
    Reset = 0x0c,
    IdRequest = 0x0d,
    IdResponse = 0x0e,

    // Peripheral output
    DigitalOutput = 0x12,
    DisplayInitialize = 0x1e,
    DisplayClear = 0x1f,
    DisplaySetEntryMode = 0x21,
    DisplaySetCursor = 0x23,
    DisplayMove = 0x24,
    DisplayWrite = 0x28,

    // Serial tunnel
    SerialOpen = 0x32,
    SerialSetMode = 0x33,
    SerialRead = 0x34,
    SerialWrite = 0x35,
    SerialClose = 0x36,

    // Events (device to client)
    InputChanged = 0x3c,
    ImageAcquired = 0x46,
    KeyTyped = 0x50,
}

impl Command {
    /// All known commands
    pub const ALL: [Command; 22] = [
        Self::Discovery,
        Self::ConnectionRequest,
        Self::FeaturesRequest,
        Self::FeaturesResponse,
        Self::Reset,
        Self::IdRequest,
        Self::IdResponse,
        Self::DigitalOutput,
        Self::DisplayInitialize,
        Self::DisplayClear,
        Self::DisplaySetEntryMode,
        Self::DisplaySetCursor,
        Self::DisplayMove,
        Self::DisplayWrite,
        Self::SerialOpen,
        Self::SerialSetMode,
        Self::SerialRead,
        Self::SerialWrite,
        Self::SerialClose,
        Self::InputChanged,
        Self::ImageAcquired,
        Self::KeyTyped,
    ];

    /// Check if this command is an unsolicited event raised by the device
    pub fn is_event(self) -> bool {
        matches!(
            self,
            Self::InputChanged | Self::ImageAcquired | Self::KeyTyped
        )
    }

    /// Check if this command belongs to the serial tunnel
    pub fn is_serial(self) -> bool {
        matches!(
            self,
            Self::SerialOpen
                | Self::SerialSetMode
                | Self::SerialRead
                | Self::SerialWrite
                | Self::SerialClose
        )
    }

    /// Check if this command travels over UDP rather than the TCP session
    pub fn is_datagram(self) -> bool {
        matches!(self, Self::Discovery | Self::ConnectionRequest)
    }

    /// Get command name
    pub fn name(self) -> &'static str {
        match self {
            Self::Discovery => "DISCOVERY",
            Self::ConnectionRequest => "CONNECTION_REQUEST",
            Self::FeaturesRequest => "FEATURES_REQUEST",
            Self::FeaturesResponse => "FEATURES_RESPONSE",
            Self::Reset => "RESET",
            Self::IdRequest => "ID_REQUEST",
            Self::IdResponse => "ID_RESPONSE",
            Self::DigitalOutput => "IO",
            Self::DisplayInitialize => "DISPLAY_INITIALIZE",
            Self::DisplayClear => "DISPLAY_CLEAR",
            Self::DisplaySetEntryMode => "DISPLAY_SET_ENTRY_MODE",
            Self::DisplaySetCursor => "DISPLAY_SET_CURSOR",
            Self::DisplayMove => "DISPLAY_MOVE",
            Self::DisplayWrite => "DISPLAY_WRITE",
            Self::SerialOpen => "RS232_OPEN",
            Self::SerialSetMode => "RS232_SET_MODE",
            Self::SerialRead => "RS232_READ",
            Self::SerialWrite => "RS232_WRITE",
            Self::SerialClose => "RS232_CLOSE",
            Self::InputChanged => "INPUT_CHANGED",
            Self::ImageAcquired => "IMAGE_ACQUIRED",
            Self::KeyTyped => "KEY_TYPED",
        }
    }
}

impl From<Command> for u32 {
    fn from(cmd: Command) -> u32 {
        cmd as u32
    }
}

impl TryFrom<u32> for Command {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|cmd| u32::from(*cmd) == value)
            .ok_or(Error::UnknownCommand(value))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u32)
    }
}

/// Render a raw command identifier, using its name when known
pub fn describe(raw: u32) -> String {
    match Command::try_from(raw) {
        Ok(cmd) => cmd.to_string(),
        Err(_) => format!("UNKNOWN(0x{:02X})", raw),
    }
}
