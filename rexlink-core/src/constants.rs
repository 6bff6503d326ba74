//! Protocol constants

/// "REX0" read as a little-endian u32
pub const MAGIC: u32 = 0x3058_4552;

/// UDP port the device broadcasts discovery beacons to
pub const DISCOVERY_PORT: u16 = 2800;

/// UDP port the device listens on for connection requests
pub const CONNECTION_REQUEST_PORT: u16 = 1025;

/// Size of `magic | command | payload length`
pub const ENVELOPE_HEADER_SIZE: usize = 12;

/// Size of `total length | magic | command | payload length`
pub const FRAME_HEADER_SIZE: usize = 4 + ENVELOPE_HEADER_SIZE;

/// Upper bound accepted for a single TCP frame (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest UDP datagram we expect from a device
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Serial tunnel mode flags sent with `SerialSetMode`
pub mod serial_mode {
    /// Asynchronous delivery of received bytes
    pub const ASYNCHRONOUS: u32 = 1;

    /// Binary (not ASCII line) mode
    pub const BINARY: u32 = 1;

    /// Bytes per inbound packet
    pub const PACKET_SIZE: u32 = 1;
}

/// Display move codes (`DisplayMove` first field)
pub mod display_move {
    pub const CURSOR_LEFT: u32 = 0x10;
    pub const CURSOR_RIGHT: u32 = 0x14;
    pub const MESSAGE_LEFT: u32 = 0x18;
    pub const MESSAGE_RIGHT: u32 = 0x1c;
}

/// Bus width field of `DisplayInitialize`; ignored by the device
pub const DISPLAY_BUS_WIDTH: u32 = 8;
