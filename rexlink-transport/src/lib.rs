//! Transport layer for the REX protocol
//!
//! Provides TCP framing for device sessions and the UDP discovery socket.

pub mod tcp;
pub mod udp;
pub mod error;

pub use error::{Error, Result};
pub use tcp::{FrameReader, FrameWriter, TcpAcceptor};
pub use udp::{route_local_addr, DiscoverySocket};
