//! # rexlink-core
//!
//! Core protocol implementation for REX access-control terminals.
//!
//! This crate provides the low-level protocol primitives:
//! - Envelope structure and encoding/decoding (UDP and TCP framing)
//! - Command definitions
//! - Command dispatch and request/response correlation
//! - Session state tracking
//! - Protocol constants

pub mod codec;
pub mod command;
pub mod constants;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod session;

pub use codec::Envelope;
pub use command::Command;
pub use correlator::ResponseFuture;
pub use dispatch::{DispatchTable, ListenerId};
pub use error::{Error, Result};
pub use session::{Session, SessionState};

/// Protocol version information ("REX0")
pub const PROTOCOL_VERSION: &str = "REX0";
