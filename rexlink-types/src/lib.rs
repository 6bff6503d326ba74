//! Type definitions for rexlink

pub mod discovery;
pub mod display;
pub mod error;
pub mod features;
pub mod image;
pub mod io;
pub mod serial;
pub mod text;

pub use discovery::{DiscoveredDevice, DiscoveryInfo, MacAddress};
pub use display::{CursorMode, EntryMode, ShiftTarget};
pub use error::{Error, Result};
pub use features::{Features, FirmwareVersion};
pub use image::FingerprintImage;
pub use io::OutputKind;
pub use serial::{FlowControl, Parity, SerialConfig};
