//! # rexlink
//!
//! Client for REX embedded access-control terminals.
//!
//! ## Features
//!
//! - Discovery of devices announcing themselves over UDP
//! - Connection requests and TCP sessions dialed back by the device
//! - Digital inputs and outputs, character display and tunneled serial ports
//! - Keypad and fingerprint image events
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use rexlink::{Client, ClientConfig, ClientEvent};
//!
//! #[tokio::main]
//! async fn main() -> rexlink::Result<()> {
//!     let client = Client::bind(ClientConfig::default()).await?;
//!     let mut events = client.subscribe();
//!
//!     client.request_connection(Ipv4Addr::new(192, 168, 1, 56)).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ClientEvent::Connected(device) = event {
//!             if let Some(display) = device.display() {
//!                 display.clear().await?;
//!                 display.write("Hello").await?;
//!             }
//!             if let Some(relay) = device.relays().first() {
//!                 relay.hold(1000).await?;
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod device;
pub mod display;
pub mod error;
pub mod io;
pub mod serial;
pub mod sink;

// Re-exports
pub use client::{Client, ClientEvent};
pub use config::{ClientConfig, DeviceConfig};
pub use device::{Device, DeviceEvent, Peripherals};
pub use display::Display;
pub use error::{Error, Result};
pub use io::{DigitalInput, DigitalOutput};
pub use serial::{SerialPort, SerialStream};
pub use sink::CommandSink;

// Re-export types
pub use rexlink_core::{Command, Envelope, SessionState};
pub use rexlink_types::{
    CursorMode, DiscoveredDevice, DiscoveryInfo, EntryMode, Features, FingerprintImage,
    FirmwareVersion, FlowControl, MacAddress, OutputKind, Parity, SerialConfig, ShiftTarget,
};
