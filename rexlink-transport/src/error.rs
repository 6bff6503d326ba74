//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Connection closed by remote")]
    ConnectionClosed,
    
    #[error("Framing error: {0}")]
    Frame(#[from] rexlink_core::Error),
    
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl Error {
    /// Check if the error only concerns the offending message
    ///
    /// For datagrams a bad envelope is dropped and the socket stays usable.
    pub fn is_framing(&self) -> bool {
        matches!(self, Self::Frame(e) if e.is_framing())
    }
}
