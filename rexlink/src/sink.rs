//! Outbound command path shared by peripherals

use std::sync::Weak;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use rexlink_core::Command;

use crate::error::{Error, Result};

/// Anything that can send a command to a device
///
/// Implemented by the device session; peripherals only ever talk to this
/// trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_command(&self, command: Command, payload: Bytes) -> Result<()>;
}

/// Non-owning handle to a [`CommandSink`]
///
/// Peripherals do not keep the session alive; once it is dropped every send
/// fails with [`Error::Disconnected`].
#[derive(Debug, Clone)]
pub(crate) struct SinkRef(Weak<dyn CommandSink>);

impl SinkRef {
    pub(crate) fn new(sink: Weak<dyn CommandSink>) -> Self {
        Self(sink)
    }

    #[cfg(test)]
    pub(crate) fn from_arc(sink: &std::sync::Arc<dyn CommandSink>) -> Self {
        Self(std::sync::Arc::downgrade(sink))
    }

    pub(crate) async fn send(&self, command: Command, payload: impl Into<Bytes>) -> Result<()> {
        let sink = self.0.upgrade().ok_or(Error::Disconnected)?;
        sink.send_command(command, payload.into()).await
    }
}

/// Payload of consecutive little-endian words, optionally followed by raw bytes
pub(crate) fn words(values: &[u32], tail: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(values.len() * 4 + tail.len());
    for value in values {
        buf.put_u32_le(*value);
    }
    buf.put_slice(tail);
    buf.freeze()
}
