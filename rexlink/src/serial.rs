//! Serial ports tunneled through the device
//!
//! Outbound bytes are sent immediately as `SerialWrite` frames. Inbound bytes
//! arrive on the session's receive loop and are queued until a reader drains
//! them. Reads block the calling thread; from async code run them on a
//! blocking task.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rexlink_core::{constants::serial_mode, Command};
use rexlink_types::SerialConfig;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::sink::{words, SinkRef};

type StreamSlot = Mutex<Option<SerialStream>>;

/// A serial port of the device
///
/// At most one stream is open per port at any time.
pub struct SerialPort {
    index: usize,
    sink: SinkRef,
    slot: Arc<StreamSlot>,
}

impl SerialPort {
    pub(crate) fn new(index: usize, sink: SinkRef) -> Self {
        Self {
            index,
            sink,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Check if a stream is currently open
    pub fn is_open(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Open the port
    ///
    /// Configures the tunnel for asynchronous binary delivery, then opens the
    /// UART with `config`.
    ///
    /// # Errors
    ///
    /// - [`Error::SerialPortBusy`] if a stream is already open
    /// - [`Error::Types`] if `config` is invalid
    /// - send errors; the port is left closed
    pub async fn open(&self, config: SerialConfig) -> Result<SerialStream> {
        config.validate()?;

        let stream = {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                return Err(Error::SerialPortBusy(self.index));
            }
            let stream = SerialStream::new(self.index, self.sink.clone(), Arc::downgrade(&self.slot));
            *slot = Some(stream.clone());
            stream
        };

        let index = self.index as u32;
        let mode = words(
            &[
                index,
                serial_mode::ASYNCHRONOUS,
                serial_mode::BINARY,
                serial_mode::PACKET_SIZE,
            ],
            &[],
        );
        let open = words(
            &[
                index,
                config.baud,
                config.parity as u32,
                u32::from(config.data_bits),
                u32::from(config.stop_bits),
                config.flow_control as u32,
            ],
            &[],
        );

        let sent = match self.sink.send(Command::SerialSetMode, mode).await {
            Ok(()) => self.sink.send(Command::SerialOpen, open).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(port = self.index, "Failed to open serial port: {}", e);
            stream.shared.shutdown();
            return Err(e);
        }

        debug!(port = self.index, %config, "Serial port opened");
        Ok(stream)
    }

    /// Queue bytes received from the device
    pub(crate) fn deliver(&self, data: &[u8]) {
        let stream = self.slot.lock().clone();
        match stream {
            Some(stream) => stream.shared.push(data),
            None => debug!(
                port = self.index,
                len = data.len(),
                "Dropping serial data for closed port"
            ),
        }
    }

    /// Close the open stream without telling the device
    pub(crate) fn close_local(&self) {
        let stream = self.slot.lock().take();
        if let Some(stream) = stream {
            stream.shared.mark_closed();
        }
    }
}

impl fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPort")
            .field("index", &self.index)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Byte stream over an open serial port
///
/// Cheap to clone; all clones share one receive queue.
#[derive(Clone)]
pub struct SerialStream {
    shared: Arc<StreamShared>,
}

struct StreamShared {
    index: usize,
    sink: SinkRef,
    port_slot: Weak<StreamSlot>,
    state: Mutex<StreamState>,
    ready: Condvar,
}

#[derive(Default)]
struct StreamState {
    queue: VecDeque<u8>,
    closed: bool,
}

impl SerialStream {
    fn new(index: usize, sink: SinkRef, port_slot: Weak<StreamSlot>) -> Self {
        Self {
            shared: Arc::new(StreamShared {
                index,
                sink,
                port_slot,
                state: Mutex::new(StreamState::default()),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn port_index(&self) -> usize {
        self.shared.index
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Bytes queued and not yet read
    pub fn available(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Send bytes to the port; nothing is buffered locally
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StreamClosed);
        }
        let payload = words(&[self.shared.index as u32], data);
        self.shared.sink.send(Command::SerialWrite, payload).await
    }

    /// Read queued bytes, blocking until at least one is available
    ///
    /// Returns up to `buf.len()` bytes.
    ///
    /// # Errors
    ///
    /// [`Error::StreamClosed`] if the stream is closed, including while
    /// waiting.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_until(buf, None)
    }

    /// Like [`read`](Self::read) but gives up after `timeout`
    pub fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.read_until(buf, Some((Instant::now() + timeout, timeout)))
    }

    fn read_until(&self, buf: &mut [u8], deadline: Option<(Instant, Duration)>) -> Result<usize> {
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(Error::StreamClosed);
            }
            if buf.is_empty() {
                return Ok(0);
            }
            if !state.queue.is_empty() {
                let n = buf.len().min(state.queue.len());
                for (slot, byte) in buf.iter_mut().zip(state.queue.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            match deadline {
                Some((at, timeout)) => {
                    if self.shared.ready.wait_until(&mut state, at).timed_out()
                        && state.queue.is_empty()
                        && !state.closed
                    {
                        return Err(Error::Timeout(timeout));
                    }
                }
                None => self.shared.ready.wait(&mut state),
            }
        }
    }

    /// Close the stream
    ///
    /// Idempotent. Tells the device to close the port if the session is
    /// still up, frees the port for reopening and wakes blocked readers.
    pub async fn close(&self) -> Result<()> {
        if !self.shared.mark_closed() {
            return Ok(());
        }

        let payload = words(&[self.shared.index as u32], &[]);
        if let Err(e) = self.shared.sink.send(Command::SerialClose, payload).await {
            debug!(port = self.shared.index, "Serial close not delivered: {}", e);
        }

        self.shared.release_port();
        debug!(port = self.shared.index, "Serial port closed");
        Ok(())
    }
}

impl StreamShared {
    fn push(&self, data: &[u8]) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.queue.extend(data);
        trace!(port = self.index, len = data.len(), queued = state.queue.len(), "Serial data queued");
        self.ready.notify_all();
    }

    /// Returns true only for the call that actually closed the stream
    fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.queue.clear();
        self.ready.notify_all();
        true
    }

    fn release_port(self: &Arc<Self>) {
        let Some(slot) = self.port_slot.upgrade() else {
            return;
        };
        let mut slot = slot.lock();
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(&current.shared, self))
        {
            *slot = None;
        }
    }

    fn shutdown(self: &Arc<Self>) {
        self.mark_closed();
        self.release_port();
    }
}

impl io::Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SerialStream::read(self, buf).map_err(io::Error::from)
    }
}

impl fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("SerialStream")
            .field("port", &self.shared.index)
            .field("queued", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}
