//! Device session
//!
//! One [`Device`] per TCP connection. [`Device::start`] spawns the receive
//! loop, identifies the device and negotiates its features; from then on
//! peripherals are available and device events are broadcast to
//! subscribers.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use rexlink_core::{command, Command, DispatchTable, Envelope, Session, SessionState};
use rexlink_transport::{FrameReader, FrameWriter};
use rexlink_types::{text, Features, FingerprintImage, OutputKind};

use crate::config::DeviceConfig;
use crate::display::Display;
use crate::error::{Error, Result};
use crate::io::{DigitalInput, DigitalOutput};
use crate::serial::SerialPort;
use crate::sink::{CommandSink, SinkRef};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on the graceful writer shutdown in [`Device::close`]
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Something that happened on a device session
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Negotiation finished; peripherals are available
    Connected,

    /// The session ended (sent once)
    Disconnected,

    /// A digital input reported a value
    InputChanged { index: usize, value: bool },

    /// A key was pressed on the keypad
    KeyTyped(char),

    /// A fingerprint scanner captured an image
    ImageAcquired(FingerprintImage),
}

/// Peripherals sized from the features response
pub struct Peripherals {
    inputs: Vec<DigitalInput>,
    relays: Vec<DigitalOutput>,
    leds: Vec<DigitalOutput>,
    serial_ports: Vec<SerialPort>,
    buzzer: Option<DigitalOutput>,
    display: Option<Display>,
}

impl Peripherals {
    fn new(features: &Features, sink: SinkRef) -> Self {
        let outputs = |kind: OutputKind, count: usize| -> Vec<DigitalOutput> {
            (0..count)
                .map(|index| DigitalOutput::new(kind, index, sink.clone()))
                .collect()
        };

        Self {
            inputs: (0..features.digital_inputs).map(DigitalInput::new).collect(),
            relays: outputs(OutputKind::Relay, features.relays),
            leds: outputs(OutputKind::Led, features.leds),
            serial_ports: (0..features.serial_ports)
                .map(|index| SerialPort::new(index, sink.clone()))
                .collect(),
            buzzer: features
                .has_buzzer
                .then(|| DigitalOutput::new(OutputKind::Buzzer, 0, sink.clone())),
            display: features.has_display.then(|| Display::new(sink.clone())),
        }
    }

    pub fn inputs(&self) -> &[DigitalInput] {
        &self.inputs
    }

    pub fn relays(&self) -> &[DigitalOutput] {
        &self.relays
    }

    pub fn leds(&self) -> &[DigitalOutput] {
        &self.leds
    }

    pub fn serial_ports(&self) -> &[SerialPort] {
        &self.serial_ports
    }

    pub fn buzzer(&self) -> Option<&DigitalOutput> {
        self.buzzer.as_ref()
    }

    pub fn display(&self) -> Option<&Display> {
        self.display.as_ref()
    }

    fn input_changed(&self, payload: &Bytes) -> rexlink_core::Result<(usize, bool)> {
        let index = word(payload, 0, "input changed")? as usize;
        let value = word(payload, 4, "input changed")? != 0;

        let input = self.inputs.get(index).ok_or_else(|| {
            rexlink_core::Error::Protocol(format!(
                "input index {} out of range ({} inputs)",
                index,
                self.inputs.len()
            ))
        })?;
        input.update(value);

        Ok((index, value))
    }

    fn serial_data(&self, payload: &Bytes) -> rexlink_core::Result<()> {
        let index = word(payload, 0, "serial data")? as usize;
        let port = self.serial_ports.get(index).ok_or_else(|| {
            rexlink_core::Error::Protocol(format!(
                "serial port index {} out of range ({} ports)",
                index,
                self.serial_ports.len()
            ))
        })?;
        port.deliver(&payload[4..]);
        Ok(())
    }

    fn close_serial_ports(&self) {
        for port in &self.serial_ports {
            port.close_local();
        }
    }
}

impl fmt::Debug for Peripherals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peripherals")
            .field("inputs", &self.inputs.len())
            .field("relays", &self.relays.len())
            .field("leds", &self.leds.len())
            .field("serial_ports", &self.serial_ports.len())
            .field("buzzer", &self.buzzer.is_some())
            .field("display", &self.display.is_some())
            .finish()
    }
}

/// Little-endian word at `offset`, or a protocol error naming the event
fn word(payload: &[u8], offset: usize, what: &str) -> rexlink_core::Result<u32> {
    payload
        .get(offset..offset + 4)
        .map(LittleEndian::read_u32)
        .ok_or_else(|| {
            rexlink_core::Error::Protocol(format!(
                "truncated {} payload ({} bytes)",
                what,
                payload.len()
            ))
        })
}

fn key_char(code: u32) -> char {
    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// A session with one connected device
///
/// Cheap to clone; all clones refer to the same session.
///
/// # Examples
///
/// ```no_run
/// use rexlink::{Device, DeviceEvent};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let listener = TcpListener::bind("0.0.0.0:5000").await?;
///     let (stream, _) = listener.accept().await?;
///
///     let device = Device::from_tcp(stream, Default::default())?;
///     let mut events = device.subscribe();
///     device.start().await?;
///     if let Some(features) = device.features() {
///         println!("{} {}", device.identity().unwrap_or("?"), features);
///     }
///
///     while let Ok(event) = events.recv().await {
///         if let DeviceEvent::KeyTyped(key) = event {
///             println!("key {}", key);
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    peer: Option<SocketAddr>,
    config: DeviceConfig,
    session: Session,
    table: DispatchTable,
    writer: tokio::sync::Mutex<FrameWriter<BoxedWriter>>,
    reader: Mutex<Option<FrameReader<BoxedReader>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Notify,
    closed: watch::Sender<bool>,
    events: broadcast::Sender<DeviceEvent>,
    identity: OnceLock<String>,
    features: OnceLock<Features>,
    peripherals: OnceLock<Arc<Peripherals>>,
}

impl Device {
    /// Wrap a connected byte stream with default settings
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_config(stream, DeviceConfig::default())
    }

    /// Wrap a connected byte stream
    pub fn with_config<S>(stream: S, config: DeviceConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::build(Box::new(reader), Box::new(writer), None, config)
    }

    /// Wrap an accepted TCP connection
    pub fn from_tcp(stream: TcpStream, config: DeviceConfig) -> Result<Self> {
        let peer = stream.peer_addr().map_err(rexlink_transport::Error::from)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::build(Box::new(reader), Box::new(writer), Some(peer), config))
    }

    fn build(
        reader: BoxedReader,
        writer: BoxedWriter,
        peer: Option<SocketAddr>,
        config: DeviceConfig,
    ) -> Self {
        let label = peer.map_or_else(|| "device".to_string(), |peer| peer.to_string());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (closed, _) = watch::channel(false);

        Self {
            inner: Arc::new(DeviceInner {
                peer,
                config,
                session: Session::new(),
                table: DispatchTable::new(label),
                writer: tokio::sync::Mutex::new(FrameWriter::new(writer)),
                reader: Mutex::new(Some(FrameReader::new(reader))),
                receive_task: Mutex::new(None),
                shutdown: Notify::new(),
                closed,
                events,
                identity: OnceLock::new(),
                features: OnceLock::new(),
                peripherals: OnceLock::new(),
            }),
        }
    }

    /// Start the session
    ///
    /// Spawns the receive loop, then identifies the device and negotiates its
    /// features. On success the session is `Connected` and
    /// [`DeviceEvent::Connected`] has been broadcast.
    ///
    /// # Errors
    ///
    /// Any failure closes the session before it is returned.
    pub async fn start(&self) -> Result<()> {
        let reader = self.inner.reader.lock().take().ok_or_else(|| {
            Error::Core(rexlink_core::Error::InvalidSessionState(
                "session already started".into(),
            ))
        })?;

        match self.negotiate(reader).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(peer = ?self.inner.peer, "Negotiation failed: {}", e);
                self.close().await;
                Err(e)
            }
        }
    }

    async fn negotiate(&self, reader: FrameReader<BoxedReader>) -> Result<()> {
        let inner = &self.inner;

        inner.session.advance(SessionState::Identifying)?;
        let task = tokio::spawn(receive_loop(Arc::clone(inner), reader));
        *inner.receive_task.lock() = Some(task);

        let raw = self
            .request(Command::IdRequest, Command::IdResponse, Bytes::new())
            .await?;
        let identity = text::decode(&raw);
        debug!(peer = ?inner.peer, %identity, "Device identified");
        let _ = inner.identity.set(identity);

        inner.session.advance(SessionState::NegotiatingFeatures)?;
        let raw = self
            .request(Command::FeaturesRequest, Command::FeaturesResponse, Bytes::new())
            .await?;
        let features = Features::parse(&raw)?;
        debug!(peer = ?inner.peer, %features, "Features negotiated");

        let weak: Weak<DeviceInner> = Arc::downgrade(inner);
        let sink: Weak<dyn CommandSink> = weak;
        let peripherals = Arc::new(Peripherals::new(&features, SinkRef::new(sink)));
        self.install_listeners(&peripherals);
        let _ = inner.features.set(features);
        let _ = inner.peripherals.set(peripherals);

        inner.session.advance(SessionState::Connected)?;
        info!(
            peer = ?inner.peer,
            identity = self.identity().unwrap_or_default(),
            "Device connected"
        );
        let _ = inner.events.send(DeviceEvent::Connected);

        Ok(())
    }

    fn install_listeners(&self, peripherals: &Arc<Peripherals>) {
        let table = &self.inner.table;

        let (ports, events) = (Arc::clone(peripherals), self.inner.events.clone());
        table.register(Command::InputChanged, move |payload| {
            let (index, value) = ports.input_changed(payload)?;
            let _ = events.send(DeviceEvent::InputChanged { index, value });
            Ok(())
        });

        let events = self.inner.events.clone();
        table.register(Command::KeyTyped, move |payload| {
            let key = key_char(word(payload, 0, "key typed")?);
            trace!(?key, "Key typed");
            let _ = events.send(DeviceEvent::KeyTyped(key));
            Ok(())
        });

        let events = self.inner.events.clone();
        table.register(Command::ImageAcquired, move |payload| {
            let image = FingerprintImage::parse(payload.clone())
                .map_err(|e| rexlink_core::Error::Protocol(e.to_string()))?;
            debug!(scanner = %image.scanner, width = image.width, height = image.height, "Image acquired");
            let _ = events.send(DeviceEvent::ImageAcquired(image));
            Ok(())
        });

        for inbound in [Command::SerialRead, Command::SerialWrite] {
            let ports = Arc::clone(peripherals);
            table.register(inbound, move |payload| ports.serial_data(payload));
        }
    }

    /// Send `request` and wait for the first `response` that follows
    ///
    /// The awaiter is armed before the request is written, so a fast reply
    /// cannot be missed. Uses the session's configured timeout, if any.
    ///
    /// # Errors
    ///
    /// - [`Error::Core`] with `ResponsePending` if another caller is already
    ///   waiting for `response`
    /// - [`Error::Disconnected`] if the session ends first
    /// - [`Error::Timeout`] if the configured timeout elapses
    pub async fn request(
        &self,
        request: Command,
        response: Command,
        payload: impl Into<Bytes>,
    ) -> Result<Bytes> {
        self.request_with(request, response, payload.into(), self.inner.config.request_timeout)
            .await
    }

    /// Like [`request`](Self::request) with an explicit timeout
    pub async fn request_timeout(
        &self,
        request: Command,
        response: Command,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Bytes> {
        self.request_with(request, response, payload.into(), Some(timeout))
            .await
    }

    async fn request_with(
        &self,
        request: Command,
        response: Command,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        let pending = self
            .inner
            .table
            .await_response(response)
            .map_err(Error::from_core)?;

        self.inner.send(request, payload).await?;

        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => pending.await,
        };
        result.map_err(Error::from_core)
    }

    /// Send a command without waiting for anything
    pub async fn send(&self, command: Command, payload: impl Into<Bytes>) -> Result<()> {
        self.inner.send(command, payload.into()).await
    }

    /// Reset the device
    pub async fn reset(&self) -> Result<()> {
        info!(peer = ?self.inner.peer, "Resetting device");
        self.inner.send(Command::Reset, Bytes::new()).await
    }

    /// Close the session
    ///
    /// Stops the receive loop and shuts the connection down. Idempotent;
    /// concurrent callers observe exactly one [`DeviceEvent::Disconnected`].
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.shutdown.notify_one();

        // Fails in-flight sends and releases the writer
        inner.mark_disconnected();

        let graceful = async {
            let mut writer = inner.writer.lock().await;
            writer.shutdown().await
        };
        match tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, graceful).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!("Writer shutdown: {}", e),
            Err(_) => debug!(peer = ?inner.peer, "Writer shutdown timed out"),
        }

        let task = inner.receive_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Receive loop ended abnormally: {}", e);
            }
        }
    }

    /// Wait until the session has ended
    pub async fn closed(&self) {
        self.inner.wait_closed().await;
    }

    /// Subscribe to device events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    /// Check if negotiation finished and the session is still up
    pub fn is_connected(&self) -> bool {
        self.inner.session.is_ready()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// Identification string reported by the device
    pub fn identity(&self) -> Option<&str> {
        self.inner.identity.get().map(String::as_str)
    }

    pub fn features(&self) -> Option<&Features> {
        self.inner.features.get()
    }

    /// Peripherals, once negotiated
    pub fn peripherals(&self) -> Result<&Peripherals> {
        self.inner
            .peripherals
            .get()
            .map(Arc::as_ref)
            .ok_or(Error::NotNegotiated)
    }

    pub fn inputs(&self) -> &[DigitalInput] {
        self.peripherals().map(Peripherals::inputs).unwrap_or(&[])
    }

    pub fn relays(&self) -> &[DigitalOutput] {
        self.peripherals().map(Peripherals::relays).unwrap_or(&[])
    }

    pub fn leds(&self) -> &[DigitalOutput] {
        self.peripherals().map(Peripherals::leds).unwrap_or(&[])
    }

    pub fn serial_ports(&self) -> &[SerialPort] {
        self.peripherals().map(Peripherals::serial_ports).unwrap_or(&[])
    }

    pub fn buzzer(&self) -> Option<&DigitalOutput> {
        self.peripherals().ok().and_then(Peripherals::buzzer)
    }

    pub fn display(&self) -> Option<&Display> {
        self.peripherals().ok().and_then(Peripherals::display)
    }

    /// Check if both handles refer to the same session
    pub fn same_session(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Dispatch table of the session, for custom listeners
    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.inner.table
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("peer", &self.inner.peer)
            .field("identity", &self.identity())
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identity = self.identity().unwrap_or("?");
        if self.is_connected() {
            write!(f, "Rex {}", identity)
        } else {
            write!(f, "Rex {} ({})", identity, self.state())
        }
    }
}

impl DeviceInner {
    async fn send(&self, command: Command, payload: Bytes) -> Result<()> {
        if !self.session.is_connected() {
            return Err(Error::Disconnected);
        }

        let envelope = Envelope::new(command, payload);
        debug!(peer = ?self.peer, %command, len = envelope.payload.len(), "Sending command");

        // A device that stops reading must not pin the writer past close
        let mut writer = tokio::select! {
            writer = self.writer.lock() => writer,
            _ = self.wait_closed() => return Err(Error::Disconnected),
        };
        let written = tokio::select! {
            result = writer.write_frame(&envelope) => result,
            _ = self.wait_closed() => {
                debug!(peer = ?self.peer, %command, "Send abandoned, session closed");
                return Err(Error::Disconnected);
            }
        };

        if let Err(e) = written {
            warn!(peer = ?self.peer, "Send failed, closing session: {}", e);
            self.shutdown.notify_one();
            return Err(e.into());
        }
        Ok(())
    }

    /// Resolves once the session has been marked disconnected
    async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        // The sender lives as long as the session
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Tear down session state; only the first caller does anything
    fn mark_disconnected(&self) {
        if !self.session.close() {
            return;
        }

        self.table.close();
        if let Some(peripherals) = self.peripherals.get() {
            peripherals.close_serial_ports();
        }
        self.closed.send_replace(true);
        let _ = self.events.send(DeviceEvent::Disconnected);

        info!(peer = ?self.peer, "Device disconnected");
    }
}

#[async_trait]
impl CommandSink for DeviceInner {
    async fn send_command(&self, command: Command, payload: Bytes) -> Result<()> {
        self.send(command, payload).await
    }
}

/// Read frames until the connection ends, a listener fails, or the session
/// is closed
async fn receive_loop(inner: Arc<DeviceInner>, mut reader: FrameReader<BoxedReader>) {
    loop {
        let frame = tokio::select! {
            _ = inner.shutdown.notified() => {
                debug!(peer = ?inner.peer, "Receive loop stopped");
                break;
            }
            frame = reader.read_frame() => frame,
        };

        let envelope = match frame {
            Ok(envelope) => envelope,
            Err(rexlink_transport::Error::ConnectionClosed) => {
                debug!(peer = ?inner.peer, "Connection closed by device");
                break;
            }
            Err(e) => {
                warn!(peer = ?inner.peer, "Receive failed: {}", e);
                break;
            }
        };

        debug!(
            peer = ?inner.peer,
            command = %command::describe(envelope.command),
            len = envelope.payload.len(),
            "Received frame"
        );

        if !inner.session.is_connected() {
            break;
        }
        if let Err(e) = inner.table.dispatch(envelope.command, &envelope.payload) {
            warn!(peer = ?inner.peer, "Protocol error, closing session: {}", e);
            break;
        }
    }

    inner.mark_disconnected();
}
