//! Discovery and connection client
//!
//! Devices announce themselves with UDP beacons and, when asked with a
//! connection request, dial back to the client over TCP. [`Client`] runs
//! both sides: a discovery loop on the UDP socket and an accept loop on the
//! TCP listener, turning every accepted connection into a [`Device`].

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rexlink_core::{Command, DispatchTable, Envelope, SessionState};
use rexlink_transport::{route_local_addr, DiscoverySocket, TcpAcceptor};
use rexlink_types::{DiscoveredDevice, DiscoveryInfo};

use crate::config::ClientConfig;
use crate::device::{Device, DeviceEvent};
use crate::error::{Error, Result};
use crate::sink::words;

const EVENT_CAPACITY: usize = 256;

/// Back-off after a failed accept (descriptor exhaustion and the like)
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Something that happened on the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A discovery beacon arrived
    Discovered(DiscoveredDevice),

    /// A dialed-back session finished negotiation
    Connected(Device),

    /// A session ended
    Disconnected(Device),
}

/// Sends connection requests from the discovery socket
#[derive(Clone)]
struct Connector {
    socket: Arc<DiscoverySocket>,
    advertise_addr: Option<Ipv4Addr>,
    request_port: u16,
    tcp_port: u16,
}

impl Connector {
    async fn request(&self, device_ip: Ipv4Addr) -> Result<()> {
        let dest = SocketAddr::new(device_ip.into(), self.request_port);
        let local = match self.advertise_addr {
            Some(addr) => addr,
            None => route_local_addr(dest).await.map_err(|e| match e {
                rexlink_transport::Error::InvalidAddress(msg) => Error::NoRoute(msg),
                other => Error::Transport(other),
            })?,
        };

        // Address octets go out reversed
        let payload = words(&[0, u32::from(local), u32::from(self.tcp_port)], &[]);
        let envelope = Envelope::new(Command::ConnectionRequest, payload);
        self.socket.send_envelope(&envelope, dest).await?;

        info!(device = %dest, callback = %SocketAddr::new(local.into(), self.tcp_port), "Connection requested");
        Ok(())
    }
}

/// Discovery and connection client
///
/// Cheap to clone. Background loops stop on [`shutdown`](Client::shutdown)
/// or when the last handle is dropped.
///
/// # Examples
///
/// ```no_run
/// use rexlink::{Client, ClientConfig, ClientEvent};
///
/// #[tokio::main]
/// async fn main() -> rexlink::Result<()> {
///     let client = Client::bind(ClientConfig::default().with_auto_connect(true)).await?;
///     let mut events = client.subscribe();
///
///     while let Ok(event) = events.recv().await {
///         match event {
///             ClientEvent::Discovered(found) => println!("found {}", found.info),
///             ClientEvent::Connected(device) => println!("connected {}", device),
///             ClientEvent::Disconnected(device) => println!("lost {}", device),
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    connector: Connector,
    discovery_addr: SocketAddr,
    tcp_addr: SocketAddr,
    table: DispatchTable,
    events: broadcast::Sender<ClientEvent>,
    devices: Arc<Mutex<Vec<Device>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Bind both sockets and start the background loops
    pub async fn bind(config: ClientConfig) -> Result<Self> {
        let socket = Arc::new(DiscoverySocket::bind(config.discovery_bind_addr()).await?);
        let acceptor = TcpAcceptor::bind(config.tcp_bind_addr()).await?;
        let discovery_addr = socket.local_addr()?;
        let tcp_addr = acceptor.local_addr()?;

        let connector = Connector {
            socket: Arc::clone(&socket),
            advertise_addr: config.advertise_addr,
            request_port: config.connection_request_port,
            tcp_port: tcp_addr.port(),
        };
        let table = DispatchTable::new("discovery");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let devices = Arc::new(Mutex::new(Vec::new()));

        // Source of the datagram currently being dispatched
        let source = Arc::new(Mutex::new(discovery_addr));
        register_discovery(&table, &events, &source, &connector, config.auto_connect);

        let discovery = tokio::spawn(discovery_loop(socket, table.clone(), source));
        let accept = tokio::spawn(accept_loop(
            acceptor,
            config.clone(),
            events.clone(),
            Arc::clone(&devices),
        ));

        info!(discovery = %discovery_addr, tcp = %tcp_addr, "Client started");

        Ok(Self {
            inner: Arc::new(ClientInner {
                connector,
                discovery_addr,
                tcp_addr,
                table,
                events,
                devices,
                tasks: Mutex::new(vec![discovery, accept]),
            }),
        })
    }

    /// Ask the device at `device_ip` to connect back to this client
    ///
    /// # Errors
    ///
    /// [`Error::NoRoute`] if no advertise address is configured and none can
    /// be determined towards the device.
    pub async fn request_connection(&self, device_ip: Ipv4Addr) -> Result<()> {
        self.inner.connector.request(device_ip).await
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Address of the TCP listener devices dial back to
    pub fn local_tcp_addr(&self) -> SocketAddr {
        self.inner.tcp_addr
    }

    /// Address of the discovery socket
    pub fn discovery_addr(&self) -> SocketAddr {
        self.inner.discovery_addr
    }

    /// Sessions that have not ended yet
    pub fn devices(&self) -> Vec<Device> {
        self.inner.devices.lock().clone()
    }

    /// Stop the background loops and close every session
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.inner.table.close();

        let devices = self.devices();
        for device in devices {
            device.close().await;
        }
        info!("Client stopped");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn register_discovery(
    table: &DispatchTable,
    events: &broadcast::Sender<ClientEvent>,
    source: &Arc<Mutex<SocketAddr>>,
    connector: &Connector,
    auto_connect: bool,
) {
    let events = events.clone();
    let source = Arc::clone(source);
    let connector = connector.clone();

    table.register(Command::Discovery, move |payload| {
        let info = DiscoveryInfo::parse(payload)
            .map_err(|e| rexlink_core::Error::Protocol(e.to_string()))?;
        let found = DiscoveredDevice::new(info, *source.lock());
        debug!(device = %found.info, source = %found.source, "Device discovered");

        if auto_connect {
            let connector = connector.clone();
            let ip = found.info.ip;
            tokio::spawn(async move {
                if let Err(e) = connector.request(ip).await {
                    warn!(device = %ip, "Connection request failed: {}", e);
                }
            });
        }

        let _ = events.send(ClientEvent::Discovered(found));
        Ok(())
    });
}

async fn discovery_loop(
    socket: Arc<DiscoverySocket>,
    table: DispatchTable,
    source: Arc<Mutex<SocketAddr>>,
) {
    loop {
        let (envelope, from) = match socket.recv_envelope().await {
            Ok(received) => received,
            Err(e) if e.is_framing() => {
                warn!("Dropping malformed datagram: {}", e);
                continue;
            }
            Err(e) => {
                warn!("Discovery receive failed: {}", e);
                continue;
            }
        };

        *source.lock() = from;
        if let Err(e) = table.dispatch(envelope.command, &envelope.payload) {
            warn!(source = %from, "Ignoring datagram: {}", e);
        }
    }
}

async fn accept_loop(
    acceptor: TcpAcceptor,
    config: ClientConfig,
    events: broadcast::Sender<ClientEvent>,
    devices: Arc<Mutex<Vec<Device>>>,
) {
    loop {
        let (stream, peer) = match acceptor.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let device = match Device::from_tcp(stream, config.device.clone()) {
            Ok(device) => device,
            Err(e) => {
                warn!(%peer, "Dropping connection: {}", e);
                continue;
            }
        };
        devices.lock().push(device.clone());

        // Subscribe before starting so Connected cannot be missed
        let device_events = device.subscribe();
        tokio::spawn(forward_events(
            device.clone(),
            device_events,
            events.clone(),
            Arc::clone(&devices),
        ));

        tokio::spawn(async move {
            if let Err(e) = device.start().await {
                warn!(%peer, "Session failed to start: {}", e);
            }
        });
    }
}

async fn forward_events(
    device: Device,
    mut device_events: broadcast::Receiver<DeviceEvent>,
    events: broadcast::Sender<ClientEvent>,
    devices: Arc<Mutex<Vec<Device>>>,
) {
    loop {
        match device_events.recv().await {
            Ok(DeviceEvent::Connected) => {
                let _ = events.send(ClientEvent::Connected(device.clone()));
            }
            Ok(DeviceEvent::Disconnected) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Event forwarder lagged");
                if device.state() == SessionState::Disconnected {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    devices.lock().retain(|d| !d.same_session(&device));
    let _ = events.send(ClientEvent::Disconnected(device));
}
