//! Client and session configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use rexlink_core::constants::{CONNECTION_REQUEST_PORT, DISCOVERY_PORT};

/// Per-session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Upper bound on waiting for a correlated response
    ///
    /// `None` waits until the response arrives or the session ends.
    pub request_timeout: Option<Duration>,

    /// Capacity of the device event channel
    pub event_capacity: usize,
}

impl DeviceConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            event_capacity: 256,
        }
    }
}

/// Settings for the discovery and accept loops
///
/// # Examples
///
/// ```
/// use std::net::Ipv4Addr;
/// use rexlink::ClientConfig;
///
/// let config = ClientConfig::default()
///     .with_tcp_port(5000)
///     .with_advertise_addr(Ipv4Addr::new(192, 168, 1, 10))
///     .with_auto_connect(true);
///
/// assert_eq!(config.discovery_port, 2800);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// UDP port beacons arrive on
    pub discovery_port: u16,

    /// UDP port devices listen on for connection requests
    pub connection_request_port: u16,

    /// TCP port devices dial back to; 0 picks an ephemeral port
    pub tcp_port: u16,

    /// Local address both sockets bind to
    pub bind_addr: IpAddr,

    /// Address advertised in connection requests
    ///
    /// When unset, the address the OS routes towards the device is used.
    pub advertise_addr: Option<Ipv4Addr>,

    /// Send a connection request to every device that announces itself
    pub auto_connect: bool,

    /// Settings applied to each accepted session
    pub device: DeviceConfig,
}

impl ClientConfig {
    pub fn with_discovery_port(mut self, port: u16) -> Self {
        self.discovery_port = port;
        self
    }

    pub fn with_connection_request_port(mut self, port: u16) -> Self {
        self.connection_request_port = port;
        self
    }

    pub fn with_tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_advertise_addr(mut self, addr: Ipv4Addr) -> Self {
        self.advertise_addr = Some(addr);
        self
    }

    pub fn with_auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    pub fn with_device_config(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    pub(crate) fn discovery_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.discovery_port)
    }

    pub(crate) fn tcp_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.tcp_port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            discovery_port: DISCOVERY_PORT,
            connection_request_port: CONNECTION_REQUEST_PORT,
            tcp_port: 0,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_addr: None,
            auto_connect: false,
            device: DeviceConfig::default(),
        }
    }
}
