//! UDP transport for discovery beacons and connection requests
//!
//! One datagram carries exactly one envelope.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use rexlink_core::{constants::MAX_DATAGRAM_SIZE, Envelope};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::error::*;

/// Socket listening for discovery beacons and sending connection requests
pub struct DiscoverySocket {
    socket: UdpSocket,
}

impl DiscoverySocket {
    /// Bind to `addr` with broadcast enabled
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        debug!("Discovery socket bound to {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive one datagram and decode it
    ///
    /// A datagram that fails to decode yields a framing error; the socket
    /// stays usable and the caller may simply continue.
    pub async fn recv_envelope(&self) -> Result<(Envelope, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (n, source) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(n);

        trace!(
            "Received {} bytes from {}: {:02X?}",
            n,
            source,
            &buf[..n.min(32)]
        );

        let envelope = Envelope::decode(buf.into())?;
        Ok((envelope, source))
    }

    /// Encode and send one envelope
    pub async fn send_envelope(&self, envelope: &Envelope, dest: SocketAddr) -> Result<()> {
        let data = envelope.encode_udp();

        trace!("Sending {} bytes to {}: {:02X?}", data.len(), dest, &data[..data.len().min(32)]);

        let sent = self.socket.send_to(&data, dest).await?;
        if sent != data.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short datagram write: {} of {} bytes", sent, data.len()),
            )));
        }

        Ok(())
    }
}

/// Local address the OS would use to reach `dest`
///
/// Connects a throwaway UDP socket (no packets are sent) and reads back its
/// local address. Used to pick the address advertised in connection requests.
pub async fn route_local_addr(dest: SocketAddr) -> Result<Ipv4Addr> {
    let probe = UdpSocket::bind(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)).await?;
    probe.connect(dest).await?;

    match probe.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        other => Err(Error::InvalidAddress(format!(
            "no IPv4 route towards {} (got {})",
            dest, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rexlink_core::Command;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_and_receive_envelope() {
        let receiver = DiscoverySocket::bind(loopback()).await.unwrap();
        let sender = DiscoverySocket::bind(loopback()).await.unwrap();

        let envelope = Envelope::new(Command::ConnectionRequest, vec![0, 0, 0, 0]);
        sender
            .send_envelope(&envelope, receiver.local_addr().unwrap())
            .await
            .unwrap();

        let (received, source) = receiver.recv_envelope().await.unwrap();
        assert_eq!(received, envelope);
        assert_eq!(source, sender.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_garbage_datagram_is_framing_error() {
        let receiver = DiscoverySocket::bind(loopback()).await.unwrap();
        let raw = UdpSocket::bind(loopback()).await.unwrap();
        raw.send_to(b"not a frame", receiver.local_addr().unwrap())
            .await
            .unwrap();

        let err = receiver.recv_envelope().await.unwrap_err();
        assert!(err.is_framing());

        // Socket remains usable
        let envelope = Envelope::new(Command::Discovery, vec![1; 4]);
        raw.send_to(&envelope.encode_udp(), receiver.local_addr().unwrap())
            .await
            .unwrap();
        let (received, _) = receiver.recv_envelope().await.unwrap();
        assert_eq!(received.command().unwrap(), Command::Discovery);
    }

    #[tokio::test]
    async fn test_route_to_loopback() {
        let ip = route_local_addr("127.0.0.1:1025".parse().unwrap()).await.unwrap();
        assert!(ip.is_loopback());
    }
}
