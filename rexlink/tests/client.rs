mod common;

use std::net::{Ipv4Addr, SocketAddr};

use pretty_assertions::assert_eq;
use rexlink::{Client, ClientConfig, ClientEvent, Command, DiscoveryInfo, Envelope, SessionState};
use rexlink_transport::DiscoverySocket;
use tokio::net::TcpStream;
use tokio::time::timeout;

use common::{lab_features, SimDevice, TIMEOUT};

fn beacon() -> DiscoveryInfo {
    DiscoveryInfo {
        name: "001e331d0fb6".into(),
        mac: "00:1e:33:1d:0f:b6".parse().unwrap(),
        ip: Ipv4Addr::LOCALHOST,
        mask: Ipv4Addr::new(255, 0, 0, 0),
        gateway: Ipv4Addr::LOCALHOST,
    }
}

async fn next_event(events: &mut tokio::sync::broadcast::Receiver<ClientEvent>) -> ClientEvent {
    timeout(TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a client event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_discovery_to_connected_session() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    // Device side: the socket that receives connection requests
    let device_udp = DiscoverySocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let config = ClientConfig::default()
        .with_bind_addr(Ipv4Addr::LOCALHOST.into())
        .with_discovery_port(0)
        .with_connection_request_port(device_udp.local_addr().unwrap().port())
        .with_advertise_addr(Ipv4Addr::LOCALHOST)
        .with_auto_connect(true);
    let client = Client::bind(config).await.unwrap();
    let mut events = client.subscribe();

    // Announce
    let announcement = Envelope::new(Command::Discovery, beacon().encode());
    device_udp
        .send_envelope(&announcement, client.discovery_addr())
        .await
        .unwrap();

    match next_event(&mut events).await {
        ClientEvent::Discovered(found) => {
            assert_eq!(found.info, beacon());
            assert_eq!(found.source, device_udp.local_addr().unwrap());
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Connection request arrives; dial back to the advertised endpoint
    let (request, _) = timeout(TIMEOUT, device_udp.recv_envelope()).await.unwrap().unwrap();
    assert_eq!(request.command().unwrap(), Command::ConnectionRequest);
    let payload = request.payload.as_ref();
    assert_eq!(&payload[..8], &[0, 0, 0, 0, 1, 0, 0, 127]);
    let port = u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]) as u16;
    assert_eq!(port, client.local_tcp_addr().port());

    let stream = TcpStream::connect(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port))
        .await
        .unwrap();
    let (reader, writer) = stream.into_split();
    let mut sim = SimDevice::new(reader, writer);
    sim.negotiate("REX-0001", &lab_features()).await;

    let device = match next_event(&mut events).await {
        ClientEvent::Connected(device) => device,
        other => panic!("unexpected event {:?}", other),
    };
    assert_eq!(device.state(), SessionState::Connected);
    assert_eq!(device.identity(), Some("REX-0001"));
    assert_eq!(device.inputs().len(), 3);
    assert_eq!(client.devices().len(), 1);

    // Hang up
    drop(sim);
    match next_event(&mut events).await {
        ClientEvent::Disconnected(gone) => assert!(gone.same_session(&device)),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(client.devices().is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn test_each_connection_gets_its_own_session() {
    let client = Client::bind(
        ClientConfig::default()
            .with_bind_addr(Ipv4Addr::LOCALHOST.into())
            .with_discovery_port(0),
    )
    .await
    .unwrap();
    let mut events = client.subscribe();

    let mut sims = Vec::new();
    for identity in ["REX-A", "REX-B"] {
        let stream = TcpStream::connect(client.local_tcp_addr()).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut sim = SimDevice::new(reader, writer);
        sim.negotiate(identity, &lab_features()).await;
        sims.push(sim);
    }

    let mut identities = Vec::new();
    for _ in 0..2 {
        match next_event(&mut events).await {
            ClientEvent::Connected(device) => identities.push(device.identity().unwrap().to_string()),
            other => panic!("unexpected event {:?}", other),
        }
    }
    identities.sort();
    assert_eq!(identities, vec!["REX-A".to_string(), "REX-B".to_string()]);
    assert_eq!(client.devices().len(), 2);

    let devices = client.devices();
    client.shutdown().await;
    for device in devices {
        assert_eq!(device.state(), SessionState::Disconnected);
    }
}
