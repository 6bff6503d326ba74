//! Simulated device used by the integration tests

#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use rexlink::{Command, Device, DeviceConfig, Envelope, Features, FirmwareVersion};
use rexlink_transport::{FrameReader, FrameWriter};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// 2 relays, 1 serial port, 3 inputs, 4 LEDs, display and buzzer
pub fn lab_features() -> Features {
    Features {
        relays: 2,
        serial_ports: 1,
        digital_inputs: 3,
        leds: 4,
        fingerprint_scanners: 0,
        has_keyboard: false,
        has_display: true,
        has_buzzer: true,
        has_mp3: false,
        version: FirmwareVersion::new(1, 2, 3, 4),
    }
}

pub fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Device side of a session
pub struct SimDevice<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R, W> SimDevice<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// Next frame from the client
    pub async fn recv(&mut self) -> Envelope {
        tokio::time::timeout(TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a frame")
            .expect("failed to read frame")
    }

    /// Next frame, which must carry `command`
    pub async fn expect(&mut self, command: Command) -> Bytes {
        let envelope = self.recv().await;
        assert_eq!(envelope.command().unwrap(), command, "unexpected frame {:?}", envelope);
        envelope.payload
    }

    pub async fn send(&mut self, command: Command, payload: impl Into<Bytes>) {
        self.send_raw(command.into(), payload).await;
    }

    pub async fn send_raw(&mut self, command: u32, payload: impl Into<Bytes>) {
        self.writer
            .write_frame(&Envelope::from_raw(command, payload))
            .await
            .expect("failed to write frame");
    }

    /// Answer identification and features requests
    pub async fn negotiate(&mut self, identity: &str, features: &Features) {
        self.expect(Command::IdRequest).await;
        let mut id = identity.as_bytes().to_vec();
        id.resize(16, 0);
        self.send(Command::IdResponse, id).await;

        self.expect(Command::FeaturesRequest).await;
        self.send(Command::FeaturesResponse, features.encode()).await;
    }
}

pub type DuplexDevice = SimDevice<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// A session wired to a simulated device over an in-memory pipe
pub fn pair(config: DeviceConfig) -> (Device, DuplexDevice) {
    pair_with_buffer(config, 64 * 1024)
}

/// Like [`pair`] with `capacity` bytes of buffering in each direction
pub fn pair_with_buffer(config: DeviceConfig, capacity: usize) -> (Device, DuplexDevice) {
    let (client, device) = tokio::io::duplex(capacity);
    let (reader, writer) = tokio::io::split(device);
    (Device::with_config(client, config), SimDevice::new(reader, writer))
}

/// A session that has completed negotiation with [`lab_features`]
pub async fn connected() -> (Device, DuplexDevice) {
    connected_with(DeviceConfig::default()).await
}

pub async fn connected_with(config: DeviceConfig) -> (Device, DuplexDevice) {
    start(pair(config)).await
}

/// Negotiate an unstarted pair with [`lab_features`]
pub async fn start((device, mut sim): (Device, DuplexDevice)) -> (Device, DuplexDevice) {
    let starting = tokio::spawn({
        let device = device.clone();
        async move { device.start().await }
    });
    sim.negotiate("REX-0001", &lab_features()).await;
    starting.await.unwrap().expect("negotiation failed");

    (device, sim)
}
