//! TCP transport
//!
//! TCP is a byte stream; the 4-byte length prefix of each frame is the only
//! message boundary. [`FrameReader`] is the one place that boundary is
//! established.

use std::net::SocketAddr;

use bytes::BytesMut;
use rexlink_core::{codec, Envelope};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

use crate::error::*;

/// Reads length-prefixed frames from a byte stream
pub struct FrameReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read one frame
    ///
    /// Reads the total length, then exactly `length - 4` further bytes, and
    /// decodes them as an envelope.
    ///
    /// Not cancel-safe: dropping the future mid-frame loses stream sync, so
    /// only cancel it when abandoning the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] on a clean EOF at a frame boundary
    /// - [`Error::Frame`] on a bad length, magic or payload length
    /// - [`Error::Io`] on read failures, including EOF inside a frame
    pub async fn read_frame(&mut self) -> Result<Envelope> {
        let total = match self.reader.read_u32_le().await {
            Ok(total) => total,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::ConnectionClosed);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let body_len = codec::frame_body_len(total)?;
        let mut body = BytesMut::zeroed(body_len);
        self.reader.read_exact(&mut body).await?;

        trace!(
            "Received frame of {} bytes: {:02X?}",
            total,
            &body[..body.len().min(16)]
        );

        Ok(Envelope::decode(body.freeze())?)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes length-prefixed frames to a byte stream
///
/// Each frame is written with a single `write_all`; callers sharing a writer
/// must still serialize access, since a write may be split by the OS.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encode and write one frame
    pub async fn write_frame(&mut self, envelope: &Envelope) -> Result<()> {
        let data = envelope.encode_tcp();

        trace!("Sending {} bytes: {:02X?}", data.len(), &data[..data.len().min(16)]);

        self.writer.write_all(&data).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Shut down the write direction
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Listening socket devices dial back to
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind the listener; port 0 picks an ephemeral port
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        debug!("Listening for devices on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the next device connection
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        debug!("Accepted connection from {}", peer);
        Ok((stream, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rexlink_core::Command;

    #[tokio::test]
    async fn test_frames_over_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer
            .write_frame(&Envelope::new(Command::IdRequest, Vec::new()))
            .await
            .unwrap();
        writer
            .write_frame(&Envelope::new(Command::KeyTyped, vec![0x31, 0, 0, 0]))
            .await
            .unwrap();

        let first = reader.read_frame().await.unwrap();
        assert_eq!(first.command, 0x0d);
        assert!(first.payload.is_empty());

        let second = reader.read_frame().await.unwrap();
        assert_eq!(second.command().unwrap(), Command::KeyTyped);
        assert_eq!(second.payload.as_ref(), &[0x31, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_clean_eof_is_connection_closed() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);

        let mut reader = FrameReader::new(server);
        assert!(matches!(reader.read_frame().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_io_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let frame = Envelope::new(Command::KeyTyped, vec![1, 2, 3, 4]).encode_tcp();
        client.write_all(&frame[..10]).await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        assert!(matches!(reader.read_frame().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_bad_magic_is_framing_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut frame = Envelope::new(Command::KeyTyped, vec![1, 2, 3, 4]).encode_tcp();
        frame[4] = b'X';
        client.write_all(&frame).await.unwrap();

        let mut reader = FrameReader::new(server);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is_framing());
    }

    #[tokio::test]
    async fn test_undersized_length_prefix() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&8u32.to_le_bytes()).await.unwrap();

        let mut reader = FrameReader::new(server);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Frame(rexlink_core::Error::FrameTooShort { .. })
        ));
    }

    #[tokio::test]
    async fn test_payload_length_disagrees_with_frame_length() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut frame = Envelope::new(Command::KeyTyped, vec![1, 2, 3, 4]).encode_tcp();
        // payload length field says 3
        frame[12] = 3;
        client.write_all(&frame).await.unwrap();

        let mut reader = FrameReader::new(server);
        assert!(matches!(
            reader.read_frame().await,
            Err(Error::Frame(rexlink_core::Error::LengthMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_acceptor_loopback() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = acceptor.local_addr().unwrap();

        let dial = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (stream, peer) = acceptor.accept().await.unwrap();
        let remote = dial.await.unwrap();

        assert_eq!(peer, remote.local_addr().unwrap());
        assert!(stream.nodelay().unwrap());
    }
}
