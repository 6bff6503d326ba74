//! REX envelope encoding/decoding

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    command::{self, Command},
    constants::{ENVELOPE_HEADER_SIZE, FRAME_HEADER_SIZE, MAGIC, MAX_FRAME_SIZE},
    error::{Error, Result},
};

/// REX protocol envelope
///
/// # Wire Structure
///
/// UDP datagram:
///
/// ```text
/// ┌─────────────┬─────────────┬─────────────┬─────────────┐
/// │    Magic    │   Command   │ Payload len │   Payload   │
/// │   "REX0"    │   4 bytes   │   4 bytes   │   N bytes   │
/// └─────────────┴─────────────┴─────────────┴─────────────┘
/// ```
///
/// TCP frame (same envelope, prefixed by a length that counts itself):
///
/// ```text
/// ┌─────────────┬─────────────┬─────────────┬─────────────┬─────────────┐
/// │ Total len   │    Magic    │   Command   │ Payload len │   Payload   │
/// │ 16 + N      │   "REX0"    │   4 bytes   │   4 bytes   │   N bytes   │
/// └─────────────┴─────────────┴─────────────┴─────────────┴─────────────┘
/// ```
///
/// All multi-byte values are little-endian u32.
///
/// # Examples
///
/// ```
/// use rexlink_core::{Command, Envelope};
///
/// let envelope = Envelope::new(Command::IdRequest, Vec::new());
/// let frame = envelope.encode_tcp();
/// assert_eq!(frame.len(), 16);
///
/// let decoded = Envelope::decode_tcp(frame.freeze()).unwrap();
/// assert_eq!(decoded, envelope);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Raw command identifier
    pub command: u32,

    /// Command-specific payload
    pub payload: Bytes,
}

impl Envelope {
    /// Create an envelope for a known command
    pub fn new(command: Command, payload: impl Into<Bytes>) -> Self {
        Self::from_raw(command.into(), payload)
    }

    /// Create an envelope from a raw command identifier
    pub fn from_raw(command: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Resolve the command identifier against the known vocabulary
    pub fn command(&self) -> Result<Command> {
        Command::try_from(self.command)
    }

    /// Encode as a UDP datagram (`magic | command | len | payload`)
    pub fn encode_udp(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + self.payload.len());
        self.put_envelope(&mut buf);
        buf
    }

    /// Encode as a TCP frame (`total | magic | command | len | payload`)
    pub fn encode_tcp(&self) -> BytesMut {
        let total_size = FRAME_HEADER_SIZE + self.payload.len();
        let mut buf = BytesMut::with_capacity(total_size);

        buf.put_u32_le(total_size as u32);
        self.put_envelope(&mut buf);

        buf
    }

    fn put_envelope(&self, buf: &mut BytesMut) {
        buf.put_u32_le(MAGIC);
        buf.put_u32_le(self.command);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Decode an envelope (a UDP datagram, or a TCP frame body without its
    /// length prefix)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Buffer is shorter than the 12-byte header
    /// - Magic is not "REX0"
    /// - Declared payload length differs from the remaining byte count
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.len() < ENVELOPE_HEADER_SIZE {
            return Err(Error::FrameTooShort {
                expected: ENVELOPE_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let magic = buf.get_u32_le();
        if magic != MAGIC {
            return Err(Error::BadMagic {
                expected: MAGIC,
                actual: magic,
            });
        }

        let command = buf.get_u32_le();
        let declared = buf.get_u32_le() as usize;
        if declared != buf.len() {
            return Err(Error::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }

        Ok(Self {
            command,
            payload: buf,
        })
    }

    /// Decode one complete TCP frame held in memory
    ///
    /// The length prefix must match the buffer length exactly.
    pub fn decode_tcp(mut buf: Bytes) -> Result<Self> {
        if buf.len() < 4 {
            return Err(Error::FrameTooShort {
                expected: FRAME_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let total = buf.get_u32_le();
        let body_len = frame_body_len(total)?;
        if body_len != buf.len() {
            return Err(Error::LengthMismatch {
                declared: total as usize,
                actual: buf.len() + 4,
            });
        }

        Self::decode(buf)
    }

    /// Total size of this envelope as a TCP frame
    pub fn frame_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

/// Validate a TCP length prefix and return how many bytes follow it
pub fn frame_body_len(total: u32) -> Result<usize> {
    let total = total as usize;
    if total < FRAME_HEADER_SIZE {
        return Err(Error::FrameTooShort {
            expected: FRAME_HEADER_SIZE,
            actual: total,
        });
    }
    if total > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: total,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(total - 4)
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("command", &command::describe(self.command))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope[{}](len={})",
            command::describe(self.command),
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_udp_layout() {
        let envelope = Envelope::new(Command::Discovery, vec![0xAA, 0xBB]);
        let encoded = envelope.encode_udp();

        assert_eq!(
            encoded.as_ref(),
            &[
                b'R', b'E', b'X', b'0', // magic
                0x01, 0, 0, 0, // command
                2, 0, 0, 0, // payload length
                0xAA, 0xBB,
            ][..]
        );
    }

    #[test]
    fn test_tcp_layout() {
        let envelope = Envelope::new(Command::IdRequest, Bytes::new());
        let encoded = envelope.encode_tcp();

        assert_eq!(
            encoded.as_ref(),
            &[
                16, 0, 0, 0, // total length, counting itself
                b'R', b'E', b'X', b'0',
                0x0d, 0, 0, 0,
                0, 0, 0, 0,
            ][..]
        );
        assert_eq!(envelope.frame_size(), 16);
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut encoded = Envelope::new(Command::Discovery, vec![1]).encode_udp();
        encoded[0] = b'Z';

        let result = Envelope::decode(encoded.freeze());
        assert!(matches!(result, Err(Error::BadMagic { .. })));
    }

    #[test]
    fn test_decode_payload_length_mismatch() {
        let mut encoded = Envelope::new(Command::KeyTyped, vec![1, 2, 3, 4]).encode_udp();
        encoded.put_u8(0xFF);

        let result = Envelope::decode(encoded.freeze());
        assert!(matches!(
            result,
            Err(Error::LengthMismatch {
                declared: 4,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_decode_too_short() {
        let result = Envelope::decode(Bytes::from_static(b"REX0"));
        assert!(matches!(result, Err(Error::FrameTooShort { .. })));
    }

    #[test]
    fn test_decode_tcp_declared_length_disagrees() {
        let mut encoded = Envelope::new(Command::KeyTyped, vec![9, 0, 0, 0]).encode_tcp();
        // Claim one byte more than we have.
        encoded[0] += 1;
        let result = Envelope::decode_tcp(encoded.freeze());
        assert!(matches!(result, Err(Error::LengthMismatch { .. })));

        let mut encoded = Envelope::new(Command::KeyTyped, vec![9, 0, 0, 0]).encode_tcp();
        encoded.truncate(encoded.len() - 1);
        let result = Envelope::decode_tcp(encoded.freeze());
        assert!(matches!(result, Err(Error::LengthMismatch { .. })));
    }

    #[test]
    fn test_frame_body_len_bounds() {
        assert_eq!(frame_body_len(16).unwrap(), 12);
        assert!(matches!(frame_body_len(15), Err(Error::FrameTooShort { .. })));
        assert!(matches!(
            frame_body_len(MAX_FRAME_SIZE as u32 + 1),
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_unknown_command_still_decodes() {
        let envelope = Envelope::from_raw(0x99, vec![7]);
        let decoded = Envelope::decode(envelope.encode_udp().freeze()).unwrap();
        assert_eq!(decoded.command, 0x99);
        assert!(decoded.command().is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(command in any::<u32>(), payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let envelope = Envelope::from_raw(command, payload);

            let tcp = Envelope::decode_tcp(envelope.encode_tcp().freeze()).unwrap();
            prop_assert_eq!(&tcp, &envelope);

            let udp = Envelope::decode(envelope.encode_udp().freeze()).unwrap();
            prop_assert_eq!(&udp, &envelope);
        }
    }
}
