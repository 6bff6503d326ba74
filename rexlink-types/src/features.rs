//! Device capability descriptor

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Largest resource count accepted from a features response
pub const MAX_RESOURCES: usize = 256;

/// Firmware version reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
    pub revision: u8,
}

impl FirmwareVersion {
    pub fn new(major: u8, minor: u8, build: u8, revision: u8) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Capabilities reported in the features response
///
/// Parsed once during negotiation; every peripheral collection of a session
/// is sized from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Features {
    /// Number of relays
    pub relays: usize,

    /// Number of tunneled serial ports
    pub serial_ports: usize,

    /// Number of digital inputs
    pub digital_inputs: usize,

    /// Number of LEDs
    pub leds: usize,

    /// Number of fingerprint scanners
    pub fingerprint_scanners: usize,

    pub has_keyboard: bool,
    pub has_display: bool,
    pub has_buzzer: bool,
    pub has_mp3: bool,

    /// Firmware version
    pub version: FirmwareVersion,
}

impl Features {
    /// Size of the fixed features payload
    pub const PAYLOAD_SIZE: usize = 9 * 4 + 4;

    /// Parse a features-response payload
    ///
    /// ```text
    /// relays | serials | inputs | leds | scanners | keyboard | display | buzzer | mp3 | rev build minor major
    ///   u32      u32      u32     u32      u32       u32       u32       u32    u32    u8   u8    u8    u8
    /// ```
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::PAYLOAD_SIZE {
            return Err(Error::truncated("features"));
        }

        let mut cursor = Cursor::new(payload);
        let mut count = |name: &str| -> Result<usize> {
            let value = cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| Error::truncated("features"))? as usize;
            if value > MAX_RESOURCES {
                return Err(Error::Validation(format!(
                    "device reports {} {} (max {})",
                    value, name, MAX_RESOURCES
                )));
            }
            Ok(value)
        };

        let relays = count("relays")?;
        let serial_ports = count("serial ports")?;
        let digital_inputs = count("digital inputs")?;
        let leds = count("leds")?;
        let fingerprint_scanners = count("fingerprint scanners")?;
        let has_keyboard = count("keyboard flag")? != 0;
        let has_display = count("display flag")? != 0;
        let has_buzzer = count("buzzer flag")? != 0;
        let has_mp3 = count("mp3 flag")? != 0;

        // Version bytes arrive least significant first.
        let tail = &payload[9 * 4..Self::PAYLOAD_SIZE];
        let version = FirmwareVersion::new(tail[3], tail[2], tail[1], tail[0]);

        Ok(Self {
            relays,
            serial_ports,
            digital_inputs,
            leds,
            fingerprint_scanners,
            has_keyboard,
            has_display,
            has_buzzer,
            has_mp3,
            version,
        })
    }

    /// Encode as a features-response payload
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::PAYLOAD_SIZE);
        for value in [
            self.relays as u32,
            self.serial_ports as u32,
            self.digital_inputs as u32,
            self.leds as u32,
            self.fingerprint_scanners as u32,
            u32::from(self.has_keyboard),
            u32::from(self.has_display),
            u32::from(self.has_buzzer),
            u32::from(self.has_mp3),
        ] {
            // Writing into a Vec cannot fail.
            let _ = buf.write_u32::<LittleEndian>(value);
        }
        buf.extend_from_slice(&[
            self.version.revision,
            self.version.build,
            self.version.minor,
            self.version.major,
        ]);
        buf
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Features[inputs={}, relays={}, leds={}, serial={}, scanners={}, keyboard={}, display={}, buzzer={}, mp3={}, fw={}]",
            self.digital_inputs,
            self.relays,
            self.leds,
            self.serial_ports,
            self.fingerprint_scanners,
            self.has_keyboard,
            self.has_display,
            self.has_buzzer,
            self.has_mp3,
            self.version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(values: [u32; 9], version: [u8; 4]) -> Vec<u8> {
        let mut buf = Vec::new();
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&version);
        buf
    }

    #[test]
    fn test_parse_features() {
        let payload = raw([2, 1, 3, 4, 0, 0, 1, 1, 0], [4, 3, 2, 1]);
        let features = Features::parse(&payload).unwrap();

        assert_eq!(
            features,
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
        );
        assert_eq!(features.version.to_string(), "1.2.3.4");
    }

    #[test]
    fn test_nonzero_flag_is_true() {
        let payload = raw([0, 0, 0, 0, 0, 7, 0, 0, 0], [0; 4]);
        assert!(Features::parse(&payload).unwrap().has_keyboard);
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let payload = raw([2, 1, 3, 4, 0, 0, 1, 1, 0], [4, 3, 2, 1]);
        let features = Features::parse(&payload).unwrap();
        assert_eq!(features.encode(), payload);
    }

    #[test]
    fn test_truncated_payload() {
        let payload = raw([2, 1, 3, 4, 0, 0, 1, 1, 0], [4, 3, 2, 1]);
        assert!(matches!(
            Features::parse(&payload[..Features::PAYLOAD_SIZE - 1]),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_absurd_count_rejected() {
        let payload = raw([100_000, 0, 0, 0, 0, 0, 0, 0, 0], [0; 4]);
        assert!(matches!(Features::parse(&payload), Err(Error::Validation(_))));
    }
}
