//! Discovery beacon contents

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::text;

/// Hardware address of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Parse the 12-character hex form used on the wire (`001e331d0fb6`)
    pub fn from_hex(hex_chars: &[u8]) -> Result<Self> {
        let mut bytes = [0u8; 6];
        hex::decode_to_slice(hex_chars, &mut bytes).map_err(|e| {
            Error::Parse(format!(
                "invalid MAC address {:?}: {}",
                String::from_utf8_lossy(hex_chars),
                e
            ))
        })?;
        Ok(Self(bytes))
    }

    /// The 12-character hex form used on the wire
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        Self::from_hex(compact.as_bytes())
    }
}

/// Contents of a discovery beacon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryInfo {
    /// Device name (conventionally the MAC in hex)
    pub name: String,
    pub mac: MacAddress,
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl DiscoveryInfo {
    /// Size of the fixed name field
    pub const NAME_SIZE: usize = 12;

    /// Size of the discovery payload
    pub const PAYLOAD_SIZE: usize = Self::NAME_SIZE + 12 + 4 + 4 + 4;

    /// Parse a discovery payload
    ///
    /// ```text
    /// name(12 ASCII) | mac(12 hex chars) | ip(4) | mask(4) | gateway(4)
    /// ```
    ///
    /// Addresses are in network order (`192.168.1.56` is `{192, 168, 1, 56}`).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::PAYLOAD_SIZE {
            return Err(Error::truncated("discovery"));
        }

        let (name, rest) = payload.split_at(Self::NAME_SIZE);
        let (mac, rest) = rest.split_at(12);
        let (ip, rest) = rest.split_at(4);
        let (mask, rest) = rest.split_at(4);
        let gateway = &rest[..4];

        Ok(Self {
            name: text::decode(name),
            mac: MacAddress::from_hex(mac)?,
            ip: ipv4(ip),
            mask: ipv4(mask),
            gateway: ipv4(gateway),
        })
    }

    /// Encode as a discovery payload; the name is padded with `_` like the
    /// device firmware does
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::PAYLOAD_SIZE);

        let mut name = text::encode(&self.name);
        name.resize(Self::NAME_SIZE, b'_');
        buf.extend_from_slice(&name);
        buf.extend_from_slice(self.mac.to_hex().as_bytes());
        buf.extend_from_slice(&self.ip.octets());
        buf.extend_from_slice(&self.mask.octets());
        buf.extend_from_slice(&self.gateway.octets());

        buf
    }
}

fn ipv4(bytes: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}

impl fmt::Display for DiscoveryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rex[{}, MAC: {}, IP: {}/{}, GW: {}]",
            self.name, self.mac, self.ip, self.mask, self.gateway
        )
    }
}

/// A beacon as received by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub info: DiscoveryInfo,

    /// Datagram source address
    pub source: SocketAddr,

    /// When the beacon was received
    pub seen_at: DateTime<Utc>,
}

impl DiscoveredDevice {
    pub fn new(info: DiscoveryInfo, source: SocketAddr) -> Self {
        Self {
            info,
            source,
            seen_at: Utc::now(),
        }
    }
}
