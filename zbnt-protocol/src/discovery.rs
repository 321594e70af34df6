//! Discovery datagrams.
//!
//! A client broadcasts a [`MessageId::Discovery`] request carrying a random validator
//! to [`DISCOVERY_PORT`]; every device answers with a response describing itself.
//! Socket handling is left to the caller.
use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use crate::{
    encoding::{decode_ipv4, encode_ipv4, read_u16, read_u64},
    protocol::{Message, MessageId},
};

pub const DISCOVERY_PORT: u16 = 5466;

/// Shortest valid response; the device name follows this header and must not be empty.
const RESPONSE_HEADER_SIZE: usize = 67;

pub fn discovery_request(validator: u64) -> Message {
    Message::new(MessageId::Discovery as u16, validator.to_le_bytes().to_vec())
}

/// Firmware version reported by a device.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
    pub prerelease: String,
    pub build: String,
    pub dirty: bool,
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.prerelease.is_empty() {
            write!(f, "-{}", self.prerelease)?;
        }
        match (self.build.is_empty(), self.dirty) {
            (false, true) => write!(f, "+{}.d", self.build),
            (false, false) => write!(f, "+{}", self.build),
            (true, true) => write!(f, "+d"),
            (true, false) => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveredDevice {
    pub name: String,
    pub version: Version,
    /// IPv4 first, then IPv6, skipping unspecified addresses.
    pub addresses: Vec<IpAddr>,
    pub port: u16,
}

fn padded_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches('\0')
        .to_string()
}

/// Parses a discovery response received from `source`.
///
/// Responses answering another request, claiming an IPv4 address other than the
/// datagram's source, or advertising no address at all are rejected.
pub fn parse_response(validator: u64, source: IpAddr, message: &Message) -> Option<DiscoveredDevice> {
    let payload = &message.payload[..];
    if message.id != MessageId::Discovery as u16 || payload.len() <= RESPONSE_HEADER_SIZE {
        return None;
    }
    if read_u64(payload)? != validator {
        log::debug!("ignoring discovery response for another request from {source}");
        return None;
    }

    let version = Version {
        patch: read_u16(&payload[8..])?,
        minor: payload[10],
        major: payload[11],
        prerelease: padded_string(&payload[12..28]),
        build: padded_string(&payload[28..44]),
        dirty: payload[44] != 0,
    };

    let ipv4 = decode_ipv4(&payload[45..49])?;
    let ipv6 = Ipv6Addr::from(<[u8; 16]>::try_from(&payload[49..65]).ok()?);
    if source != IpAddr::V4(ipv4) {
        log::debug!("ignoring discovery response from {source} claiming {ipv4}");
        return None;
    }

    let addresses: Vec<IpAddr> = [IpAddr::V4(ipv4), IpAddr::V6(ipv6)]
        .into_iter()
        .filter(|addr| !addr.is_unspecified())
        .collect();
    if addresses.is_empty() {
        return None;
    }

    Some(DiscoveredDevice {
        name: String::from_utf8_lossy(&payload[RESPONSE_HEADER_SIZE..]).into_owned(),
        version,
        addresses,
        port: read_u16(&payload[65..])?,
    })
}

/// Builds a response payload; the counterpart of [`parse_response`].
pub fn encode_response(validator: u64, device: &DiscoveredDevice) -> Vec<u8> {
    let mut payload = Vec::with_capacity(RESPONSE_HEADER_SIZE + device.name.len());
    payload.extend_from_slice(&validator.to_le_bytes());
    payload.extend_from_slice(&device.version.patch.to_le_bytes());
    payload.push(device.version.minor);
    payload.push(device.version.major);
    payload.extend_from_slice(&padded(&device.version.prerelease));
    payload.extend_from_slice(&padded(&device.version.build));
    payload.push(device.version.dirty as u8);

    let ipv4 = device
        .addresses
        .iter()
        .find_map(|addr| match addr {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
        .unwrap_or(Ipv4Addr::UNSPECIFIED);
    let ipv6 = device
        .addresses
        .iter()
        .find_map(|addr| match addr {
            IpAddr::V6(v6) => Some(*v6),
            IpAddr::V4(_) => None,
        })
        .unwrap_or(Ipv6Addr::UNSPECIFIED);
    payload.extend_from_slice(&encode_ipv4(ipv4));
    payload.extend_from_slice(&ipv6.octets());
    payload.extend_from_slice(&device.port.to_le_bytes());
    payload.extend_from_slice(device.name.as_bytes());
    payload
}

fn padded(text: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let len = text.len().min(16);
    out[..len].copy_from_slice(&text.as_bytes()[..len]);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn device() -> DiscoveredDevice {
        DiscoveredDevice {
            name: "zbnt-board".to_string(),
            version: Version {
                major: 1,
                minor: 2,
                patch: 3,
                prerelease: "rc1".to_string(),
                build: String::new(),
                dirty: false,
            },
            addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))],
            port: 5465,
        }
    }

    fn response(validator: u64, device: &DiscoveredDevice) -> Message {
        Message::new(MessageId::Discovery as u16, encode_response(validator, device))
    }

    #[test]
    fn request_layout() {
        let request = discovery_request(0x0102030405060708);
        assert_eq!(request.id, 1);
        assert_eq!(request.payload[..], [8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn response_fields() {
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
        let message = response(42, &device());
        // IPv4 octets are stored reversed.
        assert_eq!(message.payload[45..49], [10, 1, 168, 192]);
        assert_eq!(parse_response(42, source, &message), Some(device()));
    }

    #[test]
    fn foreign_responses_are_ignored() {
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(parse_response(43, source, &response(42, &device())), None);

        let spoofed = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(parse_response(42, spoofed, &response(42, &device())), None);

        let mut nameless = device();
        nameless.name.clear();
        assert_eq!(parse_response(42, source, &response(42, &nameless)), None);

        let mut unaddressed = device();
        unaddressed.addresses.clear();
        let unspecified = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        assert_eq!(parse_response(42, unspecified, &response(42, &unaddressed)), None);
    }

    #[test]
    fn version_strings() {
        let mut version = Version {
            major: 1,
            minor: 0,
            patch: 7,
            ..Version::default()
        };
        assert_eq!(version.to_string(), "1.0.7");
        version.dirty = true;
        assert_eq!(version.to_string(), "1.0.7+d");
        version.build = "abc123".to_string();
        assert_eq!(version.to_string(), "1.0.7+abc123.d");
        version.prerelease = "beta".to_string();
        version.dirty = false;
        assert_eq!(version.to_string(), "1.0.7-beta+abc123");
    }
}
