//! Fixed-width little-endian primitives and the textual address forms used by device properties.
use std::{fmt::Display, net::Ipv4Addr, str::FromStr};

use crate::error::{AddressParseError, PropertyError};

/// A fixed-width number with a little-endian wire form.
pub trait LittleEndian: Sized + Copy {
    const SIZE: usize;

    fn to_le_vec(self) -> Vec<u8>;

    /// Reads a value from the start of `bytes`, `None` if there are too few.
    fn read_le(bytes: &[u8]) -> Option<Self>;
}

macro_rules! little_endian {
    ($($ty:ty),* $(,)?) => {
        $(impl LittleEndian for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn to_le_vec(self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }

            fn read_le(bytes: &[u8]) -> Option<Self> {
                Some(<$ty>::from_le_bytes(bytes.get(..Self::SIZE)?.try_into().ok()?))
            }
        })*
    };
}

little_endian!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

pub fn read_u16(bytes: &[u8]) -> Option<u16> {
    u16::read_le(bytes)
}

pub fn read_u32(bytes: &[u8]) -> Option<u32> {
    u32::read_le(bytes)
}

pub fn read_u64(bytes: &[u8]) -> Option<u64> {
    u64::read_le(bytes)
}

/// Reads a little-endian `u64` at `offset`. Callers check the length beforehand.
pub(crate) fn u64_at(bytes: &[u8], offset: usize) -> u64 {
    read_u64(&bytes[offset..]).unwrap_or_default()
}

pub(crate) fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    read_u32(&bytes[offset..]).unwrap_or_default()
}

/// An Ethernet hardware address.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> MacAddr {
        MacAddr(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(value: [u8; 6]) -> Self {
        MacAddr(value)
    }
}

impl FromStr for MacAddr {
    type Err = AddressParseError;

    /// Parses `AA:BB:CC:DD:EE:FF`, also accepting `-` as separator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| AddressParseError(s.to_string()))?;
            if part.len() != 2 {
                return Err(AddressParseError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| AddressParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AddressParseError(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// IPv4 addresses travel as the little-endian form of their numeric value,
/// i.e. with the octets reversed.
pub fn encode_ipv4(addr: Ipv4Addr) -> [u8; 4] {
    u32::from(addr).to_le_bytes()
}

pub fn decode_ipv4(bytes: &[u8]) -> Option<Ipv4Addr> {
    read_u32(bytes).map(Ipv4Addr::from)
}

/// Wire codec of a single property value or parameter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueCodec {
    Bool,
    U8,
    U16,
    U32,
    U64,
    Mac,
    Ipv4,
    Bytes,
    Text,
    /// Two consecutive `u64` counters, e.g. per-direction overflow counts.
    CounterPair,
}

impl ValueCodec {
    /// Encoded size for fixed-width codecs.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            ValueCodec::Bool | ValueCodec::U8 => Some(1),
            ValueCodec::U16 => Some(2),
            ValueCodec::U32 | ValueCodec::Ipv4 => Some(4),
            ValueCodec::U64 => Some(8),
            ValueCodec::Mac => Some(6),
            ValueCodec::CounterPair => Some(16),
            ValueCodec::Bytes | ValueCodec::Text => None,
        }
    }

    fn max_integer(&self) -> Option<u64> {
        match self {
            ValueCodec::U8 => Some(u8::MAX as u64),
            ValueCodec::U16 => Some(u16::MAX as u64),
            ValueCodec::U32 => Some(u32::MAX as u64),
            ValueCodec::U64 => Some(u64::MAX),
            _ => None,
        }
    }

    /// Serializes `value`, checking that it has the shape this codec expects.
    pub fn encode(&self, property: u16, value: &PropertyValue) -> Result<Vec<u8>, PropertyError> {
        let mismatch = || PropertyError::TypeMismatch {
            property,
            expected: *self,
        };
        match (self, value) {
            (ValueCodec::Bool, PropertyValue::Bool(b)) => Ok(vec![*b as u8]),
            (ValueCodec::Bool, other) => match other.as_integer() {
                Some(n) => Ok(vec![(n != 0) as u8]),
                None => Err(mismatch()),
            },
            (ValueCodec::U8 | ValueCodec::U16 | ValueCodec::U32 | ValueCodec::U64, other) => {
                let n = other.as_integer().ok_or_else(mismatch)?;
                let max = self.max_integer().unwrap_or(u64::MAX);
                if n > max {
                    return Err(PropertyError::OutOfRange { property, value: n });
                }
                let width = self.fixed_size().unwrap_or(8);
                Ok(n.to_le_bytes()[..width].to_vec())
            }
            (ValueCodec::Mac, PropertyValue::Mac(mac)) => Ok(mac.octets().to_vec()),
            (ValueCodec::Mac, PropertyValue::Text(text)) => text
                .parse::<MacAddr>()
                .map(|mac| mac.octets().to_vec())
                .map_err(|_| mismatch()),
            (ValueCodec::Ipv4, PropertyValue::Ipv4(addr)) => Ok(encode_ipv4(*addr).to_vec()),
            (ValueCodec::Ipv4, PropertyValue::Text(text)) => text
                .parse::<Ipv4Addr>()
                .map(|addr| encode_ipv4(addr).to_vec())
                .map_err(|_| mismatch()),
            (ValueCodec::Bytes, PropertyValue::Bytes(bytes)) => Ok(bytes.clone()),
            (ValueCodec::Text, PropertyValue::Text(text)) => Ok(text.as_bytes().to_vec()),
            (ValueCodec::CounterPair, PropertyValue::CounterPair(a, b)) => {
                let mut out = a.to_le_bytes().to_vec();
                out.extend_from_slice(&b.to_le_bytes());
                Ok(out)
            }
            _ => Err(mismatch()),
        }
    }

    /// Parses a value from its wire form. Trailing bytes are ignored.
    pub fn decode(&self, bytes: &[u8]) -> Result<PropertyValue, PropertyError> {
        if let Some(size) = self.fixed_size()
            && bytes.len() < size
        {
            return Err(PropertyError::Truncated {
                expected: size,
                got: bytes.len(),
            });
        }
        Ok(match self {
            ValueCodec::Bool => PropertyValue::Bool(bytes[0] != 0),
            ValueCodec::U8 => PropertyValue::U8(bytes[0]),
            ValueCodec::U16 => PropertyValue::U16(read_u16(bytes).unwrap_or_default()),
            ValueCodec::U32 => PropertyValue::U32(read_u32(bytes).unwrap_or_default()),
            ValueCodec::U64 => PropertyValue::U64(read_u64(bytes).unwrap_or_default()),
            ValueCodec::Mac => {
                let mut octets = [0u8; 6];
                octets.copy_from_slice(&bytes[..6]);
                PropertyValue::Mac(MacAddr(octets))
            }
            ValueCodec::Ipv4 => PropertyValue::Ipv4(decode_ipv4(bytes).unwrap_or(Ipv4Addr::UNSPECIFIED)),
            ValueCodec::Bytes => PropertyValue::Bytes(bytes.to_vec()),
            ValueCodec::Text => PropertyValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueCodec::CounterPair => PropertyValue::CounterPair(u64_at(bytes, 0), u64_at(bytes, 8)),
        })
    }
}

/// A decoded (or to-be-encoded) property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Mac(MacAddr),
    Ipv4(Ipv4Addr),
    Bytes(Vec<u8>),
    Text(String),
    CounterPair(u64, u64),
}

impl PropertyValue {
    /// The value as an unsigned integer, for any of the integer-like variants.
    pub fn as_integer(&self) -> Option<u64> {
        match self {
            PropertyValue::Bool(b) => Some(*b as u64),
            PropertyValue::U8(n) => Some(*n as u64),
            PropertyValue::U16(n) => Some(*n as u64),
            PropertyValue::U32(n) => Some(*n as u64),
            PropertyValue::U64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            other => other.as_integer().map(|n| n != 0),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for PropertyValue {
            fn from(value: $ty) -> Self {
                PropertyValue::$variant(value)
            }
        })*
    };
}

value_from! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    MacAddr => Mac,
    Ipv4Addr => Ipv4,
    Vec<u8> => Bytes,
    String => Text,
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<&[u8]> for PropertyValue {
    fn from(value: &[u8]) -> Self {
        PropertyValue::Bytes(value.to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integer_codecs_round_trip() {
        let cases = [
            (ValueCodec::U8, PropertyValue::U8(0xAB)),
            (ValueCodec::U16, PropertyValue::U16(0xBEEF)),
            (ValueCodec::U32, PropertyValue::U32(12_500_000)),
            (ValueCodec::U64, PropertyValue::U64(u64::MAX - 7)),
            (ValueCodec::Bool, PropertyValue::Bool(true)),
        ];
        for (codec, value) in cases {
            let bytes = codec.encode(1, &value).unwrap();
            assert_eq!(bytes.len(), codec.fixed_size().unwrap());
            assert_eq!(codec.decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn primitives_round_trip() {
        fn check<T: LittleEndian + PartialEq + std::fmt::Debug>(value: T) {
            let bytes = value.to_le_vec();
            assert_eq!(bytes.len(), T::SIZE);
            assert_eq!(T::read_le(&bytes), Some(value));
            assert_eq!(T::read_le(&bytes[..T::SIZE - 1]), None);
        }
        check(0xABu8);
        check(0xBEEFu16);
        check(0xDEAD_BEEFu32);
        check(u64::MAX - 1);
        check(-5i8);
        check(i16::MIN);
        check(-100_000i32);
        check(i64::MIN + 3);
        check(-1.5f32);
        check(std::f64::consts::PI);
        assert_eq!((-2i16).to_le_vec(), [0xFE, 0xFF]);
    }

    #[test]
    fn integers_are_little_endian() {
        let bytes = ValueCodec::U32.encode(11, &PropertyValue::U32(0x1234_5678)).unwrap();
        assert_eq!(bytes, [0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn signed_values_use_twos_complement() {
        let bytes = ValueCodec::U16.encode(1, &PropertyValue::U16((-2i16) as u16)).unwrap();
        assert_eq!(bytes, [0xFE, 0xFF]);
        match ValueCodec::U16.decode(&bytes).unwrap() {
            PropertyValue::U16(raw) => assert_eq!(raw as i16, -2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wider_integers_are_range_checked() {
        match ValueCodec::U8.encode(24, &PropertyValue::U32(256)) {
            Err(PropertyError::OutOfRange { property: 24, value: 256 }) => {}
            other => panic!("expected OutOfRange, got {other:?}"),
        }
        assert_eq!(
            ValueCodec::U16.encode(10, &PropertyValue::U64(1500)).unwrap(),
            [0xDC, 0x05]
        );
    }

    #[test]
    fn mac_text_round_trip() {
        let mac: MacAddr = "9A:B1:2B:CF:93:02".parse().unwrap();
        assert_eq!(mac.octets(), [0x9A, 0xB1, 0x2B, 0xCF, 0x93, 0x02]);
        assert_eq!(mac.to_string(), "9A:B1:2B:CF:93:02");
        assert!("9A:B1:2B:CF:93".parse::<MacAddr>().is_err());
        assert!("9A:B1:2B:CF:93:02:11".parse::<MacAddr>().is_err());
        assert!("9A:B1:2B:CF:93:ZZ".parse::<MacAddr>().is_err());
    }

    #[test]
    fn ipv4_octets_are_reversed() {
        let addr = Ipv4Addr::new(192, 168, 111, 102);
        assert_eq!(encode_ipv4(addr), [102, 111, 168, 192]);
        assert_eq!(decode_ipv4(&[102, 111, 168, 192]), Some(addr));
        let bytes = ValueCodec::Ipv4
            .encode(20, &PropertyValue::from("192.168.111.102"))
            .unwrap();
        assert_eq!(ValueCodec::Ipv4.decode(&bytes).unwrap(), PropertyValue::Ipv4(addr));
    }

    #[test]
    fn decode_reports_truncation() {
        match ValueCodec::U64.decode(&[1, 2, 3]) {
            Err(PropertyError::Truncated { expected: 8, got: 3 }) => {}
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn counter_pair_decodes_both_halves() {
        let mut bytes = 3u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&9u64.to_le_bytes());
        assert_eq!(
            ValueCodec::CounterPair.decode(&bytes).unwrap(),
            PropertyValue::CounterPair(3, 9)
        );
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        assert!(matches!(
            ValueCodec::Mac.encode(19, &PropertyValue::U32(1)),
            Err(PropertyError::TypeMismatch { property: 19, expected: ValueCodec::Mac })
        ));
        assert!(matches!(
            ValueCodec::U32.encode(11, &PropertyValue::from("fast")),
            Err(PropertyError::TypeMismatch { .. })
        ));
    }
}
