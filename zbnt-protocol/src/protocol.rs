use std::fmt::Display;

use bytes::Bytes;

use crate::encoding::read_u16;

/// Numeric ids of the messages exchanged with a device.
#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MessageId {
    Discovery = 1,
    Hello = 2,
    ProgramBitstream = 3,
    RunStart = 4,
    RunStop = 5,
    SetProperty = 6,
    GetProperty = 7,
    UserMessage = 8,
}

impl MessageId {
    /// Header id announcing an extended header, whose length field carries the real id.
    pub const EXTENDED: u16 = 0x7FFF;
    /// Set on every measurement message, the remaining bits hold the device id.
    pub const MEASUREMENT_FLAG: u16 = 0x8000;

    pub fn from_raw(id: u16) -> Option<MessageId> {
        Some(match id {
            1 => MessageId::Discovery,
            2 => MessageId::Hello,
            3 => MessageId::ProgramBitstream,
            4 => MessageId::RunStart,
            5 => MessageId::RunStop,
            6 => MessageId::SetProperty,
            7 => MessageId::GetProperty,
            8 => MessageId::UserMessage,
            _ => return None,
        })
    }
}

/// How the session layer should treat a message id.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageKind {
    Control(MessageId),
    Measurement { device_id: u16 },
    Unknown(u16),
}

/// Ids of device properties.
#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum PropertyId {
    Enable = 1,
    EnableLog,
    EnableBurst,
    EnableScript,
    EnablePattern,
    EnableBroadcast,
    TimerMode,
    TimerTime,
    TimerLimit,
    FrameSize,
    FrameGap,
    FramePadding,
    FrameTemplate,
    FramePattern,
    FrameScript,
    FrameScriptName,
    BurstTimeOn,
    BurstTimeOff,
    MacAddr,
    IpAddr,
    Timeout,
    OverflowCount,
    SamplePeriod,
    LfsrSeed,
    Reset,
    Ports,
    FeatureBits,
    NumScripts,
    MaxTemplateSize,
    MaxScriptSize,
    FifoSize,
    PhyAddr,
    ClockFreq,
}

impl PropertyId {
    const ALL: [PropertyId; 33] = [
        PropertyId::Enable,
        PropertyId::EnableLog,
        PropertyId::EnableBurst,
        PropertyId::EnableScript,
        PropertyId::EnablePattern,
        PropertyId::EnableBroadcast,
        PropertyId::TimerMode,
        PropertyId::TimerTime,
        PropertyId::TimerLimit,
        PropertyId::FrameSize,
        PropertyId::FrameGap,
        PropertyId::FramePadding,
        PropertyId::FrameTemplate,
        PropertyId::FramePattern,
        PropertyId::FrameScript,
        PropertyId::FrameScriptName,
        PropertyId::BurstTimeOn,
        PropertyId::BurstTimeOff,
        PropertyId::MacAddr,
        PropertyId::IpAddr,
        PropertyId::Timeout,
        PropertyId::OverflowCount,
        PropertyId::SamplePeriod,
        PropertyId::LfsrSeed,
        PropertyId::Reset,
        PropertyId::Ports,
        PropertyId::FeatureBits,
        PropertyId::NumScripts,
        PropertyId::MaxTemplateSize,
        PropertyId::MaxScriptSize,
        PropertyId::FifoSize,
        PropertyId::PhyAddr,
        PropertyId::ClockFreq,
    ];

    pub fn from_raw(id: u16) -> Option<PropertyId> {
        let index = usize::from(id).checked_sub(1)?;
        PropertyId::ALL.get(index).copied()
    }

    pub fn raw(self) -> u16 {
        self as u16
    }
}

impl Display for PropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[test]
fn property_ids_match_wire_values() {
    assert_eq!(PropertyId::Enable.raw(), 1);
    assert_eq!(PropertyId::FrameScript.raw(), 15);
    assert_eq!(PropertyId::ClockFreq.raw(), 33);
    for id in 1..=33 {
        assert_eq!(PropertyId::from_raw(id).map(PropertyId::raw), Some(id));
    }
    assert_eq!(PropertyId::from_raw(0), None);
    assert_eq!(PropertyId::from_raw(34), None);
}

/// A single protocol message: an id and an opaque payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub id: u16,
    pub payload: Bytes,
}

impl Message {
    pub fn new(id: u16, payload: impl Into<Bytes>) -> Message {
        Message {
            id,
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        if self.id & MessageId::MEASUREMENT_FLAG != 0 {
            MessageKind::Measurement {
                device_id: self.id & !MessageId::MEASUREMENT_FLAG,
            }
        } else {
            match MessageId::from_raw(self.id) {
                Some(id) => MessageKind::Control(id),
                None => MessageKind::Unknown(self.id),
            }
        }
    }

    /// The handshake message; must be the first message sent on a connection.
    pub fn hello() -> Message {
        Message::new(MessageId::Hello as u16, Bytes::new())
    }

    pub fn program_bitstream(name: &str) -> Message {
        Message::new(
            MessageId::ProgramBitstream as u16,
            name.as_bytes().to_vec(),
        )
    }

    pub fn run_start() -> Message {
        Message::new(MessageId::RunStart as u16, Bytes::new())
    }

    pub fn run_stop() -> Message {
        Message::new(MessageId::RunStop as u16, Bytes::new())
    }

    /// `device_id | property_id | value`, where `value` already holds any positional parameters.
    pub fn set_property(device_id: u8, property_id: u16, value: &[u8]) -> Message {
        Message::new(
            MessageId::SetProperty as u16,
            property_payload(device_id, property_id, value),
        )
    }

    /// `device_id | property_id | params`
    pub fn get_property(device_id: u8, property_id: u16, params: &[u8]) -> Message {
        Message::new(
            MessageId::GetProperty as u16,
            property_payload(device_id, property_id, params),
        )
    }
}

fn property_payload(device_id: u8, property_id: u16, rest: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(3 + rest.len());
    payload.push(device_id);
    payload.extend_from_slice(&property_id.to_le_bytes());
    payload.extend_from_slice(rest);
    payload
}

/// Parses the bitstream list carried by a HELLO response.
///
/// Returns `None` for payloads too short to be a valid response; empty names are skipped.
pub fn parse_hello(payload: &[u8]) -> Option<Vec<String>> {
    if payload.len() < 2 {
        return None;
    }
    let mut names = Vec::new();
    let mut rest = payload;
    while let Some(len) = read_u16(rest) {
        let len = len as usize;
        let Some(name) = rest.get(2..2 + len) else {
            log::warn!("Truncated bitstream name in HELLO response");
            break;
        };
        if !name.is_empty() {
            names.push(String::from_utf8_lossy(name).into_owned());
        }
        rest = &rest[2 + len..];
    }
    Some(names)
}

/// Response to a SetProperty or GetProperty request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PropertyResponse {
    pub device_id: u8,
    pub property_id: u16,
    pub success: bool,
    pub value: Bytes,
}

impl PropertyResponse {
    pub fn parse(payload: &Bytes) -> Option<PropertyResponse> {
        if payload.len() < 4 {
            return None;
        }
        Some(PropertyResponse {
            device_id: payload[0],
            property_id: read_u16(&payload[1..])?,
            success: payload[3] != 0,
            value: payload.slice(4..),
        })
    }

    /// Builds the response payload, as sent by a peer.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = property_payload(self.device_id, self.property_id, &[self.success as u8]);
        payload.extend_from_slice(&self.value);
        payload
    }
}
