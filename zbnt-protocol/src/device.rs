//! Devices instantiated from the device tree sent after a bitstream is loaded.
use std::collections::BTreeMap;

use crate::{
    encoding::{read_u16, read_u32},
    error::ScriptError,
    protocol::PropertyId,
    script::{self, ScriptProgram},
};

/// Numeric device kind codes found in the device tree.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DeviceType {
    AxiDma = 1,
    AxiMdio = 2,
    DmaBuffer = 3,
    SimpleTimer = 4,
    FrameDetector = 5,
    StatsCollector = 6,
    LatencyMeasurer = 7,
    TrafficGenerator = 8,
}

impl DeviceType {
    pub fn from_code(code: u8) -> Option<DeviceType> {
        Some(match code {
            1 => DeviceType::AxiDma,
            2 => DeviceType::AxiMdio,
            3 => DeviceType::DmaBuffer,
            4 => DeviceType::SimpleTimer,
            5 => DeviceType::FrameDetector,
            6 => DeviceType::StatsCollector,
            7 => DeviceType::LatencyMeasurer,
            8 => DeviceType::TrafficGenerator,
            _ => return None,
        })
    }
}

/// Timer clock frequency assumed when the device tree does not report one.
pub const DEFAULT_CLOCK_FREQ: u32 = 125_000_000;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimerInfo {
    /// Clock frequency in Hz.
    pub freq: u32,
}

impl Default for TimerInfo {
    fn default() -> Self {
        TimerInfo {
            freq: DEFAULT_CLOCK_FREQ,
        }
    }
}

/// Feature flags reported by a frame detector.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FeatureBits(pub u32);

impl FeatureBits {
    pub const CMP_UNIT: u32 = 1;
    pub const EDIT_UNIT: u32 = 2;
    pub const CSUM_UNIT: u32 = 4;
    pub const FPU: u32 = 8;

    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag == flag
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameDetectorInfo {
    pub features: FeatureBits,
    pub num_scripts: u32,
    /// Number of slots of every script.
    pub max_script_size: u32,
    pub tx_fifo_size: u32,
    pub extr_fifo_size: u32,
}

impl FrameDetectorInfo {
    /// Compiles `source` for this detector's script size.
    pub fn compile_script(&self, source: &str) -> Result<ScriptProgram, ScriptError> {
        script::compile(source, self.max_script_size as usize)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrafficGeneratorInfo {
    pub max_template_size: u32,
}

/// The hardware unit behind a device, together with the fields derived from its
/// initial properties.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeviceKind {
    Mdio { phys: Vec<u8> },
    SimpleTimer(TimerInfo),
    FrameDetector(FrameDetectorInfo),
    StatsCollector,
    LatencyMeasurer,
    TrafficGenerator(TrafficGeneratorInfo),
    Generic(u8),
}

impl DeviceKind {
    /// Builds the kind for `code`, picking up derived fields from `props`.
    ///
    /// Unrecognized properties and values that are too short are ignored.
    pub fn from_properties(code: u8, props: &[(u16, &[u8])]) -> DeviceKind {
        let lookup = |id: PropertyId| {
            props
                .iter()
                .find(|(prop, _)| *prop == id.raw())
                .map(|(_, value)| *value)
        };
        let lookup_u32 = |id: PropertyId| lookup(id).and_then(read_u32);

        match DeviceType::from_code(code) {
            Some(DeviceType::AxiMdio) => DeviceKind::Mdio {
                phys: lookup(PropertyId::PhyAddr).unwrap_or_default().to_vec(),
            },
            Some(DeviceType::SimpleTimer) => DeviceKind::SimpleTimer(TimerInfo {
                freq: lookup_u32(PropertyId::ClockFreq).unwrap_or(DEFAULT_CLOCK_FREQ),
            }),
            Some(DeviceType::FrameDetector) => {
                let mut info = FrameDetectorInfo {
                    features: FeatureBits(lookup_u32(PropertyId::FeatureBits).unwrap_or_default()),
                    num_scripts: lookup_u32(PropertyId::NumScripts).unwrap_or_default(),
                    max_script_size: lookup_u32(PropertyId::MaxScriptSize).unwrap_or_default(),
                    ..Default::default()
                };
                if let Some(fifo) = lookup(PropertyId::FifoSize)
                    && fifo.len() >= 8
                {
                    info.tx_fifo_size = read_u32(fifo).unwrap_or_default();
                    info.extr_fifo_size = read_u32(&fifo[4..]).unwrap_or_default();
                }
                DeviceKind::FrameDetector(info)
            }
            Some(DeviceType::StatsCollector) => DeviceKind::StatsCollector,
            Some(DeviceType::LatencyMeasurer) => DeviceKind::LatencyMeasurer,
            Some(DeviceType::TrafficGenerator) => {
                DeviceKind::TrafficGenerator(TrafficGeneratorInfo {
                    max_template_size: lookup_u32(PropertyId::MaxTemplateSize).unwrap_or_default(),
                })
            }
            Some(DeviceType::AxiDma | DeviceType::DmaBuffer) | None => DeviceKind::Generic(code),
        }
    }

    /// The numeric kind code as found in the device tree.
    pub fn code(&self) -> u8 {
        match self {
            DeviceKind::Mdio { .. } => DeviceType::AxiMdio as u8,
            DeviceKind::SimpleTimer(_) => DeviceType::SimpleTimer as u8,
            DeviceKind::FrameDetector(_) => DeviceType::FrameDetector as u8,
            DeviceKind::StatsCollector => DeviceType::StatsCollector as u8,
            DeviceKind::LatencyMeasurer => DeviceType::LatencyMeasurer as u8,
            DeviceKind::TrafficGenerator(_) => DeviceType::TrafficGenerator as u8,
            DeviceKind::Generic(code) => *code,
        }
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        DeviceType::from_code(self.code())
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::Mdio { .. } => "AxiMdio",
            DeviceKind::SimpleTimer(_) => "SimpleTimer",
            DeviceKind::FrameDetector(_) => "FrameDetector",
            DeviceKind::StatsCollector => "StatsCollector",
            DeviceKind::LatencyMeasurer => "LatencyMeasurer",
            DeviceKind::TrafficGenerator(_) => "TrafficGenerator",
            DeviceKind::Generic(_) => "AxiDevice",
        }
    }
}

/// A device of the currently loaded bitstream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Device {
    id: u8,
    kind: DeviceKind,
    ports: Vec<u8>,
    generation: u64,
}

impl Device {
    pub fn new(id: u8, code: u8, props: &[(u16, &[u8])], generation: u64) -> Device {
        let ports = props
            .iter()
            .find(|(prop, _)| *prop == PropertyId::Ports.raw())
            .map(|(_, value)| value.to_vec())
            .unwrap_or_default();
        Device {
            id,
            kind: DeviceKind::from_properties(code, props),
            ports,
            generation,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn ports(&self) -> &[u8] {
        &self.ports
    }

    /// The device set this device belongs to. Devices from older generations are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(dev_id={}, ports={:?})",
            self.kind.name(),
            self.id,
            self.ports
        )
    }
}

/// All devices of one loaded bitstream. Replaced as a whole on every load.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceSet {
    generation: u64,
    devices: BTreeMap<u8, Device>,
}

impl DeviceSet {
    pub fn empty(generation: u64) -> DeviceSet {
        DeviceSet {
            generation,
            devices: BTreeMap::new(),
        }
    }

    /// Parses the device list of a device tree:
    /// `{device_id(1), kind(1), props_len(2), {property_id(2), value_len(2), value}*}*`.
    ///
    /// Parsing stops at the first truncated entry.
    pub fn parse(tree: &[u8], generation: u64) -> DeviceSet {
        let mut set = DeviceSet::empty(generation);
        let mut rest = tree;
        while rest.len() >= 4 {
            let (id, code) = (rest[0], rest[1]);
            let props_len = read_u16(&rest[2..]).unwrap_or_default() as usize;
            let Some(props_bytes) = rest.get(4..4 + props_len) else {
                log::warn!("Truncated device tree entry for device {}", id);
                break;
            };
            let props = parse_properties(props_bytes);
            let device = Device::new(id, code, &props, generation);
            log::debug!("Found device {}", device);
            set.devices.insert(id, device);
            rest = &rest[4 + props_len..];
        }
        set
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, id: u8) -> Option<&Device> {
        self.devices.get(&id)
    }

    /// Finds a device of the given type attached to exactly the given ports, in any order.
    pub fn find(&self, device_type: DeviceType, ports: &[u8]) -> Option<&Device> {
        let mut wanted = ports.to_vec();
        wanted.sort_unstable();
        wanted.dedup();
        self.devices.values().find(|device| {
            let mut have = device.ports.clone();
            have.sort_unstable();
            have.dedup();
            device.kind.device_type() == Some(device_type) && have == wanted
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn parse_properties(mut bytes: &[u8]) -> Vec<(u16, &[u8])> {
    let mut props = Vec::new();
    while bytes.len() >= 4 {
        let id = read_u16(bytes).unwrap_or_default();
        let len = read_u16(&bytes[2..]).unwrap_or_default() as usize;
        let Some(value) = bytes.get(4..4 + len) else {
            break;
        };
        props.push((id, value));
        bytes = &bytes[4 + len..];
    }
    props
}

/// Response to a bitstream load: `success(1) | name_len(2) | name | device tree`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BitstreamResponse {
    pub success: bool,
    pub active_name: String,
    pub devices: DeviceSet,
}

impl BitstreamResponse {
    pub fn parse(payload: &[u8], generation: u64) -> Option<BitstreamResponse> {
        if payload.len() < 3 {
            return None;
        }
        let name_len = read_u16(&payload[1..])? as usize;
        let name = payload.get(3..3 + name_len)?;
        Some(BitstreamResponse {
            success: payload[0] != 0,
            active_name: String::from_utf8_lossy(name).into_owned(),
            devices: DeviceSet::parse(&payload[3 + name_len..], generation),
        })
    }
}

/// Writes one device tree entry, as sent by a peer.
pub fn encode_device_entry(out: &mut Vec<u8>, id: u8, code: u8, props: &[(u16, &[u8])]) {
    let mut props_bytes = Vec::new();
    for (prop, value) in props {
        props_bytes.extend_from_slice(&prop.to_le_bytes());
        props_bytes.extend_from_slice(&(value.len() as u16).to_le_bytes());
        props_bytes.extend_from_slice(value);
    }
    out.push(id);
    out.push(code);
    out.extend_from_slice(&(props_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(&props_bytes);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stats_collector_without_properties() {
        let mut tree = Vec::new();
        encode_device_entry(&mut tree, 3, DeviceType::StatsCollector as u8, &[]);
        let set = DeviceSet::parse(&tree, 1);
        assert_eq!(set.len(), 1);
        let device = set.get(3).unwrap();
        assert_eq!(device.kind(), &DeviceKind::StatsCollector);
        assert!(device.ports().is_empty());
        assert_eq!(device.generation(), 1);
    }

    #[test]
    fn derived_fields() {
        let freq = 100_000_000u32.to_le_bytes();
        let features = 0b1011u32.to_le_bytes();
        let script_size = 64u32.to_le_bytes();
        let mut fifo = 2048u32.to_le_bytes().to_vec();
        fifo.extend_from_slice(&1024u32.to_le_bytes());

        let mut tree = Vec::new();
        encode_device_entry(&mut tree, 0, 4, &[(PropertyId::ClockFreq.raw(), &freq[..])]);
        encode_device_entry(
            &mut tree,
            1,
            5,
            &[
                (PropertyId::Ports.raw(), &[2, 3][..]),
                (PropertyId::FeatureBits.raw(), &features[..]),
                (PropertyId::MaxScriptSize.raw(), &script_size[..]),
                (PropertyId::FifoSize.raw(), &fifo[..]),
                (999, &[1, 2, 3][..]),
            ],
        );
        encode_device_entry(&mut tree, 2, 2, &[(PropertyId::PhyAddr.raw(), &[1, 4][..])]);
        encode_device_entry(&mut tree, 9, 42, &[]);

        let set = DeviceSet::parse(&tree, 7);
        assert_eq!(
            set.get(0).unwrap().kind(),
            &DeviceKind::SimpleTimer(TimerInfo { freq: 100_000_000 })
        );
        match set.get(1).unwrap().kind() {
            DeviceKind::FrameDetector(info) => {
                assert!(info.features.contains(FeatureBits::CMP_UNIT));
                assert!(info.features.contains(FeatureBits::FPU));
                assert!(!info.features.contains(FeatureBits::CSUM_UNIT));
                assert_eq!(info.max_script_size, 64);
                assert_eq!(info.tx_fifo_size, 2048);
                assert_eq!(info.extr_fifo_size, 1024);
            }
            other => panic!("expected frame detector, got {other:?}"),
        }
        assert_eq!(set.get(1).unwrap().ports(), &[2, 3]);
        assert_eq!(
            set.get(2).unwrap().kind(),
            &DeviceKind::Mdio { phys: vec![1, 4] }
        );
        assert_eq!(set.get(9).unwrap().kind(), &DeviceKind::Generic(42));
    }

    #[test]
    fn short_values_keep_defaults() {
        let mut tree = Vec::new();
        encode_device_entry(&mut tree, 0, 4, &[(PropertyId::ClockFreq.raw(), &[1, 2][..])]);
        let set = DeviceSet::parse(&tree, 0);
        assert_eq!(
            set.get(0).unwrap().kind(),
            &DeviceKind::SimpleTimer(TimerInfo::default())
        );
    }

    #[test]
    fn find_matches_ports_as_a_set() {
        let mut tree = Vec::new();
        encode_device_entry(&mut tree, 1, 8, &[(PropertyId::Ports.raw(), &[0][..])]);
        encode_device_entry(&mut tree, 2, 8, &[(PropertyId::Ports.raw(), &[1][..])]);
        encode_device_entry(&mut tree, 3, 7, &[(PropertyId::Ports.raw(), &[3, 2][..])]);
        let set = DeviceSet::parse(&tree, 0);
        assert_eq!(set.find(DeviceType::TrafficGenerator, &[1]).map(Device::id), Some(2));
        assert_eq!(set.find(DeviceType::LatencyMeasurer, &[2, 3]).map(Device::id), Some(3));
        assert!(set.find(DeviceType::StatsCollector, &[0]).is_none());
    }

    #[test]
    fn truncated_tree_keeps_complete_entries() {
        let mut tree = Vec::new();
        encode_device_entry(&mut tree, 1, 6, &[]);
        encode_device_entry(&mut tree, 2, 6, &[(PropertyId::Ports.raw(), &[0][..])]);
        tree.truncate(tree.len() - 2);
        let set = DeviceSet::parse(&tree, 0);
        assert_eq!(set.len(), 1);
        assert!(set.get(1).is_some());
    }

    #[test]
    fn bitstream_response() {
        let mut payload = vec![1];
        payload.extend_from_slice(&11u16.to_le_bytes());
        payload.extend_from_slice(b"simple_demo");
        encode_device_entry(&mut payload, 3, 6, &[]);
        let response = BitstreamResponse::parse(&payload, 2).unwrap();
        assert!(response.success);
        assert_eq!(response.active_name, "simple_demo");
        assert_eq!(response.devices.len(), 1);
        assert_eq!(response.devices.generation(), 2);
        assert!(BitstreamResponse::parse(&[1, 0], 0).is_none());
    }
}
