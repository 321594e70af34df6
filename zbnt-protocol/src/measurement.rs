//! Telemetry pushed by devices while a run is active.
use crate::{
    device::DeviceKind,
    encoding::{u32_at, u64_at},
};

/// Traffic counters of one port, sampled by a stats collector.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Statistics {
    pub time: u64,
    pub tx_bytes: u64,
    pub tx_good: u64,
    pub tx_bad: u64,
    pub rx_bytes: u64,
    pub rx_good: u64,
    pub rx_bad: u64,
}

/// Result of one ping/pong exchange of a latency measurer. Times are in clock cycles.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LatencySample {
    pub time: u64,
    pub last_ping: u32,
    pub last_pong: u32,
    pub num_ping_pongs: u64,
    pub num_lost_pings: u64,
    pub num_lost_pongs: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    AToB,
    BToA,
}

/// A frame that matched one of the scripts of a frame detector.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameMatch {
    pub time: u64,
    pub number: u64,
    /// One bit per script that matched.
    pub match_mask: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl FrameMatch {
    pub fn direction(&self) -> Direction {
        if self.flags & 1 == 0 {
            Direction::AToB
        } else {
            Direction::BToA
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Measurement {
    Statistics(Statistics),
    Latency(LatencySample),
    FrameMatch(FrameMatch),
}

impl DeviceKind {
    /// Smallest measurement payload this kind produces, `None` if it produces none.
    pub fn min_measurement_size(&self) -> Option<usize> {
        match self {
            DeviceKind::StatsCollector => Some(56),
            DeviceKind::LatencyMeasurer => Some(40),
            DeviceKind::FrameDetector(_) => Some(18),
            _ => None,
        }
    }

    /// Decodes a measurement payload. Undersized payloads are discarded.
    pub fn decode_measurement(&self, data: &[u8]) -> Option<Measurement> {
        if data.len() < self.min_measurement_size()? {
            return None;
        }
        Some(match self {
            DeviceKind::StatsCollector => Measurement::Statistics(Statistics {
                time: u64_at(data, 0),
                tx_bytes: u64_at(data, 8),
                tx_good: u64_at(data, 16),
                tx_bad: u64_at(data, 24),
                rx_bytes: u64_at(data, 32),
                rx_good: u64_at(data, 40),
                rx_bad: u64_at(data, 48),
            }),
            DeviceKind::LatencyMeasurer => Measurement::Latency(LatencySample {
                time: u64_at(data, 0),
                last_ping: u32_at(data, 8),
                last_pong: u32_at(data, 12),
                num_ping_pongs: u64_at(data, 16),
                num_lost_pings: u64_at(data, 24),
                num_lost_pongs: u64_at(data, 32),
            }),
            DeviceKind::FrameDetector(_) => Measurement::FrameMatch(FrameMatch {
                time: u64_at(data, 0),
                number: u64_at(data, 8),
                match_mask: data[16],
                flags: data[17],
                payload: data[18..].to_vec(),
            }),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::FrameDetectorInfo;

    fn words(values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn statistics_field_offsets() {
        let data = words(&[1000, 1, 2, 3, 4, 5, 6]);
        assert_eq!(
            DeviceKind::StatsCollector.decode_measurement(&data),
            Some(Measurement::Statistics(Statistics {
                time: 1000,
                tx_bytes: 1,
                tx_good: 2,
                tx_bad: 3,
                rx_bytes: 4,
                rx_good: 5,
                rx_bad: 6,
            }))
        );
    }

    #[test]
    fn latency_field_offsets() {
        let mut data = 77u64.to_le_bytes().to_vec();
        data.extend_from_slice(&120u32.to_le_bytes());
        data.extend_from_slice(&130u32.to_le_bytes());
        data.extend(words(&[10, 2, 1]));
        assert_eq!(
            DeviceKind::LatencyMeasurer.decode_measurement(&data),
            Some(Measurement::Latency(LatencySample {
                time: 77,
                last_ping: 120,
                last_pong: 130,
                num_ping_pongs: 10,
                num_lost_pings: 2,
                num_lost_pongs: 1,
            }))
        );
    }

    #[test]
    fn frame_match_carries_the_frame() {
        let mut data = words(&[5, 9]);
        data.extend_from_slice(&[0b10, 1, 0xAA, 0xBB]);
        let kind = DeviceKind::FrameDetector(FrameDetectorInfo::default());
        match kind.decode_measurement(&data) {
            Some(Measurement::FrameMatch(m)) => {
                assert_eq!(m.number, 9);
                assert_eq!(m.match_mask, 0b10);
                assert_eq!(m.direction(), Direction::BToA);
                assert_eq!(m.payload, [0xAA, 0xBB]);
            }
            other => panic!("expected frame match, got {other:?}"),
        }
    }

    #[test]
    fn undersized_and_silent_kinds_are_discarded() {
        assert_eq!(DeviceKind::StatsCollector.decode_measurement(&[0; 55]), None);
        assert_eq!(DeviceKind::Generic(1).decode_measurement(&[0; 64]), None);
        assert_eq!(DeviceKind::LatencyMeasurer.decode_measurement(&[]), None);
    }
}
