//! Per device kind property schemas and the payloads built from them.
use crate::{
    device::{Device, DeviceKind},
    encoding::{PropertyValue, ValueCodec},
    error::PropertyError,
    protocol::PropertyId,
};

/// How a property is read and written.
///
/// A missing encoder makes the property read-only, a missing decoder write-only.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PropertySpec {
    pub encoder: Option<ValueCodec>,
    pub decoder: Option<ValueCodec>,
    /// Positional parameters, serialized in order ahead of the value.
    pub params: &'static [(&'static str, ValueCodec)],
}

impl PropertySpec {
    const fn read_write(codec: ValueCodec) -> PropertySpec {
        PropertySpec {
            encoder: Some(codec),
            decoder: Some(codec),
            params: &[],
        }
    }

    const fn read_only(codec: ValueCodec) -> PropertySpec {
        PropertySpec {
            encoder: None,
            decoder: Some(codec),
            params: &[],
        }
    }

    const fn write_only(codec: ValueCodec) -> PropertySpec {
        PropertySpec {
            encoder: Some(codec),
            decoder: None,
            params: &[],
        }
    }

    const fn indexed(self) -> PropertySpec {
        PropertySpec {
            params: INDEX_PARAM,
            ..self
        }
    }

    /// Length of the parameter prefix echoed back in a GetProperty response.
    pub fn params_size(&self) -> usize {
        self.params
            .iter()
            .map(|(_, codec)| codec.fixed_size().unwrap_or(0))
            .sum()
    }
}

const INDEX_PARAM: &[(&str, ValueCodec)] = &[("index", ValueCodec::U8)];

use PropertyId as P;
use ValueCodec as C;

const TIMER_SCHEMA: &[(PropertyId, PropertySpec)] = &[
    (P::Enable, PropertySpec::read_write(C::Bool)),
    (P::TimerMode, PropertySpec::read_write(C::U8)),
    (P::TimerLimit, PropertySpec::read_write(C::U64)),
    (P::TimerTime, PropertySpec::read_only(C::U64)),
];

const FRAME_DETECTOR_SCHEMA: &[(PropertyId, PropertySpec)] = &[
    (P::Enable, PropertySpec::read_write(C::Bool)),
    (P::EnableLog, PropertySpec::read_write(C::Bool)),
    (P::EnableScript, PropertySpec::read_write(C::U8)),
    (P::FrameScript, PropertySpec::write_only(C::Bytes).indexed()),
    (P::FrameScriptName, PropertySpec::read_write(C::Text).indexed()),
    (P::OverflowCount, PropertySpec::read_only(C::CounterPair)),
];

const STATS_COLLECTOR_SCHEMA: &[(PropertyId, PropertySpec)] = &[
    (P::Enable, PropertySpec::read_write(C::Bool)),
    (P::EnableLog, PropertySpec::read_write(C::Bool)),
    (P::SamplePeriod, PropertySpec::read_write(C::U32)),
    (P::OverflowCount, PropertySpec::read_only(C::U64)),
    (P::Reset, PropertySpec::write_only(C::Bool)),
];

const LATENCY_MEASURER_SCHEMA: &[(PropertyId, PropertySpec)] = &[
    (P::Enable, PropertySpec::read_write(C::Bool)),
    (P::EnableLog, PropertySpec::read_write(C::Bool)),
    (P::EnableBroadcast, PropertySpec::read_write(C::Bool)),
    (P::MacAddr, PropertySpec::read_write(C::Mac).indexed()),
    (P::IpAddr, PropertySpec::read_write(C::Ipv4).indexed()),
    (P::FramePadding, PropertySpec::read_write(C::U16)),
    (P::FrameGap, PropertySpec::read_write(C::U32)),
    (P::Timeout, PropertySpec::read_write(C::U32)),
    (P::OverflowCount, PropertySpec::read_only(C::U64)),
];

const TRAFFIC_GENERATOR_SCHEMA: &[(PropertyId, PropertySpec)] = &[
    (P::Enable, PropertySpec::read_write(C::Bool)),
    (P::EnableBurst, PropertySpec::read_write(C::Bool)),
    (P::EnablePattern, PropertySpec::read_write(C::Bool)),
    (P::FrameSize, PropertySpec::read_write(C::U16)),
    (P::FrameGap, PropertySpec::read_write(C::U32)),
    (P::BurstTimeOn, PropertySpec::read_write(C::U16)),
    (P::BurstTimeOff, PropertySpec::read_write(C::U16)),
    (P::LfsrSeed, PropertySpec::read_write(C::U8)),
    (P::FrameTemplate, PropertySpec::read_write(C::Bytes)),
    (P::FramePattern, PropertySpec::read_write(C::Bytes)),
];

impl DeviceKind {
    /// Every property accessible on this kind of device.
    pub fn schema(&self) -> &'static [(PropertyId, PropertySpec)] {
        match self {
            DeviceKind::SimpleTimer(_) => TIMER_SCHEMA,
            DeviceKind::FrameDetector(_) => FRAME_DETECTOR_SCHEMA,
            DeviceKind::StatsCollector => STATS_COLLECTOR_SCHEMA,
            DeviceKind::LatencyMeasurer => LATENCY_MEASURER_SCHEMA,
            DeviceKind::TrafficGenerator(_) => TRAFFIC_GENERATOR_SCHEMA,
            DeviceKind::Mdio { .. } | DeviceKind::Generic(_) => &[],
        }
    }

    pub fn property(&self, id: PropertyId) -> Result<&'static PropertySpec, PropertyError> {
        self.schema()
            .iter()
            .find(|(prop, _)| *prop == id)
            .map(|(_, spec)| spec)
            .ok_or(PropertyError::UnknownProperty {
                property: id.raw(),
                device: self.name(),
            })
    }
}

/// Named positional parameters of a property access.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params(Vec<(String, PropertyValue)>);

impl Params {
    pub fn new() -> Params {
        Params::default()
    }

    /// Shorthand for the common single `index` parameter.
    pub fn index(index: u8) -> Params {
        Params::new().with("index", index)
    }

    pub fn with(mut self, name: &str, value: impl Into<PropertyValue>) -> Params {
        self.0.push((name.to_string(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn encode(&self, id: PropertyId, spec: &PropertySpec) -> Result<Vec<u8>, PropertyError> {
        let mut out = Vec::new();
        for (name, codec) in spec.params {
            let value = self
                .get(name)
                .ok_or_else(|| PropertyError::MissingParameter(name.to_string()))?;
            out.extend(codec.encode(id.raw(), value)?);
        }
        Ok(out)
    }
}

impl Device {
    /// Builds the value part of a SetProperty request: parameters followed by the value.
    pub fn encode_set(
        &self,
        id: PropertyId,
        value: &PropertyValue,
        params: &Params,
    ) -> Result<Vec<u8>, PropertyError> {
        let spec = self.kind().property(id)?;
        let encoder = spec.encoder.ok_or(PropertyError::WriteNotSupported(id.raw()))?;
        let mut out = params.encode(id, spec)?;
        out.extend(encoder.encode(id.raw(), value)?);
        Ok(out)
    }

    /// Builds the parameter part of a GetProperty request.
    pub fn encode_get(&self, id: PropertyId, params: &Params) -> Result<Vec<u8>, PropertyError> {
        let spec = self.kind().property(id)?;
        if spec.decoder.is_none() {
            return Err(PropertyError::ReadNotSupported(id.raw()));
        }
        params.encode(id, spec)
    }

    /// Decodes a GetProperty response value, skipping the echoed parameters.
    pub fn decode_get(&self, id: PropertyId, value: &[u8]) -> Result<PropertyValue, PropertyError> {
        let spec = self.kind().property(id)?;
        let decoder = spec.decoder.ok_or(PropertyError::ReadNotSupported(id.raw()))?;
        let skip = spec.params_size();
        let Some(value) = value.get(skip..) else {
            return Err(PropertyError::Truncated {
                expected: skip,
                got: value.len(),
            });
        };
        decoder.decode(value)
    }
}
