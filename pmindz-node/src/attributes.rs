//! ZCL identifiers and wire encodings for everything the node
//! publishes. The scalings here are fixed by the gateway decoder and
//! must not change.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HA_PROFILE_ID: u16 = 0x0104;
pub const SIMPLE_SENSOR_DEVICE_ID: u16 = 0x000c;

pub mod cluster {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const IDENTIFY: u16 = 0x0003;
    pub const ON_OFF: u16 = 0x0006;
    pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
    pub const RELATIVE_HUMIDITY: u16 = 0x0405;
}

pub mod attr {
    pub const MANUFACTURER_NAME: u16 = 0x0004;
    pub const MODEL_IDENTIFIER: u16 = 0x0005;
    pub const POWER_SOURCE: u16 = 0x0007;
    pub const DEVICE_ENABLED: u16 = 0x0012;
    pub const BATTERY_VOLTAGE: u16 = 0x0020;
    pub const BATTERY_PERCENTAGE_REMAINING: u16 = 0x0021;
    pub const ON_OFF: u16 = 0x0000;
    pub const MEASURED_VALUE: u16 = 0x0000;
}

/// Clusters registered on the sensor endpoint
pub const SENSOR_CLUSTERS: [u16; 6] = [
    cluster::BASIC,
    cluster::POWER_CONFIG,
    cluster::IDENTIFY,
    cluster::ON_OFF,
    cluster::TEMPERATURE_MEASUREMENT,
    cluster::RELATIVE_HUMIDITY,
];

/// ZCL character strings are capped to fit in one payload
pub const MAX_STRING_LEN: usize = 32;
pub const MAX_VALUE_LEN: usize = MAX_STRING_LEN + 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeError {
    #[error("Value {0} does not fit the attribute encoding")]
    OutOfRange(i64),
    #[error("String longer than {MAX_STRING_LEN} bytes")]
    StringTooLong,
    #[error("Payload has {0} bytes, wrong size for the attribute type")]
    BadLength(usize),
    #[error("Encoded value exceeds {MAX_VALUE_LEN} bytes")]
    Capacity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    I16(i16),
    Enum8(u8),
    CharString(&'static str),
}

impl AttributeValue {
    /// Little endian ZCL encoding; strings are length prefixed
    pub fn encode(&self) -> Result<Vec<u8, MAX_VALUE_LEN>, AttributeError> {
        let mut out = Vec::new();
        match self {
            AttributeValue::Bool(b) => out.push(*b as u8).map_err(|_| AttributeError::Capacity)?,
            AttributeValue::U8(v) | AttributeValue::Enum8(v) => {
                out.push(*v).map_err(|_| AttributeError::Capacity)?
            }
            AttributeValue::U16(v) => out
                .extend_from_slice(&v.to_le_bytes())
                .map_err(|_| AttributeError::Capacity)?,
            AttributeValue::I16(v) => out
                .extend_from_slice(&v.to_le_bytes())
                .map_err(|_| AttributeError::Capacity)?,
            AttributeValue::CharString(s) => {
                if s.len() > MAX_STRING_LEN {
                    return Err(AttributeError::StringTooLong);
                }
                out.push(s.len() as u8)
                    .map_err(|_| AttributeError::Capacity)?;
                out.extend_from_slice(s.as_bytes())
                    .map_err(|_| AttributeError::StringTooLong)?;
            }
        }
        Ok(out)
    }
}

/// ZCL power source enumeration, basic cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerSource {
    Mains = 0x01,
    Battery = 0x03,
}

/// Endpoint schema registered with the stack at start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub clusters: &'static [u16],
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub power_source: PowerSource,
}

impl EndpointDescriptor {
    pub fn sensor(endpoint: u8, manufacturer: &'static str, model: &'static str) -> Self {
        Self {
            endpoint,
            profile_id: HA_PROFILE_ID,
            device_id: SIMPLE_SENSOR_DEVICE_ID,
            clusters: &SENSOR_CLUSTERS,
            manufacturer,
            model,
            power_source: PowerSource::Battery,
        }
    }

    /// Basic cluster identity attributes for this endpoint
    pub fn identity(&self) -> [(u16, u16, AttributeValue); 3] {
        [
            (
                cluster::BASIC,
                attr::MANUFACTURER_NAME,
                AttributeValue::CharString(self.manufacturer),
            ),
            (
                cluster::BASIC,
                attr::MODEL_IDENTIFIER,
                AttributeValue::CharString(self.model),
            ),
            (
                cluster::BASIC,
                attr::POWER_SOURCE,
                AttributeValue::Enum8(self.power_source as u8),
            ),
        ]
    }
}

/// Values written once at start so the gateway sees a sane device
/// before the first report
pub const INITIAL_ATTRIBUTES: [(u16, u16, AttributeValue); 3] = [
    (cluster::BASIC, attr::DEVICE_ENABLED, AttributeValue::Bool(true)),
    (
        cluster::POWER_CONFIG,
        attr::BATTERY_PERCENTAGE_REMAINING,
        AttributeValue::U8(0),
    ),
    (
        cluster::POWER_CONFIG,
        attr::BATTERY_VOLTAGE,
        AttributeValue::U8(0),
    ),
];

/// A published measurement and its fixed wire scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantity {
    /// percent, sent as half-percent units capped at 200
    BatteryPercentage,
    /// volts, sent as decivolts
    BatteryVoltage,
    /// percent, sent as hundredths capped at 10000
    SoilMoisture,
    /// celsius, sent as hundredths
    SoilTemperature,
}

impl Quantity {
    pub fn cluster(&self) -> u16 {
        match self {
            Quantity::BatteryPercentage | Quantity::BatteryVoltage => cluster::POWER_CONFIG,
            Quantity::SoilMoisture => cluster::RELATIVE_HUMIDITY,
            Quantity::SoilTemperature => cluster::TEMPERATURE_MEASUREMENT,
        }
    }

    pub fn attribute(&self) -> u16 {
        match self {
            Quantity::BatteryPercentage => attr::BATTERY_PERCENTAGE_REMAINING,
            Quantity::BatteryVoltage => attr::BATTERY_VOLTAGE,
            Quantity::SoilMoisture | Quantity::SoilTemperature => attr::MEASURED_VALUE,
        }
    }

    /// Scale to wire units, truncating toward zero
    pub fn encode(&self, value: f32) -> Result<AttributeValue, AttributeError> {
        match self {
            Quantity::BatteryPercentage => {
                let raw = ((value * 2.0) as u16).min(200);
                Ok(AttributeValue::U8(raw as u8))
            }
            Quantity::BatteryVoltage => {
                let raw = (value * 10.0) as u32;
                u8::try_from(raw)
                    .map(AttributeValue::U8)
                    .map_err(|_| AttributeError::OutOfRange(raw as i64))
            }
            Quantity::SoilMoisture => {
                let raw = ((value * 100.0) as u16).min(10000);
                Ok(AttributeValue::U16(raw))
            }
            Quantity::SoilTemperature => Ok(AttributeValue::I16((value * 100.0) as i16)),
        }
    }

    /// Gateway side: wire payload back to engineering units
    pub fn decode(&self, payload: &[u8]) -> Result<f32, AttributeError> {
        match self {
            Quantity::BatteryPercentage => match payload {
                [raw] => Ok(*raw as f32 / 2.0),
                _ => Err(AttributeError::BadLength(payload.len())),
            },
            Quantity::BatteryVoltage => match payload {
                [raw] => Ok(*raw as f32 / 10.0),
                _ => Err(AttributeError::BadLength(payload.len())),
            },
            Quantity::SoilMoisture => match payload {
                [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi]) as f32 / 100.0),
                _ => Err(AttributeError::BadLength(payload.len())),
            },
            Quantity::SoilTemperature => match payload {
                [lo, hi] => Ok(i16::from_le_bytes([*lo, *hi]) as f32 / 100.0),
                _ => Err(AttributeError::BadLength(payload.len())),
            },
        }
    }

    /// Map a (cluster, attribute) pair back to the quantity, if any
    pub fn lookup(cluster: u16, attribute: u16) -> Option<Self> {
        [
            Quantity::BatteryPercentage,
            Quantity::BatteryVoltage,
            Quantity::SoilMoisture,
            Quantity::SoilTemperature,
        ]
        .into_iter()
        .find(|q| q.cluster() == cluster && q.attribute() == attribute)
    }

    /// Smallest step representable on the wire
    pub fn resolution(&self) -> f32 {
        match self {
            Quantity::BatteryPercentage => 0.5,
            Quantity::BatteryVoltage => 0.1,
            Quantity::SoilMoisture | Quantity::SoilTemperature => 0.01,
        }
    }
}
