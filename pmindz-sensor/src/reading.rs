use serde::{Deserialize, Serialize};

/// One soil measurement. `temperature_c`/`temperature_f` are only
/// meaningful when `temperature_valid` is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub moisture_raw: u16,
    pub moisture_percent: f32,
    pub temperature_c: f32,
    pub temperature_f: f32,
    pub temperature_valid: bool,
    /// microseconds since boot
    pub timestamp: u64,
}

impl SensorSample {
    pub fn new(
        moisture_raw: u16,
        moisture_percent: f32,
        temperature_c: Option<f32>,
        timestamp: u64,
    ) -> Self {
        let (temperature_c, temperature_f, temperature_valid) = match temperature_c {
            Some(c) => (c, celsius_to_fahrenheit(c), true),
            None => (0.0, celsius_to_fahrenheit(0.0), false),
        };
        Self {
            moisture_raw,
            moisture_percent,
            temperature_c,
            temperature_f,
            temperature_valid,
            timestamp,
        }
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature_valid.then_some(self.temperature_c)
    }

    pub fn status(&self) -> SoilStatus {
        SoilStatus::classify(self.moisture_percent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatterySample {
    /// volts at the cell, after undoing the divider
    pub voltage: f32,
    pub percentage: f32,
}

impl BatterySample {
    /// Above this the node is assumed to be running from usb power
    pub const USB_PRESENT_VOLTAGE: f32 = 4.3;

    pub fn from_voltage(voltage: f32) -> Self {
        Self {
            voltage,
            percentage: crate::voltage_to_percentage(voltage),
        }
    }

    pub fn usb_present(&self) -> bool {
        self.voltage > Self::USB_PRESENT_VOLTAGE
    }
}

/// Coarse moisture bands used for log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoilStatus {
    Critical,
    Low,
    Good,
    High,
    Saturated,
}

impl SoilStatus {
    pub fn classify(percent: f32) -> Self {
        match percent {
            p if p < 20.0 => SoilStatus::Critical,
            p if p < 35.0 => SoilStatus::Low,
            p if p < 65.0 => SoilStatus::Good,
            p if p < 85.0 => SoilStatus::High,
            _ => SoilStatus::Saturated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SoilStatus::Critical => "critical (water now)",
            SoilStatus::Low => "low (water soon)",
            SoilStatus::Good => "good",
            SoilStatus::High => "high",
            SoilStatus::Saturated => "saturated",
        }
    }
}

pub fn celsius_to_fahrenheit(c: f32) -> f32 {
    c * 1.8 + 32.0
}
