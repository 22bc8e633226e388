use heapless::Vec;
use serde::{Deserialize, Serialize};

use pmindz_sensor::{BatterySample, SensorSample, SoilStatus};

use crate::attributes::Quantity;

/// Running sums for one wake episode. Moisture and temperature keep
/// separate counts so a failed temperature sub-read only drops out of
/// the temperature mean.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SampleAccumulator {
    moisture_sum: f32,
    moisture_raw_sum: u32,
    soil_count: u32,
    temperature_sum: f32,
    temperature_count: u32,
    voltage_sum: f32,
    battery_percent_sum: f32,
    battery_count: u32,
    soil_errors: u32,
    battery_errors: u32,
}

impl SampleAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_soil(&mut self, sample: &SensorSample) {
        self.moisture_sum += sample.moisture_percent;
        self.moisture_raw_sum += sample.moisture_raw as u32;
        self.soil_count += 1;
        if let Some(t) = sample.temperature() {
            self.temperature_sum += t;
            self.temperature_count += 1;
        }
    }

    pub fn add_battery(&mut self, sample: &BatterySample) {
        self.voltage_sum += sample.voltage;
        self.battery_percent_sum += sample.percentage;
        self.battery_count += 1;
    }

    pub fn soil_failed(&mut self) {
        self.soil_errors += 1;
    }

    pub fn battery_failed(&mut self) {
        self.battery_errors += 1;
    }

    pub fn soil_count(&self) -> u32 {
        self.soil_count
    }

    pub fn battery_count(&self) -> u32 {
        self.battery_count
    }

    /// Means over valid samples only; `None` unless at least one
    /// soil and one battery sample made it
    pub fn average(&self) -> Option<AveragedReading> {
        if self.soil_count == 0 || self.battery_count == 0 {
            return None;
        }
        let soil = self.soil_count as f32;
        let battery = self.battery_count as f32;
        Some(AveragedReading {
            moisture_percent: self.moisture_sum / soil,
            moisture_raw: (self.moisture_raw_sum / self.soil_count) as u16,
            temperature_c: (self.temperature_count > 0)
                .then(|| self.temperature_sum / self.temperature_count as f32),
            voltage: self.voltage_sum / battery,
            battery_percent: self.battery_percent_sum / battery,
            soil_samples: self.soil_count,
            temperature_samples: self.temperature_count,
            battery_samples: self.battery_count,
            soil_errors: self.soil_errors,
            battery_errors: self.battery_errors,
        })
    }
}

/// Per-episode means, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AveragedReading {
    pub moisture_percent: f32,
    pub moisture_raw: u16,
    pub temperature_c: Option<f32>,
    pub voltage: f32,
    pub battery_percent: f32,
    pub soil_samples: u32,
    pub temperature_samples: u32,
    pub battery_samples: u32,
    pub soil_errors: u32,
    pub battery_errors: u32,
}

impl AveragedReading {
    /// What gets reported, in report order. Temperature is left out
    /// when no sub-read succeeded.
    pub fn quantities(&self) -> Vec<(Quantity, f32), 4> {
        [
            Some((Quantity::BatteryPercentage, self.battery_percent)),
            Some((Quantity::BatteryVoltage, self.voltage)),
            Some((Quantity::SoilMoisture, self.moisture_percent)),
            self.temperature_c.map(|t| (Quantity::SoilTemperature, t)),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn status(&self) -> SoilStatus {
        SoilStatus::classify(self.moisture_percent)
    }
}
