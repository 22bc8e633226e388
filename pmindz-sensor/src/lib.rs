//! Sensor lib defining the read operations for the plant-minder
//! zigbee node: the seesaw capacitive soil sensor (moisture plus
//! on-chip temperature) and the resistor-divided battery input.
//!
//! Everything here is `no_std` and written against embedded-hal 1.0
//! so the same code runs on the esp32 node build and in the host
//! simulator (`std` feature).
//!
//! The [`SensorAdapter`] trait is the seam the wake-cycle orchestrator
//! consumes; [`PlantSensors`] is the concrete adapter that combines an
//! [`ATSAMD10`] soil sensor with a [`BatteryMonitor`].
#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod adapter;
mod battery;
mod reading;
mod soil;

pub use adapter::PlantSensors;
pub use battery::{voltage_to_percentage, BatteryAdc, BatteryMonitor};
pub use reading::{celsius_to_fahrenheit, BatterySample, SensorSample, SoilStatus};
pub use soil::{MoistureCalibration, ATSAMD10};

use thiserror::Error;

/// Build-time sensor wiring, overridable through `cfg.toml`
/// under the `[pmindz-sensor]` table
#[toml_cfg::toml_config]
pub struct SensorConfig {
    #[default(0x36)]
    pub soil_address: u8,
    #[default(329)]
    pub soil_dry: u16,
    #[default(1050)]
    pub soil_wet: u16,
    #[default(5000)]
    pub moisture_delay_us: u32,
    #[default(10000)]
    pub temp_delay_us: u32,
    #[default(10)]
    pub battery_samples: u8,
    #[default(200)]
    pub divider_r1_kohm: u32,
    #[default(200)]
    pub divider_r2_kohm: u32,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("I2c Read Error")]
    I2cReadError,
    #[error("I2c Write Error")]
    I2cWriteError,
    #[error("ADC conversion error")]
    AdcError,
    #[error("No valid ADC samples")]
    NoValidSamples,
}

/// Source of monotonic time, in microseconds since boot
pub trait Monotonic {
    fn now_us(&self) -> u64;
}

/// Sensor access as seen by the wake cycle. Each call is one
/// complete, independently fallible measurement.
pub trait SensorAdapter {
    fn read_battery(&mut self) -> Result<BatterySample, SensorError>;

    /// Moisture is mandatory; a failed temperature read yields a
    /// sample with `temperature_valid == false` rather than an error
    fn read_moisture_and_temperature(&mut self) -> Result<SensorSample, SensorError>;
}

impl<T: SensorAdapter + ?Sized> SensorAdapter for &mut T {
    fn read_battery(&mut self) -> Result<BatterySample, SensorError> {
        (**self).read_battery()
    }

    fn read_moisture_and_temperature(&mut self) -> Result<SensorSample, SensorError> {
        (**self).read_moisture_and_temperature()
    }
}
