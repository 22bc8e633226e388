use embedded_hal::{delay::DelayNs, i2c::I2c};

use crate::{
    BatteryAdc, BatteryMonitor, BatterySample, MoistureCalibration, Monotonic, SensorAdapter,
    SensorError, SensorSample, ATSAMD10,
};

/// Soil sensor plus battery input, as wired on the node
pub struct PlantSensors<I2C: I2c, A: BatteryAdc, D: DelayNs, M: Monotonic> {
    soil: ATSAMD10<I2C, D>,
    battery: BatteryMonitor<A, D>,
    calibration: MoistureCalibration,
    clock: M,
}

impl<I2C, A, D, M> PlantSensors<I2C, A, D, M>
where
    I2C: I2c,
    A: BatteryAdc,
    D: DelayNs,
    M: Monotonic,
{
    pub fn new(
        soil: ATSAMD10<I2C, D>,
        battery: BatteryMonitor<A, D>,
        calibration: MoistureCalibration,
        clock: M,
    ) -> Self {
        Self {
            soil,
            battery,
            calibration,
            clock,
        }
    }

    /// Soft reset the soil sensor. A failure here is not fatal, the
    /// chip may simply not support the reset register.
    pub fn init(&mut self) {
        match self.soil.soft_reset() {
            Ok(()) => log::info!("Soil sensor reset at {:#04x}", self.soil.address),
            Err(e) => log::warn!("Soil sensor reset failed (may be expected): {e:}"),
        }
    }
}

impl<I2C, A, D, M> SensorAdapter for PlantSensors<I2C, A, D, M>
where
    I2C: I2c,
    A: BatteryAdc,
    D: DelayNs,
    M: Monotonic,
{
    fn read_battery(&mut self) -> Result<BatterySample, SensorError> {
        let sample = self.battery.read()?;
        if sample.usb_present() {
            log::debug!("USB power detected ({:.2}V)", sample.voltage);
        }
        Ok(sample)
    }

    fn read_moisture_and_temperature(&mut self) -> Result<SensorSample, SensorError> {
        let timestamp = self.clock.now_us();
        let moisture_raw = self.soil.moisture().map_err(|e| {
            log::error!("Failed to read soil moisture: {e:}");
            e
        })?;
        let moisture_percent = self.calibration.percent(moisture_raw);

        let temperature = match self.soil.temperature() {
            Ok(c) => Some(c),
            Err(e) => {
                log::warn!("Failed to read soil temperature, keeping moisture: {e:}");
                None
            }
        };

        let sample = SensorSample::new(moisture_raw, moisture_percent, temperature, timestamp);
        log::debug!(
            "Soil: raw={} moisture={:.1}% temp={:?} ({})",
            sample.moisture_raw,
            sample.moisture_percent,
            sample.temperature(),
            sample.status().as_str()
        );
        Ok(sample)
    }
}
