/// [Seesaw soil sensor](https://www.adafruit.com/product/4026)
/// This is the soil sensor wired to the zigbee node
use embedded_hal::{delay::DelayNs, i2c::I2c};

use crate::SensorError;

/// Seesaw I2C Soil Sensor
pub struct ATSAMD10<I2C: I2c, D: DelayNs> {
    pub temp_delay: u32,
    pub moisture_delay: u32,
    pub address: u8,
    i2c: I2C,
    delay: D,
}

impl<I2C: I2c, D: DelayNs> ATSAMD10<I2C, D> {
    const ATSAMD10_READ_MOISTURE: [u8; 2] = [0x0f, 0x10];
    const ATSAMD10_READ_TEMP: [u8; 2] = [0x00, 0x04];
    const ATSAMD10_SOFT_RESET: [u8; 3] = [0x00, 0x7f, 0xff];
    const ATSAMD10_RESET_SETTLE_MS: u32 = 1000;

    pub fn new(i2c: I2C, delay: D, address: u8, temp_delay: u32, moisture_delay: u32) -> Self {
        Self {
            i2c,
            delay,
            temp_delay,
            moisture_delay,
            address,
        }
    }

    /// Sensor built from the compiled-in [`crate::SENSOR_CONFIG`]
    pub fn from_config(i2c: I2C, delay: D) -> Self {
        let cfg = &crate::SENSOR_CONFIG;
        Self::new(
            i2c,
            delay,
            cfg.soil_address,
            cfg.temp_delay_us,
            cfg.moisture_delay_us,
        )
    }

    /// Issue the seesaw software reset and wait for the chip to come
    /// back up
    pub fn soft_reset(&mut self) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &Self::ATSAMD10_SOFT_RESET)
            .map_err(|_| SensorError::I2cWriteError)?;
        self.delay.delay_ms(Self::ATSAMD10_RESET_SETTLE_MS);
        Ok(())
    }

    /// write register address, wait `delay` us for the conversion,
    /// then read back the result
    pub fn read_sensor(
        &mut self,
        r_buffer: &mut [u8],
        w_buffer: &[u8],
        delay: u32,
    ) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, w_buffer)
            .map_err(|_| SensorError::I2cWriteError)?;
        self.delay.delay_us(delay);
        self.i2c
            .read(self.address, r_buffer)
            .map_err(|_| SensorError::I2cReadError)?;
        Ok(())
    }

    /// Raw capacitive reading
    pub fn moisture(&mut self) -> Result<u16, SensorError> {
        let mut buffer = [0; 2];
        self.read_sensor(
            &mut buffer,
            &Self::ATSAMD10_READ_MOISTURE,
            self.moisture_delay,
        )?;
        Ok(u16::from_be_bytes(buffer))
    }

    /// Die temperature in degrees celsius (16.16 fixed point on the wire)
    pub fn temperature(&mut self) -> Result<f32, SensorError> {
        let mut buffer = [0; 4];
        self.read_sensor(&mut buffer, &Self::ATSAMD10_READ_TEMP, self.temp_delay)?;
        let raw = i32::from_be_bytes(buffer) as f32;
        Ok((1.0 / 1_i32.wrapping_shl(16) as f32) * raw)
    }
}

/// Linear mapping from raw capacitance to percent, between the
/// readings taken in dry air and in water
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoistureCalibration {
    pub dry: u16,
    pub wet: u16,
}

impl Default for MoistureCalibration {
    fn default() -> Self {
        Self {
            dry: crate::SENSOR_CONFIG.soil_dry,
            wet: crate::SENSOR_CONFIG.soil_wet,
        }
    }
}

impl MoistureCalibration {
    pub fn percent(&self, raw: u16) -> f32 {
        let span = self.wet as f32 - self.dry as f32;
        if span <= 0.0 {
            return 0.0;
        }
        let pct = (raw as f32 - self.dry as f32) / span * 100.0;
        pct.clamp(0.0, 100.0)
    }
}
