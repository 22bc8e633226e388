//! Emulated peripherals: seesaw soil sensor on i2c, the battery divider
//! on an ADC pin, the indicator LED and the deep sleep controller.

use std::{cell::RefCell, convert::Infallible, f32::consts::PI, rc::Rc, time::Duration};

use embedded_hal::{
    digital::{ErrorType as PinErrorType, OutputPin},
    i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation},
};
use pmindz_node::{PowerControl, WakeCause};
use pmindz_sensor::{BatteryAdc, MoistureCalibration, SensorError, SENSOR_CONFIG};

use crate::SimClock;

const HOUR_US: f32 = 3_600_000_000.0;
const DAY_US: f32 = 24.0 * HOUR_US;
const REWATER_BELOW: f32 = 25.0;
const REWATER_TO: f32 = 80.0;

/// A pot drying out linearly and getting watered when it runs low
pub struct SoilModel {
    dry_rate_per_hour: f32,
    percent: f32,
    updated_at: u64,
    calibration: MoistureCalibration,
}

impl SoilModel {
    pub fn new(dry_rate_per_hour: f32) -> Self {
        Self {
            dry_rate_per_hour,
            percent: REWATER_TO,
            updated_at: 0,
            calibration: MoistureCalibration::default(),
        }
    }

    fn advance(&mut self, now: u64) {
        let hours = now.saturating_sub(self.updated_at) as f32 / HOUR_US;
        self.updated_at = now;
        self.percent -= hours * self.dry_rate_per_hour;
        if self.percent < REWATER_BELOW {
            log::info!("[soil] watered at {:.1}%", self.percent);
            self.percent = REWATER_TO;
        }
    }

    /// Raw capacitance the probe would report at `now`
    pub fn moisture_raw(&mut self, now: u64) -> u16 {
        self.advance(now);
        let span = self.calibration.wet as f32 - self.calibration.dry as f32;
        (self.calibration.dry as f32 + span * self.percent / 100.0) as u16
    }

    /// Daily swing around 21C
    pub fn temperature(&self, now: u64) -> f32 {
        21.0 + 3.0 * (2.0 * PI * (now as f32 % DAY_US) / DAY_US).sin()
    }
}

/// I2C bus with a seesaw soil sensor on it
pub struct SimSoilBus {
    clock: SimClock,
    soil: Rc<RefCell<SoilModel>>,
    fail_every: u32,
    reads: u32,
    register: [u8; 2],
}

impl SimSoilBus {
    pub fn new(clock: SimClock, soil: Rc<RefCell<SoilModel>>, fail_every: u32) -> Self {
        Self {
            clock,
            soil,
            fail_every,
            reads: 0,
            register: [0; 2],
        }
    }

    fn fill(&mut self, buffer: &mut [u8]) -> Result<(), ErrorKind> {
        self.reads += 1;
        if self.fail_every != 0 && self.reads % self.fail_every == 0 {
            log::debug!("[i2c] injected failure on read {}", self.reads);
            return Err(ErrorKind::Bus);
        }
        let now = self.clock.now();
        match self.register {
            [0x0f, 0x10] => {
                let raw = self.soil.borrow_mut().moisture_raw(now);
                copy_into(buffer, &raw.to_be_bytes())
            }
            [0x00, 0x04] => {
                let c = self.soil.borrow().temperature(now);
                let fixed = (c as f64 * 65536.0) as i32;
                copy_into(buffer, &fixed.to_be_bytes())
            }
            _ => Err(ErrorKind::Other),
        }
    }
}

fn copy_into(buffer: &mut [u8], bytes: &[u8]) -> Result<(), ErrorKind> {
    if buffer.len() != bytes.len() {
        return Err(ErrorKind::Other);
    }
    buffer.copy_from_slice(bytes);
    Ok(())
}

impl ErrorType for SimSoilBus {
    type Error = ErrorKind;
}

impl I2c for SimSoilBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != SENSOR_CONFIG.soil_address {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    if bytes.len() >= 2 {
                        self.register = [bytes[0], bytes[1]];
                    }
                }
                Operation::Read(buffer) => self.fill(buffer)?,
            }
        }
        Ok(())
    }
}

/// Li-ion cell slowly discharging with time spent awake
pub struct CellModel {
    volts: f32,
}

impl CellModel {
    const AWAKE_DRAIN_V_PER_SEC: f32 = 0.000_05;
    const SLEEP_DRAIN_V: f32 = 0.000_2;

    pub fn new(volts: f32) -> Self {
        Self { volts }
    }

    pub fn volts(&self) -> f32 {
        self.volts
    }

    /// Account for one episode's awake time plus the sleep after it
    pub fn drain(&mut self, awake_us: u64) {
        let awake_secs = awake_us as f32 / 1_000_000.0;
        self.volts = (self.volts - awake_secs * Self::AWAKE_DRAIN_V_PER_SEC - Self::SLEEP_DRAIN_V)
            .max(0.0);
    }
}

/// ADC pin behind the battery divider
pub struct SimAdc {
    cell: Rc<RefCell<CellModel>>,
    divider: f32,
    fail_every: u32,
    conversions: u32,
}

impl SimAdc {
    pub fn new(cell: Rc<RefCell<CellModel>>, fail_every: u32) -> Self {
        let divider = (SENSOR_CONFIG.divider_r1_kohm + SENSOR_CONFIG.divider_r2_kohm) as f32
            / SENSOR_CONFIG.divider_r2_kohm.max(1) as f32;
        Self {
            cell,
            divider,
            fail_every,
            conversions: 0,
        }
    }
}

impl BatteryAdc for SimAdc {
    fn read_millivolts(&mut self) -> Result<u32, SensorError> {
        self.conversions += 1;
        if self.fail_every != 0 && self.conversions % self.fail_every == 0 {
            return Err(SensorError::AdcError);
        }
        // a few mV of conversion noise
        let jitter = (self.conversions % 5) as f32 - 2.0;
        let mv = self.cell.borrow().volts() * 1000.0 / self.divider + jitter;
        Ok(mv.max(0.0) as u32)
    }
}

/// Indicator LED
pub struct SimPin {
    name: &'static str,
}

impl SimPin {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl PinErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        log::info!("[{}] off", self.name);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        log::info!("[{}] on", self.name);
        Ok(())
    }
}

/// Deep sleep is just the clock jumping forward
pub struct SimPower {
    clock: SimClock,
    cause: WakeCause,
}

impl SimPower {
    pub fn new(clock: SimClock, cause: WakeCause) -> Self {
        Self { clock, cause }
    }
}

impl PowerControl for SimPower {
    fn wake_cause(&self) -> WakeCause {
        self.cause
    }

    fn deep_sleep(&mut self, duration: Duration) {
        log::info!("[power] deep sleep for {}s", duration.as_secs());
        self.clock.advance(duration.as_micros() as u64);
    }
}
