//! Battery voltage through a resistor divider on an ADC pin

use embedded_hal::delay::DelayNs;

use crate::{BatterySample, SensorError};

const VOLTAGE_MAX: f32 = 4.2;
const VOLTAGE_MIN: f32 = 3.0;

/// One calibrated conversion, in millivolts at the ADC pin
pub trait BatteryAdc {
    fn read_millivolts(&mut self) -> Result<u32, SensorError>;
}

pub struct BatteryMonitor<A: BatteryAdc, D: DelayNs> {
    adc: A,
    delay: D,
    samples: u8,
    sample_delay_ms: u32,
    divider: f32,
}

impl<A: BatteryAdc, D: DelayNs> BatteryMonitor<A, D> {
    pub fn new(adc: A, delay: D, samples: u8, divider: f32) -> Self {
        Self {
            adc,
            delay,
            samples,
            sample_delay_ms: 10,
            divider,
        }
    }

    /// Monitor built from the compiled-in [`crate::SENSOR_CONFIG`]
    pub fn from_config(adc: A, delay: D) -> Self {
        let cfg = &crate::SENSOR_CONFIG;
        let divider = (cfg.divider_r1_kohm + cfg.divider_r2_kohm) as f32
            / cfg.divider_r2_kohm.max(1) as f32;
        Self::new(adc, delay, cfg.battery_samples, divider)
    }

    pub fn read(&mut self) -> Result<BatterySample, SensorError> {
        let mut total_mv: u32 = 0;
        let mut valid: u32 = 0;

        for _ in 0..self.samples {
            match self.adc.read_millivolts() {
                Ok(mv) => {
                    total_mv = total_mv.saturating_add(mv);
                    valid += 1;
                }
                Err(e) => log::trace!("ADC conversion dropped: {e:}"),
            }
            self.delay.delay_ms(self.sample_delay_ms);
        }

        if valid == 0 {
            log::error!("No valid ADC samples out of {}", self.samples);
            return Err(SensorError::NoValidSamples);
        }

        let avg_mv = total_mv / valid;
        let voltage = (avg_mv as f32 / 1000.0) * self.divider;
        let sample = BatterySample::from_voltage(voltage);
        log::debug!(
            "Battery: {avg_mv}mV at pin, {:.2}V, {:.0}% ({valid}/{} samples)",
            sample.voltage,
            sample.percentage,
            self.samples
        );
        Ok(sample)
    }
}

/// Single cell li-ion discharge curve, piecewise linear
pub fn voltage_to_percentage(voltage: f32) -> f32 {
    if voltage > BatterySample::USB_PRESENT_VOLTAGE {
        return 100.0;
    }
    if voltage >= VOLTAGE_MAX {
        return 100.0;
    }
    if voltage <= VOLTAGE_MIN {
        return 0.0;
    }

    let pct = if voltage > 3.9 {
        80.0 + (voltage - 3.9) / 0.3 * 20.0
    } else if voltage > 3.7 {
        50.0 + (voltage - 3.7) / 0.2 * 30.0
    } else if voltage > 3.4 {
        20.0 + (voltage - 3.4) / 0.3 * 30.0
    } else {
        (voltage - VOLTAGE_MIN) / 0.4 * 20.0
    };
    pct.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    struct ScriptedAdc(VecDeque<Result<u32, SensorError>>);

    impl BatteryAdc for ScriptedAdc {
        fn read_millivolts(&mut self) -> Result<u32, SensorError> {
            self.0.pop_front().unwrap_or(Err(SensorError::AdcError))
        }
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn curve_breakpoints() {
        assert_eq!(voltage_to_percentage(2.5), 0.0);
        assert_eq!(voltage_to_percentage(3.0), 0.0);
        assert!(approx(voltage_to_percentage(3.4), 20.0));
        assert!(approx(voltage_to_percentage(3.7), 50.0));
        assert!(approx(voltage_to_percentage(3.9), 80.0));
        assert!(approx(voltage_to_percentage(3.8), 65.0));
        assert_eq!(voltage_to_percentage(4.2), 100.0);
        assert_eq!(voltage_to_percentage(4.25), 100.0);
    }

    #[test]
    fn usb_voltage_is_full() {
        assert_eq!(voltage_to_percentage(4.31), 100.0);
        assert_eq!(voltage_to_percentage(5.0), 100.0);
    }

    #[test]
    fn averages_only_valid_conversions() {
        let adc = ScriptedAdc(VecDeque::from(vec![
            Ok(1900),
            Err(SensorError::AdcError),
            Ok(1950),
            Err(SensorError::AdcError),
        ]));
        let mut monitor = BatteryMonitor::new(adc, NoDelay, 4, 2.0);
        let sample = monitor.read().unwrap();
        // (1900 + 1950) / 2 = 1925 mV * 2
        assert!(approx(sample.voltage, 3.85));
        assert!(approx(sample.percentage, voltage_to_percentage(3.85)));
    }

    #[test]
    fn integer_mean_truncates() {
        let adc = ScriptedAdc(VecDeque::from(vec![Ok(1000), Ok(1001)]));
        let mut monitor = BatteryMonitor::new(adc, NoDelay, 2, 1.0);
        assert!(approx(monitor.read().unwrap().voltage, 1.0));
    }

    #[test]
    fn no_valid_conversion_is_an_error() {
        let adc = ScriptedAdc(VecDeque::new());
        let mut monitor = BatteryMonitor::new(adc, NoDelay, 10, 2.0);
        assert_eq!(monitor.read(), Err(SensorError::NoValidSamples));
    }
}
