use std::str::FromStr;

use crate::SimError;

const ENV_PREFIX: &str = "PMINDZ_SIM_";

/// Knobs for one simulated deployment
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub episodes: u32,
    /// Coordinator permits joining from this many virtual seconds on
    pub join_after_secs: u64,
    /// Every Nth i2c read fails, 0 disables
    pub i2c_fail_every: u32,
    /// Every Nth ADC conversion fails, 0 disables
    pub adc_fail_every: u32,
    /// Wipe retention memory before this episode
    pub power_loss_at: Option<u32>,
    pub dry_rate_per_hour: f32,
    pub battery_volts: f32,
    /// Coordinator toggles the indicator this often, 0 disables
    pub toggle_every_secs: u64,
    /// Print the run summary as JSON on stdout
    pub json: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            episodes: 6,
            join_after_secs: 8,
            i2c_fail_every: 7,
            adc_fail_every: 0,
            power_loss_at: None,
            dry_rate_per_hour: 2.5,
            battery_volts: 4.05,
            toggle_every_secs: 7200,
            json: false,
        }
    }
}

impl Scenario {
    /// Defaults overridden by `PMINDZ_SIM_*` environment variables,
    /// e.g. `PMINDZ_SIM_EPISODES=12`
    pub fn from_env() -> Result<Self, SimError> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn from_lookup<F: Fn(&'static str) -> Option<String>>(lookup: F) -> Result<Self, SimError> {
        let mut s = Self::default();
        override_with(&lookup, "EPISODES", &mut s.episodes)?;
        override_with(&lookup, "JOIN_AFTER_SECS", &mut s.join_after_secs)?;
        override_with(&lookup, "I2C_FAIL_EVERY", &mut s.i2c_fail_every)?;
        override_with(&lookup, "ADC_FAIL_EVERY", &mut s.adc_fail_every)?;
        override_with(&lookup, "DRY_RATE_PER_HOUR", &mut s.dry_rate_per_hour)?;
        override_with(&lookup, "BATTERY_VOLTS", &mut s.battery_volts)?;
        override_with(&lookup, "TOGGLE_EVERY_SECS", &mut s.toggle_every_secs)?;
        override_with(&lookup, "JSON", &mut s.json)?;
        if let Some(value) = lookup("POWER_LOSS_AT") {
            s.power_loss_at = Some(parse("POWER_LOSS_AT", value)?);
        }
        Ok(s)
    }
}

fn override_with<F, T>(lookup: &F, var: &'static str, field: &mut T) -> Result<(), SimError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(var) {
        *field = parse(var, value)?;
    }
    Ok(())
}

fn parse<T: FromStr>(var: &'static str, value: String) -> Result<T, SimError> {
    value
        .trim()
        .parse()
        .map_err(|_| SimError::InvalidEnv { var, value })
}
