use core::time::Duration;

use crate::{micros, CycleConfig, PersistentCycleState};

/// Decides when the sensors are due. Every wake sleeps for the same
/// fixed interval no matter how overdue the reading was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepScheduler {
    read_interval: Duration,
    min_sleep: Duration,
}

impl SleepScheduler {
    pub const fn new(read_interval: Duration, min_sleep: Duration) -> Self {
        Self {
            read_interval,
            min_sleep,
        }
    }

    pub fn from_config(config: &CycleConfig) -> Self {
        Self::new(config.read_interval, config.min_sleep)
    }

    pub fn read_interval(&self) -> Duration {
        self.read_interval
    }

    pub fn should_read_sensors(&self, state: &PersistentCycleState, now: u64) -> bool {
        if state.first_boot {
            return true;
        }
        match now.checked_sub(state.last_read_time) {
            Some(elapsed) => elapsed >= micros(self.read_interval),
            None => {
                log::warn!(
                    "Clock is behind last read ({now} < {}), treating reading as due",
                    state.last_read_time
                );
                true
            }
        }
    }

    /// Record a completed read taken at `now`. This is the only place
    /// the first boot latch is cleared.
    pub fn mark_sensors_read(&self, state: &mut PersistentCycleState, now: u64) {
        state.last_read_time = now;
        state.sensor_read_count = state.sensor_read_count.wrapping_add(1);
        state.first_boot = false;
    }

    pub fn time_until_next_reading(&self, state: &PersistentCycleState, now: u64) -> Duration {
        if state.first_boot {
            return Duration::ZERO;
        }
        let interval = micros(self.read_interval);
        match now.checked_sub(state.last_read_time) {
            Some(elapsed) if elapsed < interval => Duration::from_micros(interval - elapsed),
            _ => Duration::ZERO,
        }
    }

    pub fn next_sleep_duration(&self) -> Duration {
        self.read_interval.max(self.min_sleep)
    }
}
