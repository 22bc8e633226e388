use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Why the chip came out of reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WakeCause {
    /// sleep timer expired, retention memory is intact
    Timer,
    /// cold boot or brownout, retention memory is garbage
    PowerOn,
    /// ext0/ext1 or gpio wakeup
    External,
    Other,
}

pub trait PowerControl {
    fn wake_cause(&self) -> WakeCause;

    /// Arm the wake timer for `duration` and power down. On hardware
    /// this never returns; the next thing to run is a fresh episode.
    fn deep_sleep(&mut self, duration: Duration);
}
