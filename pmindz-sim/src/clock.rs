use std::{cell::Cell, rc::Rc};

use embedded_hal::delay::DelayNs;
use pmindz_sensor::Monotonic;

/// Virtual microsecond clock. Delays advance it instantly; clones share
/// the same time, so the sensors, the stack and the cycle agree.
#[derive(Clone, Default)]
pub struct SimClock(Rc<Cell<u64>>);

impl SimClock {
    pub fn now(&self) -> u64 {
        self.0.get()
    }

    pub fn advance(&self, us: u64) {
        self.0.set(self.0.get().saturating_add(us));
    }
}

impl Monotonic for SimClock {
    fn now_us(&self) -> u64 {
        self.now()
    }
}

impl DelayNs for SimClock {
    fn delay_ns(&mut self, ns: u32) {
        self.advance((ns as u64).div_ceil(1000));
    }
}
