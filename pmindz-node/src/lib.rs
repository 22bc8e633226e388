//! Core of the plant-minder zigbee node: a battery powered soil
//! sensor that spends nearly all of its life in deep sleep.
//!
//! Each wake episode is driven by [`WakeCycle`]:
//!
//! 1. restore the [`PersistentCycleState`] from retention memory
//! 2. wait for the [`NetworkSession`] to report a joined network
//! 3. if the [`SleepScheduler`] says a reading is due, take several
//!    samples and average the valid ones
//! 4. publish the averages as zigbee attributes, mark the read, let
//!    the radio drain
//! 5. deep sleep for a fixed interval
//!
//! The network stack is never given its own thread; every wait in the
//! episode pumps [`NetworkSession::process`] so commissioning retries
//! and remote commands keep flowing.
//!
//! Remote commands (the indicator on/off attribute) can only be
//! delivered while the node is awake and joined. A write sent while
//! the node sleeps is lost, or applied on a later wake if the
//! coordinator queues it; this is inherent to a sleepy end device.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod attributes;
mod averaging;
mod config;
mod cycle;
mod indicator;
pub mod network;
mod power;
mod scheduler;
mod state;

pub use averaging::{AveragedReading, SampleAccumulator};
pub use config::{CycleConfig, NodeConfig, NODE_CONFIG};
pub use cycle::{EpisodeOutcome, EpisodePhase, EpisodeReport, WakeCycle};
pub use indicator::IndicatorHandler;
pub use network::{
    CommandError, JoinState, NetworkError, NetworkInfo, NetworkSession, RemoteCommand,
    RemoteCommandHandler, SessionConfig, ZigbeeStack,
};
pub use power::{PowerControl, WakeCause};
pub use scheduler::SleepScheduler;
pub use state::{
    CycleStateStore, PersistentCycleState, RetainedRecordStore, StoreError, RECORD_LEN,
};

pub use pmindz_sensor::{Monotonic, SensorAdapter};

use embedded_hal::delay::DelayNs;

/// Time source for an episode: monotonic microseconds plus blocking
/// delays. The microsecond count must keep running through deep sleep
/// (the RTC timer on esp32), since `last_read_time` is compared
/// against it on the next wake.
pub trait Clock: Monotonic + DelayNs {}

impl<T: Monotonic + DelayNs> Clock for T {}

pub(crate) fn micros(d: core::time::Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
