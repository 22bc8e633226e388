use core::time::Duration;

use serde::{Deserialize, Serialize};

use pmindz_sensor::SensorAdapter;

use crate::{
    micros,
    network::{NetworkSession, RemoteCommandHandler, ZigbeeStack},
    AveragedReading, Clock, CycleConfig, CycleStateStore, PersistentCycleState, PowerControl,
    SampleAccumulator, SleepScheduler, WakeCause,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodePhase {
    Init,
    WaitingForJoin,
    ReadingSensors,
    Reporting,
    EnteringSleep,
}

/// How a wake episode ended. Every variant ends in deep sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeOutcome {
    /// averages published and the read recorded
    Reported,
    /// joined, but the interval had not elapsed
    NotDue,
    JoinTimeout,
    /// the wake ceiling cut the episode short
    WakeTimeout,
    /// no valid soil or no valid battery sample
    ReadFailed,
    /// the stack could not be brought up at all
    NetworkFailed,
}

/// Summary of one episode, logged before sleep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub outcome: EpisodeOutcome,
    pub wake_cause: WakeCause,
    pub boot_count: u32,
    pub sensor_read_count: u32,
    pub first_boot: bool,
    pub join_polls: u32,
    pub reading: Option<AveragedReading>,
    pub reports_sent: u8,
    pub reports_failed: u8,
    pub awake_us: u64,
    pub sleep_us: u64,
}

impl EpisodeReport {
    fn new(wake_cause: WakeCause, state: &PersistentCycleState) -> Self {
        Self {
            outcome: EpisodeOutcome::NotDue,
            wake_cause,
            boot_count: state.boot_count,
            sensor_read_count: state.sensor_read_count,
            first_boot: state.first_boot,
            join_polls: 0,
            reading: None,
            reports_sent: 0,
            reports_failed: 0,
            awake_us: 0,
            sleep_us: 0,
        }
    }

    pub fn sleep_duration(&self) -> Duration {
        Duration::from_micros(self.sleep_us)
    }
}

/// One wake episode: restore state, join, read, report, sleep.
///
/// Owns every collaborator for the lifetime of the episode. The network
/// stack only makes progress while the cycle pumps it, and every wait
/// in the episode does.
pub struct WakeCycle<S, H, A, C, P, R>
where
    S: ZigbeeStack,
    H: RemoteCommandHandler,
    A: SensorAdapter,
    C: Clock,
    P: PowerControl,
    R: CycleStateStore,
{
    session: NetworkSession<S, H>,
    sensors: A,
    clock: C,
    power: P,
    store: R,
    scheduler: SleepScheduler,
    config: CycleConfig,
    phase: EpisodePhase,
    last_status: Option<u64>,
    started: u64,
}

impl<S, H, A, C, P, R> WakeCycle<S, H, A, C, P, R>
where
    S: ZigbeeStack,
    H: RemoteCommandHandler,
    A: SensorAdapter,
    C: Clock,
    P: PowerControl,
    R: CycleStateStore,
{
    pub fn new(
        session: NetworkSession<S, H>,
        sensors: A,
        clock: C,
        power: P,
        store: R,
        config: CycleConfig,
    ) -> Self {
        Self {
            session,
            sensors,
            clock,
            power,
            store,
            scheduler: SleepScheduler::from_config(&config),
            config,
            phase: EpisodePhase::Init,
            last_status: None,
            started: 0,
        }
    }

    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    pub fn session(&self) -> &NetworkSession<S, H> {
        &self.session
    }

    /// Run the episode and power down. On hardware this never returns.
    pub fn run(mut self) -> EpisodeReport {
        let report = self.run_episode();
        self.power.deep_sleep(report.sleep_duration());
        report
    }

    /// Everything up to, but not including, the power down
    pub fn run_episode(&mut self) -> EpisodeReport {
        self.started = self.clock.now_us();
        self.last_status = None;
        self.enter(EpisodePhase::Init);

        let wake_cause = self.power.wake_cause();
        let mut state = self.restore(wake_cause);
        state.boot_count = state.boot_count.wrapping_add(1);
        self.persist(&state);
        self.print_stats(&state, "wake");

        let mut report = EpisodeReport::new(wake_cause, &state);
        let outcome = match self.bring_up() {
            Ok(()) => self.joined_phases(&mut state, &mut report),
            Err(e) => {
                log::error!("Network bring up failed, sleeping: {e:}");
                EpisodeOutcome::NetworkFailed
            }
        };
        report.outcome = outcome;

        self.enter(EpisodePhase::EnteringSleep);
        let sleep = self.scheduler.next_sleep_duration();
        report.sensor_read_count = state.sensor_read_count;
        report.first_boot = state.first_boot;
        report.sleep_us = micros(sleep);
        report.awake_us = self.clock.now_us().saturating_sub(self.started);
        self.print_stats(&state, "sleep");
        log::info!(
            "Episode {:?} after {}ms awake, sleeping for {}s",
            report.outcome,
            report.awake_us / 1000,
            sleep.as_secs()
        );
        report
    }

    fn bring_up(&mut self) -> Result<(), crate::NetworkError> {
        self.session.init()?;
        self.session.start()
    }

    fn joined_phases(
        &mut self,
        state: &mut PersistentCycleState,
        report: &mut EpisodeReport,
    ) -> EpisodeOutcome {
        match self.wait_for_join() {
            Ok(polls) => report.join_polls = polls,
            Err((polls, outcome)) => {
                report.join_polls = polls;
                return outcome;
            }
        }

        let now = self.clock.now_us();
        if now >= self.deadline() {
            log::warn!("Joined at the wake ceiling, no time left to read");
            return EpisodeOutcome::WakeTimeout;
        }
        if !self.scheduler.should_read_sensors(state, now) {
            log::info!(
                "Sensors not due, next reading in {}s",
                self.scheduler.time_until_next_reading(state, now).as_secs()
            );
            return EpisodeOutcome::NotDue;
        }

        self.enter(EpisodePhase::ReadingSensors);
        let read_started = now;
        let (acc, cut_short) = self.sample();
        let reading = match acc.average() {
            Some(reading) => reading,
            None => {
                log::error!(
                    "No usable reading ({} soil, {} battery samples), will retry next wake",
                    acc.soil_count(),
                    acc.battery_count()
                );
                return if cut_short {
                    EpisodeOutcome::WakeTimeout
                } else {
                    EpisodeOutcome::ReadFailed
                };
            }
        };

        self.enter(EpisodePhase::Reporting);
        self.publish(&reading, report);
        report.reading = Some(reading);

        self.scheduler.mark_sensors_read(state, read_started);
        self.persist(state);

        let settle_until = self
            .clock
            .now_us()
            .saturating_add(micros(self.config.settle))
            .min(self.deadline());
        self.pump_until(settle_until);
        EpisodeOutcome::Reported
    }

    /// Poll the join flag every `join_poll`, bounded by the join timeout
    /// and the wake ceiling. Returns the number of polls that saw the
    /// node unjoined.
    fn wait_for_join(&mut self) -> Result<u32, (u32, EpisodeOutcome)> {
        self.enter(EpisodePhase::WaitingForJoin);
        let join_deadline = self
            .started
            .saturating_add(micros(self.config.join_timeout));
        let deadline = self.deadline();
        let mut polls = 0;

        loop {
            if self.session.is_joined() {
                log::info!("Joined after {polls} polls");
                return Ok(polls);
            }
            polls += 1;

            let now = self.clock.now_us();
            if now >= deadline {
                log::warn!("Wake ceiling reached before joining, sleeping");
                return Err((polls, EpisodeOutcome::WakeTimeout));
            }
            if now >= join_deadline {
                log::warn!(
                    "Join timeout after {:?} ({} steering attempts), sleeping",
                    self.config.join_timeout,
                    self.session.steering_attempts()
                );
                return Err((polls, EpisodeOutcome::JoinTimeout));
            }

            let next = now
                .saturating_add(micros(self.config.join_poll))
                .min(join_deadline)
                .min(deadline);
            self.pump_until(next);
        }
    }

    /// Take `sample_count` soil and battery samples, skipping failures.
    /// Stops early at the wake ceiling; the flag says whether it did.
    fn sample(&mut self) -> (SampleAccumulator, bool) {
        let mut acc = SampleAccumulator::new();
        let count = self.config.sample_count;
        let deadline = self.deadline();

        for i in 0..count {
            if i > 0 {
                let next = self
                    .clock
                    .now_us()
                    .saturating_add(micros(self.config.sample_interval))
                    .min(deadline);
                self.pump_until(next);
            }
            if self.clock.now_us() >= deadline {
                log::warn!("Wake ceiling reached after {i} of {count} samples");
                return (acc, true);
            }

            log::debug!("Reading sample {}/{count}", i + 1);
            match self.sensors.read_moisture_and_temperature() {
                Ok(sample) => acc.add_soil(&sample),
                Err(e) => {
                    log::warn!("Soil sample {} failed: {e:}", i + 1);
                    acc.soil_failed();
                }
            }
            match self.sensors.read_battery() {
                Ok(sample) => acc.add_battery(&sample),
                Err(e) => {
                    log::warn!("Battery sample {} failed: {e:}", i + 1);
                    acc.battery_failed();
                }
            }
            self.session.process(self.clock.now_us());
        }
        (acc, false)
    }

    fn publish(&mut self, reading: &AveragedReading, report: &mut EpisodeReport) {
        log::info!(
            "Reporting: moisture {:.1}% ({}), temperature {:?}C, battery {:.2}V {:.0}%",
            reading.moisture_percent,
            reading.status().as_str(),
            reading.temperature_c,
            reading.voltage,
            reading.battery_percent
        );
        let endpoint = self.config.endpoint;
        for (quantity, value) in reading.quantities() {
            let res = quantity
                .encode(value)
                .map_err(crate::NetworkError::from)
                .and_then(|v| {
                    self.session
                        .set_attribute(endpoint, quantity.cluster(), quantity.attribute(), v)
                });
            match res {
                Ok(()) => report.reports_sent += 1,
                Err(e) => {
                    log::warn!("Report of {quantity:?} ({value}) failed: {e:}");
                    report.reports_failed += 1;
                }
            }
        }
        if reading.temperature_c.is_none() {
            log::warn!("No valid temperature sub-read, temperature not reported");
        }
        if reading.voltage > pmindz_sensor::BatterySample::USB_PRESENT_VOLTAGE {
            log::info!("USB power present");
        }
    }

    /// Keep the stack loop running until `target` (us)
    fn pump_until(&mut self, target: u64) {
        let tick = micros(self.config.stack_tick).max(1);
        loop {
            let now = self.clock.now_us();
            self.session.process(now);
            self.log_status(now);
            if now >= target {
                return;
            }
            let step = (target - now).min(tick);
            self.clock.delay_us(u32::try_from(step).unwrap_or(u32::MAX));
        }
    }

    fn log_status(&mut self, now: u64) {
        let interval = micros(self.config.status_interval);
        let due = match self.last_status {
            Some(last) => now.saturating_sub(last) >= interval,
            None => true,
        };
        if !due {
            return;
        }
        self.last_status = Some(now);
        let indicator = match self.session.indicator() {
            Some(true) => "ON",
            Some(false) => "OFF",
            None => "n/a",
        };
        log::info!(
            "Status: {} | {:?} | indicator {indicator} | awake {}ms",
            if self.session.is_joined() {
                "joined"
            } else {
                "searching"
            },
            self.phase,
            now.saturating_sub(self.started) / 1000
        );
    }

    fn deadline(&self) -> u64 {
        self.started
            .saturating_add(micros(self.config.wake_ceiling))
    }

    fn enter(&mut self, phase: EpisodePhase) {
        if phase != self.phase {
            log::debug!("{:?} -> {phase:?}", self.phase);
        }
        self.phase = phase;
    }

    fn restore(&mut self, wake_cause: WakeCause) -> PersistentCycleState {
        match self.store.load() {
            Ok(state) => {
                log::debug!("Restored cycle state {state:?}");
                state
            }
            Err(e) => {
                match wake_cause {
                    WakeCause::Timer => {
                        log::warn!("Retention lost across sleep ({e:}), starting fresh")
                    }
                    _ => log::info!("Wake from {wake_cause:?}, starting fresh ({e:})"),
                }
                PersistentCycleState::default()
            }
        }
    }

    fn persist(&mut self, state: &PersistentCycleState) {
        if let Err(e) = self.store.save(state) {
            log::error!("Failed to persist cycle state: {e:}");
        }
    }

    fn print_stats(&self, state: &PersistentCycleState, when: &str) {
        let now = self.clock.now_us();
        log::info!(
            "[{when}] boot #{} | reads {} | first boot {} | interval {}s | next reading in {}s",
            state.boot_count,
            state.sensor_read_count,
            state.first_boot,
            self.scheduler.read_interval().as_secs(),
            self.scheduler.time_until_next_reading(state, now).as_secs()
        );
    }
}
