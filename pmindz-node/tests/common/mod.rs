//! Fake collaborators for driving whole wake episodes in virtual time
#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
    time::Duration,
};

use embedded_hal::delay::DelayNs;

use pmindz_node::{
    attributes::EndpointDescriptor,
    network::{CommissioningMode, StackConfig, StackSignal, StackStatus, ZclStatus},
    CommandError, CycleConfig, EpisodeReport, Monotonic, NetworkInfo, NetworkSession,
    PersistentCycleState, PowerControl, RemoteCommand, RemoteCommandHandler, RetainedRecordStore,
    SensorAdapter, SessionConfig, WakeCause, WakeCycle, ZigbeeStack, RECORD_LEN,
};
use pmindz_sensor::{BatterySample, SensorError, SensorSample};

pub const SEC: u64 = 1_000_000;

#[derive(Clone, Default)]
pub struct VirtualClock(Rc<Cell<u64>>);

impl VirtualClock {
    pub fn now(&self) -> u64 {
        self.0.get()
    }

    pub fn set(&self, t: u64) {
        self.0.set(t)
    }

    pub fn advance(&self, us: u64) {
        self.0.set(self.0.get() + us)
    }
}

impl Monotonic for VirtualClock {
    fn now_us(&self) -> u64 {
        self.now()
    }
}

impl DelayNs for VirtualClock {
    fn delay_ns(&mut self, ns: u32) {
        self.advance((ns as u64).div_ceil(1000))
    }
}

/// How the coordinator and stack behave during one episode
#[derive(Clone)]
pub struct StackScript {
    pub signal_latency: u64,
    pub steering_time: u64,
    /// steering attempts that fail before one succeeds
    pub steering_failures: u32,
    pub never_join: bool,
    pub reject: Vec<(u16, u16)>,
    /// remote writes queued at the parent, delivered once joined
    pub commands: Vec<(u64, RemoteCommand)>,
}

impl Default for StackScript {
    fn default() -> Self {
        Self {
            signal_latency: SEC / 2,
            steering_time: 4 * SEC,
            steering_failures: 0,
            never_join: false,
            reject: Vec::new(),
            commands: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct StackLog {
    /// (time, cluster, attribute, payload)
    pub attributes: Vec<(u64, u16, u16, Vec<u8>)>,
    pub steering_attempts: u32,
    pub joined_at: Option<u64>,
}

impl StackLog {
    /// Attribute writes after the initial values written at start
    pub fn reports_after(&self, t: u64) -> Vec<(u16, u16, Vec<u8>)> {
        self.attributes
            .iter()
            .filter(|(at, ..)| *at > t)
            .map(|(_, c, a, v)| (*c, *a, v.clone()))
            .collect()
    }
}

pub struct FakeStack {
    clock: VirtualClock,
    script: StackScript,
    log: Rc<RefCell<StackLog>>,
    provisioned: Rc<Cell<bool>>,
    pending: VecDeque<(u64, StackSignal)>,
    joined: bool,
}

impl FakeStack {
    fn raise(&mut self, after: u64, signal: StackSignal) {
        self.pending.push_back((self.clock.now() + after, signal));
    }
}

impl ZigbeeStack for FakeStack {
    fn init(&mut self, _config: &StackConfig) -> Result<(), StackStatus> {
        Ok(())
    }

    fn set_tx_power(&mut self, _dbm: i8) {}

    fn register_endpoint(&mut self, _endpoint: &EndpointDescriptor) -> Result<(), StackStatus> {
        Ok(())
    }

    fn set_channel_mask(&mut self, _mask: u32) -> Result<(), StackStatus> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), StackStatus> {
        self.raise(self.script.signal_latency, StackSignal::SkipStartup);
        Ok(())
    }

    fn start_commissioning(&mut self, mode: CommissioningMode) -> Result<(), StackStatus> {
        match mode {
            CommissioningMode::Initialization => {
                let signal = if self.provisioned.get() {
                    StackSignal::DeviceReboot(Ok(()))
                } else {
                    StackSignal::DeviceFirstStart(Ok(()))
                };
                self.raise(self.script.signal_latency, signal);
            }
            CommissioningMode::NetworkSteering => {
                let attempt = {
                    let mut log = self.log.borrow_mut();
                    log.steering_attempts += 1;
                    log.steering_attempts
                };
                let result = if self.script.never_join || attempt <= self.script.steering_failures
                {
                    Err(StackStatus::NoNetwork)
                } else {
                    Ok(())
                };
                self.raise(self.script.steering_time, StackSignal::Steering(result));
            }
        }
        Ok(())
    }

    fn is_factory_new(&self) -> bool {
        !self.provisioned.get()
    }

    fn network_info(&self) -> NetworkInfo {
        NetworkInfo {
            pan_id: 0x1a62,
            extended_pan_id: [0xdd; 8],
            channel: 15,
            short_address: 0x4c2e,
        }
    }

    fn set_attribute(
        &mut self,
        _endpoint: u8,
        cluster: u16,
        attr: u16,
        value: &[u8],
    ) -> Result<(), ZclStatus> {
        if self.script.reject.contains(&(cluster, attr)) {
            return Err(ZclStatus(0x86));
        }
        self.log
            .borrow_mut()
            .attributes
            .push((self.clock.now(), cluster, attr, value.to_vec()));
        Ok(())
    }

    fn iterate(&mut self) {}

    fn poll_signal(&mut self) -> Option<StackSignal> {
        let now = self.clock.now();
        match self.pending.front() {
            Some((due, _)) if *due <= now => {}
            _ => return None,
        }
        let (_, signal) = self.pending.pop_front()?;
        let joins = match signal {
            StackSignal::Steering(Ok(())) => {
                self.provisioned.set(true);
                true
            }
            StackSignal::DeviceReboot(Ok(())) => self.provisioned.get(),
            _ => false,
        };
        if joins {
            self.joined = true;
            self.log.borrow_mut().joined_at = Some(now);
        }
        Some(signal)
    }

    fn poll_command(&mut self) -> Option<RemoteCommand> {
        if !self.joined {
            return None;
        }
        let now = self.clock.now();
        let idx = self
            .script
            .commands
            .iter()
            .position(|(at, _)| *at <= now)?;
        Some(self.script.commands.remove(idx).1)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Soil {
    Ok(f32, Option<f32>),
    Fail,
}

#[derive(Clone, Default)]
pub struct SensorScript {
    pub soil: VecDeque<Soil>,
    pub battery: VecDeque<Option<f32>>,
}

impl SensorScript {
    pub fn soil(mut self, soil: impl IntoIterator<Item = Soil>) -> Self {
        self.soil = soil.into_iter().collect();
        self
    }

    pub fn battery(mut self, battery: impl IntoIterator<Item = Option<f32>>) -> Self {
        self.battery = battery.into_iter().collect();
        self
    }
}

/// Scripted sensors; once a queue runs dry every read succeeds with
/// 50% moisture, 20C and 3.8V
pub struct FakeSensors {
    clock: VirtualClock,
    script: SensorScript,
    calls: Rc<RefCell<Vec<u64>>>,
}

impl SensorAdapter for FakeSensors {
    fn read_battery(&mut self) -> Result<BatterySample, SensorError> {
        self.calls.borrow_mut().push(self.clock.now());
        match self.script.battery.pop_front().unwrap_or(Some(3.8)) {
            Some(v) => Ok(BatterySample::from_voltage(v)),
            None => Err(SensorError::NoValidSamples),
        }
    }

    fn read_moisture_and_temperature(&mut self) -> Result<SensorSample, SensorError> {
        let now = self.clock.now();
        self.calls.borrow_mut().push(now);
        match self.script.soil.pop_front().unwrap_or(Soil::Ok(50.0, Some(20.0))) {
            Soil::Ok(pct, temp) => Ok(SensorSample::new(700, pct, temp, now)),
            Soil::Fail => Err(SensorError::I2cReadError),
        }
    }
}

pub struct FakePower {
    clock: VirtualClock,
    cause: WakeCause,
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl PowerControl for FakePower {
    fn wake_cause(&self) -> WakeCause {
        self.cause
    }

    fn deep_sleep(&mut self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.clock.advance(duration.as_micros() as u64);
    }
}

pub struct Recorder(Rc<RefCell<Vec<bool>>>);

impl RemoteCommandHandler for Recorder {
    fn handle(&mut self, command: &RemoteCommand) -> Result<(), CommandError> {
        let on = command.as_bool().ok_or(CommandError::Malformed)?;
        self.0.borrow_mut().push(on);
        Ok(())
    }
}

/// A node whose retention memory, nvram and clock persist between
/// episodes
pub struct Node {
    pub clock: VirtualClock,
    pub region: [u8; RECORD_LEN],
    pub provisioned: Rc<Cell<bool>>,
    pub stack_log: Rc<RefCell<StackLog>>,
    pub sensor_calls: Rc<RefCell<Vec<u64>>>,
    pub sleeps: Rc<RefCell<Vec<Duration>>>,
    pub commands: Rc<RefCell<Vec<bool>>>,
    pub config: CycleConfig,
}

impl Node {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            clock: VirtualClock::default(),
            region: [0; RECORD_LEN],
            provisioned: Rc::new(Cell::new(false)),
            stack_log: Rc::default(),
            sensor_calls: Rc::default(),
            sleeps: Rc::default(),
            commands: Rc::default(),
            config: CycleConfig::default(),
        }
    }

    pub fn with_config(config: CycleConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    pub fn wake(&mut self, cause: WakeCause, stack: StackScript, sensors: SensorScript) -> EpisodeReport {
        let stack = FakeStack {
            clock: self.clock.clone(),
            script: stack,
            log: self.stack_log.clone(),
            provisioned: self.provisioned.clone(),
            pending: VecDeque::new(),
            joined: false,
        };
        let mut session = NetworkSession::new(stack, SessionConfig::default());
        session.register_remote_command_handler(Recorder(self.commands.clone()));

        let sensors = FakeSensors {
            clock: self.clock.clone(),
            script: sensors,
            calls: self.sensor_calls.clone(),
        };
        let power = FakePower {
            clock: self.clock.clone(),
            cause,
            sleeps: self.sleeps.clone(),
        };
        let cycle = WakeCycle::new(
            session,
            sensors,
            self.clock.clone(),
            power,
            RetainedRecordStore::new(&mut self.region),
            self.config,
        );
        cycle.run()
    }

    pub fn state(&self) -> Option<PersistentCycleState> {
        PersistentCycleState::from_record(&self.region).ok()
    }
}
