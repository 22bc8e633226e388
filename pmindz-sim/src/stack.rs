use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use pmindz_node::{
    attributes::EndpointDescriptor,
    network::{CommissioningMode, StackConfig, StackSignal, StackStatus, ZclStatus},
    NetworkInfo, RemoteCommand, ZigbeeStack,
};

use crate::{Coordinator, SimClock};

const SIGNAL_LATENCY_US: u64 = 200_000;
const INIT_LATENCY_US: u64 = 300_000;
const STEERING_US: u64 = 2_500_000;

/// Stack storage that survives deep sleep and power loss (flash)
#[derive(Debug, Default)]
pub struct Nvram {
    pub network: Option<NetworkInfo>,
}

/// Zigbee stack stand-in, talking to the simulated [`Coordinator`]
pub struct SimStack {
    clock: SimClock,
    coordinator: Rc<RefCell<Coordinator>>,
    nvram: Rc<RefCell<Nvram>>,
    pending: VecDeque<(u64, StackSignal)>,
    joined: bool,
}

impl SimStack {
    pub fn new(
        clock: SimClock,
        coordinator: Rc<RefCell<Coordinator>>,
        nvram: Rc<RefCell<Nvram>>,
    ) -> Self {
        Self {
            clock,
            coordinator,
            nvram,
            pending: VecDeque::new(),
            joined: false,
        }
    }

    fn raise(&mut self, after: u64, signal: StackSignal) {
        self.pending.push_back((self.clock.now() + after, signal));
    }
}

impl ZigbeeStack for SimStack {
    fn init(&mut self, config: &StackConfig) -> Result<(), StackStatus> {
        log::debug!("[stack] init {config:?}");
        Ok(())
    }

    fn set_tx_power(&mut self, dbm: i8) {
        log::debug!("[stack] tx power {dbm}dBm");
    }

    fn register_endpoint(&mut self, endpoint: &EndpointDescriptor) -> Result<(), StackStatus> {
        log::debug!(
            "[stack] endpoint {} {}/{} clusters {:04x?}",
            endpoint.endpoint,
            endpoint.manufacturer,
            endpoint.model,
            endpoint.clusters
        );
        Ok(())
    }

    fn set_channel_mask(&mut self, mask: u32) -> Result<(), StackStatus> {
        if mask == 0 {
            return Err(StackStatus::Fail);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), StackStatus> {
        self.raise(SIGNAL_LATENCY_US, StackSignal::SkipStartup);
        Ok(())
    }

    fn start_commissioning(&mut self, mode: CommissioningMode) -> Result<(), StackStatus> {
        match mode {
            CommissioningMode::Initialization => {
                let signal = if self.nvram.borrow().network.is_some() {
                    StackSignal::DeviceReboot(Ok(()))
                } else {
                    StackSignal::DeviceFirstStart(Ok(()))
                };
                self.raise(INIT_LATENCY_US, signal);
            }
            CommissioningMode::NetworkSteering => {
                let done_at = self.clock.now() + STEERING_US;
                let result = if self.coordinator.borrow().accepts_join(done_at) {
                    Ok(())
                } else {
                    Err(StackStatus::NoNetwork)
                };
                self.raise(STEERING_US, StackSignal::Steering(result));
            }
        }
        Ok(())
    }

    fn is_factory_new(&self) -> bool {
        self.nvram.borrow().network.is_none()
    }

    fn network_info(&self) -> NetworkInfo {
        self.nvram.borrow().network.unwrap_or_default()
    }

    fn set_attribute(
        &mut self,
        _endpoint: u8,
        cluster: u16,
        attr: u16,
        value: &[u8],
    ) -> Result<(), ZclStatus> {
        // local attribute table always accepts; only a joined device
        // gets the report out
        if self.joined {
            self.coordinator
                .borrow_mut()
                .report(self.clock.now(), cluster, attr, value);
        }
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
        match signal {
            StackSignal::Steering(Ok(())) => {
                let info = self.coordinator.borrow_mut().admit(now);
                self.nvram.borrow_mut().network = Some(info);
                self.joined = true;
            }
            StackSignal::DeviceReboot(Ok(())) => self.joined = true,
            _ => {}
        }
        Some(signal)
    }

    fn poll_command(&mut self) -> Option<RemoteCommand> {
        if !self.joined {
            return None;
        }
        self.coordinator.borrow_mut().next_command(self.clock.now())
    }
}
