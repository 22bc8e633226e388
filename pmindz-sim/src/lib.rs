//! Host simulator for the plant-minder zigbee node.
//!
//! Runs the real [`pmindz_node::WakeCycle`] and the real
//! [`pmindz_sensor::PlantSensors`] driver against a virtual clock, a
//! simulated coordinator and emulated seesaw / ADC hardware. Retention
//! memory and the stack's nvram persist across episodes exactly like
//! they would across deep sleep; a scenario can also inject a power
//! loss that wipes retention.

mod clock;
mod coordinator;
mod devices;
mod scenario;
mod stack;

pub use clock::SimClock;
pub use coordinator::{Coordinator, GatewayValue};
pub use devices::{CellModel, SimAdc, SimPin, SimPower, SimSoilBus, SoilModel};
pub use scenario::Scenario;
pub use stack::{Nvram, SimStack};

use std::{cell::RefCell, rc::Rc};

use serde::Serialize;
use thiserror::Error;

use pmindz_node::{
    CycleConfig, EpisodeReport, IndicatorHandler, NetworkSession, PersistentCycleState,
    RetainedRecordStore, SessionConfig, WakeCause, WakeCycle, NODE_CONFIG, RECORD_LEN,
};
use pmindz_sensor::{BatteryMonitor, MoistureCalibration, PlantSensors, ATSAMD10};

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("JSON error")]
    Json(#[from] serde_json::Error),
}

/// Everything a run produced
#[derive(Debug, Serialize)]
pub struct SimSummary {
    pub episodes: Vec<EpisodeReport>,
    pub final_state: Option<PersistentCycleState>,
    pub gateway: Vec<GatewayValue>,
    pub indicator_commands: u32,
    pub virtual_secs: u64,
}

/// Run every episode of `scenario` back to back in virtual time
pub fn run(scenario: &Scenario) -> SimSummary {
    let clock = SimClock::default();
    let coordinator = Rc::new(RefCell::new(Coordinator::new(scenario)));
    let nvram = Rc::new(RefCell::new(Nvram::default()));
    let soil = Rc::new(RefCell::new(SoilModel::new(scenario.dry_rate_per_hour)));
    let cell = Rc::new(RefCell::new(CellModel::new(scenario.battery_volts)));
    let mut retained = [0u8; RECORD_LEN];
    let mut episodes = Vec::with_capacity(scenario.episodes as usize);

    for n in 0..scenario.episodes {
        let mut cause = if n == 0 {
            WakeCause::PowerOn
        } else {
            WakeCause::Timer
        };
        if scenario.power_loss_at == Some(n) {
            log::warn!("Injecting power loss before episode {n}");
            retained = [0u8; RECORD_LEN];
            cause = WakeCause::PowerOn;
        }
        log::info!(
            "===== episode {n} ({cause:?}) at t={}s =====",
            clock.now() / 1_000_000
        );

        let stack = SimStack::new(clock.clone(), coordinator.clone(), nvram.clone());
        let mut session = NetworkSession::new(stack, SessionConfig::default());
        session.register_remote_command_handler(IndicatorHandler::new(
            SimPin::new("indicator"),
            NODE_CONFIG.endpoint,
        ));

        let bus = SimSoilBus::new(clock.clone(), soil.clone(), scenario.i2c_fail_every);
        let adc = SimAdc::new(cell.clone(), scenario.adc_fail_every);
        let mut sensors = PlantSensors::new(
            ATSAMD10::from_config(bus, clock.clone()),
            BatteryMonitor::from_config(adc, clock.clone()),
            MoistureCalibration::default(),
            clock.clone(),
        );
        sensors.init();

        let cycle = WakeCycle::new(
            session,
            sensors,
            clock.clone(),
            SimPower::new(clock.clone(), cause),
            RetainedRecordStore::new(&mut retained),
            CycleConfig::default(),
        );
        let report = cycle.run();
        cell.borrow_mut().drain(report.awake_us);
        episodes.push(report);
    }

    let coordinator = coordinator.borrow();
    SimSummary {
        episodes,
        final_state: PersistentCycleState::from_record(&retained).ok(),
        gateway: coordinator.decoded(),
        indicator_commands: coordinator.commands_sent(),
        virtual_secs: clock.now() / 1_000_000,
    }
}
