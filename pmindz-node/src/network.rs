//! Zigbee join / commissioning state machine over an abstract stack.
//!
//! The stack is driven by polling: [`NetworkSession::process`] runs one
//! iteration of the stack loop, drains pending application signals and
//! remote commands, and fires a steering retry once its deadline has
//! passed. Nothing here blocks.

use core::time::Duration;

use heapless::Vec;
use thiserror::Error;

use crate::{
    attributes::{self, AttributeError, AttributeValue, EndpointDescriptor},
    micros, NODE_CONFIG,
};

/// Failure status reported by the stack for a lifecycle call or signal
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackStatus {
    #[error("generic failure")]
    Fail,
    #[error("timed out")]
    Timeout,
    #[error("no network found")]
    NoNetwork,
    #[error("stack error {0:#x}")]
    Code(i32),
}

/// Non-success ZCL status returned for an attribute write
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("ZCL status {0:#04x}")]
pub struct ZclStatus(pub u8);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Stack {op} failed: {status}")]
    Stack {
        op: &'static str,
        status: StackStatus,
    },
    #[error("Operation not valid in state {0:?}")]
    InvalidState(JoinState),
    #[error("Attribute report failed for cluster {cluster:#06x} attr {attr:#06x}: {status}")]
    AttributeReport { cluster: u16, attr: u16, status: ZclStatus },
    #[error("Attribute encoding error: {0}")]
    Encoding(#[from] AttributeError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("No handler for cluster {cluster:#06x} attr {attr:#06x}")]
    Unsupported { cluster: u16, attr: u16 },
    #[error("Malformed command payload")]
    Malformed,
    #[error("Output pin error")]
    Pin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    SleepyEndDevice,
}

/// End device aging timeout as understood by the parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgingTimeout {
    Minutes64,
    Minutes256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    pub role: DeviceRole,
    pub install_code_policy: bool,
    pub aging_timeout: AgingTimeout,
    pub keep_alive_ms: u32,
    pub tx_power_dbm: i8,
    pub channel_mask: u32,
}

impl StackConfig {
    /// 2.4 GHz channels 11 through 26
    pub const ALL_CHANNELS_MASK: u32 = 0x07ff_f800;
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            role: DeviceRole::SleepyEndDevice,
            install_code_policy: false,
            aging_timeout: AgingTimeout::Minutes64,
            keep_alive_ms: NODE_CONFIG.keep_alive_ms,
            tx_power_dbm: NODE_CONFIG.tx_power_dbm,
            channel_mask: Self::ALL_CHANNELS_MASK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub stack: StackConfig,
    pub endpoint: EndpointDescriptor,
    pub steering_retry: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stack: StackConfig::default(),
            endpoint: EndpointDescriptor::sensor(
                NODE_CONFIG.endpoint,
                NODE_CONFIG.manufacturer,
                NODE_CONFIG.model,
            ),
            steering_retry: Duration::from_millis(NODE_CONFIG.steering_retry_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissioningMode {
    Initialization,
    NetworkSteering,
}

/// Application signals raised by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackSignal {
    /// stack is up, commissioning may begin
    SkipStartup,
    DeviceFirstStart(Result<(), StackStatus>),
    DeviceReboot(Result<(), StackStatus>),
    Steering(Result<(), StackStatus>),
    Leave,
    Other(u32),
}

/// Parameters of the network the node is on
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    pub pan_id: u16,
    pub extended_pan_id: [u8; 8],
    pub channel: u8,
    pub short_address: u16,
}

pub const MAX_COMMAND_LEN: usize = 8;

/// Remote attribute write addressed to this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub endpoint: u8,
    pub cluster: u16,
    pub attribute: u16,
    pub data: Vec<u8, MAX_COMMAND_LEN>,
}

impl RemoteCommand {
    pub fn on_off(endpoint: u8, on: bool) -> Self {
        Self {
            endpoint,
            cluster: attributes::cluster::ON_OFF,
            attribute: attributes::attr::ON_OFF,
            data: [on as u8].into_iter().collect(),
        }
    }

    /// Boolean payload of an on/off write
    pub fn as_bool(&self) -> Option<bool> {
        match self.data.as_slice() {
            [b] => Some(*b != 0),
            _ => None,
        }
    }
}

/// Observer the session hands remote commands to
pub trait RemoteCommandHandler {
    fn handle(&mut self, command: &RemoteCommand) -> Result<(), CommandError>;

    /// Indicator state for status logging, if the handler drives one
    fn indicator(&self) -> Option<bool> {
        None
    }
}

/// The vendor zigbee stack, reduced to what the node uses
pub trait ZigbeeStack {
    fn init(&mut self, config: &StackConfig) -> Result<(), StackStatus>;
    fn set_tx_power(&mut self, dbm: i8);
    fn register_endpoint(&mut self, endpoint: &EndpointDescriptor) -> Result<(), StackStatus>;
    fn set_channel_mask(&mut self, mask: u32) -> Result<(), StackStatus>;
    /// Start the stack without autostart; raises [`StackSignal::SkipStartup`]
    fn start(&mut self) -> Result<(), StackStatus>;
    fn start_commissioning(&mut self, mode: CommissioningMode) -> Result<(), StackStatus>;
    fn is_factory_new(&self) -> bool;
    fn network_info(&self) -> NetworkInfo;
    fn set_attribute(
        &mut self,
        endpoint: u8,
        cluster: u16,
        attr: u16,
        value: &[u8],
    ) -> Result<(), ZclStatus>;
    /// One pass of the stack main loop
    fn iterate(&mut self);
    fn poll_signal(&mut self) -> Option<StackSignal>;
    fn poll_command(&mut self) -> Option<RemoteCommand>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commissioning {
    Initializing,
    Steering,
    RetryPending { mode: CommissioningMode, at: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Uninitialized,
    StackInitialized,
    Commissioning(Commissioning),
    Joined,
}

pub struct NetworkSession<S: ZigbeeStack, H: RemoteCommandHandler> {
    stack: S,
    handler: Option<H>,
    config: SessionConfig,
    state: JoinState,
    info: NetworkInfo,
    steering_attempts: u32,
}

impl<S: ZigbeeStack, H: RemoteCommandHandler> NetworkSession<S, H> {
    pub fn new(stack: S, config: SessionConfig) -> Self {
        Self {
            stack,
            handler: None,
            config,
            state: JoinState::Uninitialized,
            info: NetworkInfo::default(),
            steering_attempts: 0,
        }
    }

    pub fn register_remote_command_handler(&mut self, handler: H) {
        self.handler = Some(handler);
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == JoinState::Joined
    }

    pub fn network_info(&self) -> Option<NetworkInfo> {
        self.is_joined().then_some(self.info)
    }

    pub fn steering_attempts(&self) -> u32 {
        self.steering_attempts
    }

    pub fn indicator(&self) -> Option<bool> {
        self.handler.as_ref().and_then(|h| h.indicator())
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Configure the stack as a sleepy end device and lower tx power
    pub fn init(&mut self) -> Result<(), NetworkError> {
        if self.state != JoinState::Uninitialized {
            return Err(NetworkError::InvalidState(self.state));
        }
        let cfg = self.config.stack;
        self.stack.init(&cfg).map_err(|status| {
            log::error!("Zigbee stack init failed: {status:}");
            NetworkError::Stack {
                op: "init",
                status,
            }
        })?;
        // reduced from the 20 dBm default, trades range for fewer brownouts
        self.stack.set_tx_power(cfg.tx_power_dbm);
        log::info!(
            "Zigbee end device configured: keep alive {}ms, tx power {}dBm",
            cfg.keep_alive_ms,
            cfg.tx_power_dbm
        );
        self.state = JoinState::StackInitialized;
        Ok(())
    }

    /// Register the endpoint schema and kick off commissioning
    pub fn start(&mut self) -> Result<(), NetworkError> {
        if self.state != JoinState::StackInitialized {
            return Err(NetworkError::InvalidState(self.state));
        }
        let endpoint = self.config.endpoint;
        self.stack
            .register_endpoint(&endpoint)
            .map_err(|status| NetworkError::Stack {
                op: "register_endpoint",
                status,
            })?;
        self.stack
            .set_channel_mask(self.config.stack.channel_mask)
            .map_err(|status| NetworkError::Stack {
                op: "set_channel_mask",
                status,
            })?;

        for (cluster, attr, value) in endpoint
            .identity()
            .into_iter()
            .chain(attributes::INITIAL_ATTRIBUTES)
        {
            if let Err(e) = self.write_attribute(endpoint.endpoint, cluster, attr, value) {
                log::warn!("Initial attribute not set: {e:}");
            }
        }

        self.stack.start().map_err(|status| {
            log::error!("Zigbee stack start failed: {status:}");
            NetworkError::Stack {
                op: "start",
                status,
            }
        })?;
        log::info!(
            "Zigbee stack started, endpoint {} registered",
            endpoint.endpoint
        );
        self.state = JoinState::Commissioning(Commissioning::Initializing);
        Ok(())
    }

    /// One iteration of the stack loop at time `now` (us)
    pub fn process(&mut self, now: u64) {
        self.stack.iterate();

        while let Some(signal) = self.stack.poll_signal() {
            self.handle_signal(signal, now);
        }

        if let JoinState::Commissioning(Commissioning::RetryPending { mode, at }) = self.state {
            if now >= at {
                log::debug!("Retrying commissioning ({mode:?})");
                self.commission(mode, now);
            }
        }

        while let Some(command) = self.stack.poll_command() {
            self.dispatch(&command);
        }
    }

    /// Best effort attribute update. Failures are returned for the
    /// caller to log, never retried here.
    pub fn set_attribute(
        &mut self,
        endpoint: u8,
        cluster: u16,
        attr: u16,
        value: AttributeValue,
    ) -> Result<(), NetworkError> {
        if !self.is_joined() {
            log::debug!("Setting attribute {cluster:#06x}/{attr:#06x} while not joined");
        }
        self.write_attribute(endpoint, cluster, attr, value)
    }

    fn write_attribute(
        &mut self,
        endpoint: u8,
        cluster: u16,
        attr: u16,
        value: AttributeValue,
    ) -> Result<(), NetworkError> {
        let payload = value.encode()?;
        self.stack
            .set_attribute(endpoint, cluster, attr, &payload)
            .map_err(|status| {
                log::warn!("Failed to set attribute {cluster:#06x}/{attr:#06x}: {status:}");
                NetworkError::AttributeReport {
                    cluster,
                    attr,
                    status,
                }
            })
    }

    fn commission(&mut self, mode: CommissioningMode, now: u64) {
        if mode == CommissioningMode::NetworkSteering {
            self.steering_attempts += 1;
        }
        match self.stack.start_commissioning(mode) {
            Ok(()) => {
                self.state = JoinState::Commissioning(match mode {
                    CommissioningMode::Initialization => Commissioning::Initializing,
                    CommissioningMode::NetworkSteering => Commissioning::Steering,
                });
            }
            Err(status) => {
                log::warn!("Commissioning ({mode:?}) could not start: {status:}");
                self.schedule_retry(mode, now);
            }
        }
    }

    fn schedule_retry(&mut self, mode: CommissioningMode, now: u64) {
        let at = now.saturating_add(micros(self.config.steering_retry));
        self.state = JoinState::Commissioning(Commissioning::RetryPending { mode, at });
    }

    fn joined(&mut self) {
        self.info = self.stack.network_info();
        self.state = JoinState::Joined;
        log::info!(
            "Joined network (PAN ID: {:#06x}, Channel: {}, Short Address: {:#06x}, Extended PAN ID: {:02x?})",
            self.info.pan_id,
            self.info.channel,
            self.info.short_address,
            self.info.extended_pan_id
        );
    }

    fn handle_signal(&mut self, signal: StackSignal, now: u64) {
        log::trace!("Stack signal {signal:?} in {:?}", self.state);
        match signal {
            StackSignal::SkipStartup => {
                log::info!("Initialize Zigbee stack");
                self.commission(CommissioningMode::Initialization, now);
            }
            StackSignal::DeviceFirstStart(Ok(())) | StackSignal::DeviceReboot(Ok(())) => {
                if self.stack.is_factory_new() {
                    log::info!("Device factory new, start network steering");
                    self.commission(CommissioningMode::NetworkSteering, now);
                } else {
                    log::info!("Device rebooted with stored network");
                    self.joined();
                }
            }
            StackSignal::DeviceFirstStart(Err(status)) | StackSignal::DeviceReboot(Err(status)) => {
                log::warn!("Failed to initialize Zigbee stack ({status:}), retrying");
                self.schedule_retry(CommissioningMode::Initialization, now);
            }
            StackSignal::Steering(Ok(())) => {
                log::info!("Network steering succeeded");
                self.joined();
            }
            StackSignal::Steering(Err(status)) => {
                log::warn!(
                    "Network steering attempt {} failed ({status:}), retry in {:?}",
                    self.steering_attempts,
                    self.config.steering_retry
                );
                self.schedule_retry(CommissioningMode::NetworkSteering, now);
            }
            StackSignal::Leave => {
                log::warn!("Left network, steering again");
                self.info = NetworkInfo::default();
                self.commission(CommissioningMode::NetworkSteering, now);
            }
            StackSignal::Other(code) => {
                log::debug!("Unhandled stack signal {code:#x}");
            }
        }
    }

    fn dispatch(&mut self, command: &RemoteCommand) {
        log::info!(
            "Remote write: endpoint {} cluster {:#06x} attr {:#06x} ({} bytes)",
            command.endpoint,
            command.cluster,
            command.attribute,
            command.data.len()
        );
        match self.handler.as_mut() {
            Some(handler) => {
                if let Err(e) = handler.handle(command) {
                    log::warn!("Remote command rejected: {e:}");
                }
            }
            None => log::warn!("No remote command handler registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const SEC: u64 = 1_000_000;

    #[derive(Default)]
    struct ScriptedStack {
        factory_new: bool,
        signals: VecDeque<StackSignal>,
        commands: VecDeque<RemoteCommand>,
        commissioning: std::vec::Vec<CommissioningMode>,
        attributes: std::vec::Vec<(u16, u16, std::vec::Vec<u8>)>,
        reject_attr: Option<u16>,
        tx_power: Option<i8>,
    }

    impl ZigbeeStack for ScriptedStack {
        fn init(&mut self, _config: &StackConfig) -> Result<(), StackStatus> {
            Ok(())
        }
        fn set_tx_power(&mut self, dbm: i8) {
            self.tx_power = Some(dbm);
        }
        fn register_endpoint(&mut self, _ep: &EndpointDescriptor) -> Result<(), StackStatus> {
            Ok(())
        }
        fn set_channel_mask(&mut self, mask: u32) -> Result<(), StackStatus> {
            assert_eq!(mask, StackConfig::ALL_CHANNELS_MASK);
            Ok(())
        }
        fn start(&mut self) -> Result<(), StackStatus> {
            self.signals.push_back(StackSignal::SkipStartup);
            Ok(())
        }
        fn start_commissioning(&mut self, mode: CommissioningMode) -> Result<(), StackStatus> {
            self.commissioning.push(mode);
            Ok(())
        }
        fn is_factory_new(&self) -> bool {
            self.factory_new
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
            if self.reject_attr == Some(attr) {
                return Err(ZclStatus(0x86));
            }
            self.attributes.push((cluster, attr, value.to_vec()));
            Ok(())
        }
        fn iterate(&mut self) {}
        fn poll_signal(&mut self) -> Option<StackSignal> {
            self.signals.pop_front()
        }
        fn poll_command(&mut self) -> Option<RemoteCommand> {
            self.commands.pop_front()
        }
    }

    #[derive(Default)]
    struct Recorder(std::vec::Vec<bool>);

    impl RemoteCommandHandler for Recorder {
        fn handle(&mut self, command: &RemoteCommand) -> Result<(), CommandError> {
            self.0.push(command.as_bool().ok_or(CommandError::Malformed)?);
            Ok(())
        }
    }

    fn started(stack: ScriptedStack) -> NetworkSession<ScriptedStack, Recorder> {
        let mut session = NetworkSession::new(stack, SessionConfig::default());
        session.init().unwrap();
        session.start().unwrap();
        session
    }

    #[test]
    fn lifecycle_order_is_enforced() {
        let mut session: NetworkSession<ScriptedStack, Recorder> =
            NetworkSession::new(ScriptedStack::default(), SessionConfig::default());
        assert_eq!(
            session.start(),
            Err(NetworkError::InvalidState(JoinState::Uninitialized))
        );
        session.init().unwrap();
        assert_eq!(session.state(), JoinState::StackInitialized);
        assert_eq!(session.stack().tx_power, Some(10));
        assert!(session.init().is_err());
    }

    #[test]
    fn start_writes_identity_and_initial_values() {
        let session = started(ScriptedStack::default());
        let attrs = &session.stack().attributes;
        assert!(attrs.contains(&(
            attributes::cluster::BASIC,
            attributes::attr::DEVICE_ENABLED,
            vec![1]
        )));
        assert!(attrs.contains(&(
            attributes::cluster::POWER_CONFIG,
            attributes::attr::BATTERY_VOLTAGE,
            vec![0]
        )));
        assert!(attrs
            .iter()
            .any(|(c, a, _)| *c == attributes::cluster::BASIC
                && *a == attributes::attr::MODEL_IDENTIFIER));
        assert_eq!(
            session.state(),
            JoinState::Commissioning(Commissioning::Initializing)
        );
    }

    #[test]
    fn factory_new_device_steers_until_joined() {
        let mut session = started(ScriptedStack {
            factory_new: true,
            ..Default::default()
        });
        session.process(0);
        // skip startup -> initialization
        assert_eq!(
            session.stack().commissioning,
            vec![CommissioningMode::Initialization]
        );
        session.stack.signals.push_back(StackSignal::DeviceFirstStart(Ok(())));
        session.process(SEC);
        assert_eq!(
            session.state(),
            JoinState::Commissioning(Commissioning::Steering)
        );

        session
            .stack
            .signals
            .push_back(StackSignal::Steering(Err(StackStatus::NoNetwork)));
        session.process(2 * SEC);
        assert_eq!(
            session.state(),
            JoinState::Commissioning(Commissioning::RetryPending {
                mode: CommissioningMode::NetworkSteering,
                at: 5 * SEC
            })
        );
        // retry not due yet
        session.process(4 * SEC);
        assert_eq!(session.steering_attempts(), 1);
        session.process(5 * SEC);
        assert_eq!(session.steering_attempts(), 2);
        assert!(!session.is_joined());
        assert_eq!(session.network_info(), None);

        session.stack.signals.push_back(StackSignal::Steering(Ok(())));
        session.process(7 * SEC);
        assert!(session.is_joined());
        assert_eq!(session.network_info().map(|i| i.pan_id), Some(0x1a62));
    }

    #[test]
    fn provisioned_device_joins_without_steering() {
        let mut session = started(ScriptedStack::default());
        session.process(0);
        session.stack.signals.push_back(StackSignal::DeviceReboot(Ok(())));
        session.process(SEC);
        assert!(session.is_joined());
        assert_eq!(session.steering_attempts(), 0);
        assert_eq!(
            session.stack().commissioning,
            vec![CommissioningMode::Initialization]
        );
    }

    #[test]
    fn failed_initialization_retries_initialization() {
        let mut session = started(ScriptedStack::default());
        session.process(0);
        session
            .stack
            .signals
            .push_back(StackSignal::DeviceReboot(Err(StackStatus::Fail)));
        session.process(SEC);
        session.process(4 * SEC);
        assert_eq!(
            session.stack().commissioning,
            vec![
                CommissioningMode::Initialization,
                CommissioningMode::Initialization
            ]
        );
    }

    #[test]
    fn leave_restarts_steering() {
        let mut session = started(ScriptedStack::default());
        session.stack.signals.push_back(StackSignal::DeviceReboot(Ok(())));
        session.process(0);
        assert!(session.is_joined());
        session.stack.signals.push_back(StackSignal::Leave);
        session.process(SEC);
        assert!(!session.is_joined());
        assert_eq!(
            session.state(),
            JoinState::Commissioning(Commissioning::Steering)
        );
    }

    #[test]
    fn attribute_failure_is_reported_not_retried() {
        let mut session = started(ScriptedStack {
            reject_attr: Some(attributes::attr::BATTERY_PERCENTAGE_REMAINING),
            ..Default::default()
        });
        let before = session.stack().attributes.len();
        let err = session
            .set_attribute(
                1,
                attributes::cluster::POWER_CONFIG,
                attributes::attr::BATTERY_PERCENTAGE_REMAINING,
                AttributeValue::U8(130),
            )
            .unwrap_err();
        assert!(matches!(err, NetworkError::AttributeReport { .. }));
        assert_eq!(session.stack().attributes.len(), before);
    }

    #[test]
    fn on_off_command_carries_one_byte() {
        let cmd = RemoteCommand::on_off(1, true);
        assert_eq!(&cmd.data[..], &[1]);
        assert_eq!(cmd.as_bool(), Some(true));
        assert_eq!(RemoteCommand::on_off(1, false).as_bool(), Some(false));
    }

    #[test]
    fn remote_commands_reach_handler() {
        let mut session = started(ScriptedStack::default());
        session.register_remote_command_handler(Recorder::default());
        session.stack.commands.push_back(RemoteCommand::on_off(1, true));
        session.stack.commands.push_back(RemoteCommand::on_off(1, false));
        session.process(0);
        assert_eq!(session.handler.as_ref().map(|h| h.0.clone()), Some(vec![true, false]));
    }
}
