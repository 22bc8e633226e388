use std::collections::BTreeMap;

use serde::Serialize;

use pmindz_node::{attributes::Quantity, NetworkInfo, RemoteCommand, NODE_CONFIG};

use crate::Scenario;

/// What the gateway decoded for one published attribute
#[derive(Debug, Clone, Serialize)]
pub struct GatewayValue {
    pub quantity: Quantity,
    pub value: f32,
    pub at_secs: u64,
}

/// The network's coordinator / parent router, as seen by the node
pub struct Coordinator {
    permit_join_at: u64,
    network: NetworkInfo,
    attributes: BTreeMap<(u16, u16), (u64, Vec<u8>)>,
    toggle_every: u64,
    next_toggle_at: u64,
    indicator_on: bool,
    commands_sent: u32,
}

impl Coordinator {
    pub fn new(scenario: &Scenario) -> Self {
        let toggle_every = scenario.toggle_every_secs.saturating_mul(1_000_000);
        Self {
            permit_join_at: scenario.join_after_secs.saturating_mul(1_000_000),
            network: NetworkInfo {
                pan_id: 0x1a62,
                extended_pan_id: [0x00, 0x12, 0x4b, 0x00, 0x29, 0xab, 0x3c, 0x01],
                channel: 15,
                short_address: 0x0000,
            },
            attributes: BTreeMap::new(),
            toggle_every,
            next_toggle_at: toggle_every,
            indicator_on: false,
            commands_sent: 0,
        }
    }

    /// Steering that completes at `at` succeeds once joining is permitted
    pub fn accepts_join(&self, at: u64) -> bool {
        at >= self.permit_join_at
    }

    /// Admit a device, handing out the next short address
    pub fn admit(&mut self, at: u64) -> NetworkInfo {
        let short_address = 0x4c00 | (at / 1_000_000 & 0xff) as u16;
        log::info!("[coordinator] device joined as {short_address:#06x}");
        NetworkInfo {
            short_address,
            ..self.network
        }
    }

    pub fn report(&mut self, at: u64, cluster: u16, attr: u16, payload: &[u8]) {
        log::debug!(
            "[coordinator] report {cluster:#06x}/{attr:#06x} = {payload:02x?} at {}s",
            at / 1_000_000
        );
        self.attributes
            .insert((cluster, attr), (at, payload.to_vec()));
    }

    /// Indicator toggles queue at the parent while the node sleeps and
    /// are handed over on the next poll
    pub fn next_command(&mut self, now: u64) -> Option<RemoteCommand> {
        if self.toggle_every == 0 || now < self.next_toggle_at {
            return None;
        }
        while self.next_toggle_at <= now {
            self.next_toggle_at += self.toggle_every;
        }
        self.indicator_on = !self.indicator_on;
        self.commands_sent += 1;
        Some(RemoteCommand::on_off(NODE_CONFIG.endpoint, self.indicator_on))
    }

    pub fn commands_sent(&self) -> u32 {
        self.commands_sent
    }

    /// Latest value of every published quantity, gateway side
    pub fn decoded(&self) -> Vec<GatewayValue> {
        self.attributes
            .iter()
            .filter_map(|((cluster, attr), (at, payload))| {
                let quantity = Quantity::lookup(*cluster, *attr)?;
                match quantity.decode(payload) {
                    Ok(value) => Some(GatewayValue {
                        quantity,
                        value,
                        at_secs: at / 1_000_000,
                    }),
                    Err(e) => {
                        log::warn!("[coordinator] undecodable {quantity:?}: {e:}");
                        None
                    }
                }
            })
            .collect()
    }
}
