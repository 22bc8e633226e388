use core::time::Duration;

/// Build-time node configuration, overridable through `cfg.toml`
/// under the `[pmindz-node]` table
#[toml_cfg::toml_config]
pub struct NodeConfig {
    #[default(3600)]
    pub read_interval_secs: u64,
    #[default(10)]
    pub min_sleep_secs: u64,
    #[default(60)]
    pub wake_ceiling_secs: u64,
    #[default(30)]
    pub join_timeout_secs: u64,
    #[default(1000)]
    pub join_poll_ms: u64,
    #[default(5)]
    pub sample_count: u8,
    #[default(5000)]
    pub sample_interval_ms: u64,
    #[default(5000)]
    pub settle_ms: u64,
    #[default(5000)]
    pub status_interval_ms: u64,
    #[default(10)]
    pub stack_tick_ms: u64,
    #[default(3000)]
    pub steering_retry_ms: u64,
    #[default(10)]
    pub tx_power_dbm: i8,
    #[default(3000)]
    pub keep_alive_ms: u32,
    #[default(1)]
    pub endpoint: u8,
    #[default("pmindz")]
    pub manufacturer: &'static str,
    #[default("PlantMinder-ZB")]
    pub model: &'static str,
}

/// Episode timing, derived from [`NODE_CONFIG`] by default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleConfig {
    pub read_interval: Duration,
    pub min_sleep: Duration,
    pub wake_ceiling: Duration,
    pub join_timeout: Duration,
    pub join_poll: Duration,
    pub sample_count: u8,
    pub sample_interval: Duration,
    pub settle: Duration,
    pub status_interval: Duration,
    pub stack_tick: Duration,
    pub endpoint: u8,
}

impl Default for CycleConfig {
    fn default() -> Self {
        let cfg = &NODE_CONFIG;
        Self {
            read_interval: Duration::from_secs(cfg.read_interval_secs),
            min_sleep: Duration::from_secs(cfg.min_sleep_secs),
            wake_ceiling: Duration::from_secs(cfg.wake_ceiling_secs),
            join_timeout: Duration::from_secs(cfg.join_timeout_secs),
            join_poll: Duration::from_millis(cfg.join_poll_ms),
            sample_count: cfg.sample_count,
            sample_interval: Duration::from_millis(cfg.sample_interval_ms),
            settle: Duration::from_millis(cfg.settle_ms),
            status_interval: Duration::from_millis(cfg.status_interval_ms),
            stack_tick: Duration::from_millis(cfg.stack_tick_ms.max(1)),
            endpoint: cfg.endpoint,
        }
    }
}
