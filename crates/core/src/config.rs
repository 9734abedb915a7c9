use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ArbiterError;
use crate::work::Tier;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

// ── Top-level config ──────────────────────────────────────────

/// Full configuration for the arbitration core.
///
/// Parsed from `hashgrid.toml`; every field has a default so an empty file
/// is a valid config. Environment variables prefixed with `HASHGRID_`
/// override individual keys after parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArbiterConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub adaptation: AdaptationConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default)]
    pub qos: QosConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
}

// ── Pool ──────────────────────────────────────────────────────

/// Worker pool shape and fault detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker slots, fixed for the lifetime of the controller.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Give every worker a disjoint slice of the search space.
    #[serde(default = "default_partition_mode")]
    pub partition_mode: bool,
    /// Size of the candidate space split across workers.
    #[serde(default = "default_search_space")]
    pub search_space: u64,
    /// A worker is faulted after `avg_completion_rounds * factor` rounds.
    #[serde(default = "default_fault_factor")]
    pub fault_timeout_factor: f64,
    /// Lower bound on the fault timeout, in rounds.
    #[serde(default = "default_fault_min_rounds")]
    pub fault_min_rounds: u64,
    /// Largest accepted payload.
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
    /// Wall-clock spacing of rounds when driven by `Controller::run`.
    #[serde(default = "default_round_interval_ms")]
    pub round_interval_ms: u64,
}

fn default_workers() -> usize {
    300
}

fn default_partition_mode() -> bool {
    true
}

fn default_search_space() -> u64 {
    1 << 32
}

fn default_fault_factor() -> f64 {
    4.0
}

fn default_fault_min_rounds() -> u64 {
    8
}

fn default_max_payload() -> usize {
    256
}

fn default_round_interval_ms() -> u64 {
    100
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            partition_mode: default_partition_mode(),
            search_space: default_search_space(),
            fault_timeout_factor: default_fault_factor(),
            fault_min_rounds: default_fault_min_rounds(),
            max_payload_bytes: default_max_payload(),
            round_interval_ms: default_round_interval_ms(),
        }
    }
}

// ── Queues ────────────────────────────────────────────────────

/// Admission queue bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Default capacity of each tier queue.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Per-tier overrides keyed by tier name (`critical`, `high`, ...).
    #[serde(default)]
    pub tier_capacity: BTreeMap<String, usize>,
    /// Extra room per tier reserved for reclaimed items pushed back at the head.
    #[serde(default = "default_reclaim_headroom")]
    pub reclaim_headroom: usize,
}

fn default_capacity() -> usize {
    256
}

fn default_reclaim_headroom() -> usize {
    64
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            tier_capacity: BTreeMap::new(),
            reclaim_headroom: default_reclaim_headroom(),
        }
    }
}

impl QueueConfig {
    /// Resolve the capacity for a tier, honoring overrides.
    pub fn capacity_for(&self, tier: Tier) -> usize {
        self.tier_capacity
            .get(&tier.to_string())
            .copied()
            .unwrap_or(self.capacity)
    }

    /// Sum of all tier capacities (reclaim headroom excluded).
    pub fn total_capacity(&self) -> usize {
        Tier::ALL.iter().map(|t| self.capacity_for(*t)).sum()
    }
}

// ── Adaptation ────────────────────────────────────────────────

/// Policy adaptation thresholds and weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationConfig {
    /// Rounds between policy reconsiderations.
    #[serde(default = "default_window")]
    pub window_rounds: u64,
    /// Mean load above this switches to load balancing.
    #[serde(default = "default_high_util")]
    pub high_utilization_pct: f64,
    /// Mean load below this switches to strict priority.
    #[serde(default = "default_low_util")]
    pub low_utilization_pct: f64,
    /// PerformanceAware weight on `load_pct`.
    #[serde(default = "default_load_weight")]
    pub load_weight: u32,
    /// PerformanceAware weight on `avg_completion_rounds`.
    #[serde(default = "default_latency_weight")]
    pub latency_weight: u32,
    /// Utilization samples retained for telemetry.
    #[serde(default = "default_history")]
    pub history_capacity: usize,
    /// Initial value of the power-save mode flag.
    #[serde(default)]
    pub power_save_mode: bool,
    /// Initial value of the performance-boost mode flag.
    #[serde(default)]
    pub performance_boost: bool,
}

fn default_window() -> u64 {
    16
}

fn default_high_util() -> f64 {
    85.0
}

fn default_low_util() -> f64 {
    15.0
}

fn default_load_weight() -> u32 {
    256
}

fn default_latency_weight() -> u32 {
    1
}

fn default_history() -> usize {
    64
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            window_rounds: default_window(),
            high_utilization_pct: default_high_util(),
            low_utilization_pct: default_low_util(),
            load_weight: default_load_weight(),
            latency_weight: default_latency_weight(),
            history_capacity: default_history(),
            power_save_mode: false,
            performance_boost: false,
        }
    }
}

// ── Thermal / power ───────────────────────────────────────────

/// What happens to the in-flight item of a thermally preempted worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalReclaim {
    /// Publish the item as `Exhausted`, no requeue.
    Drop,
    /// Push the item back at the head of its tier.
    Requeue,
}

/// Power budget and thermal model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermalConfig {
    #[serde(default = "default_power_budget")]
    pub power_budget_w: f64,
    #[serde(default = "default_worker_power")]
    pub per_worker_power_w: f64,
    #[serde(default = "default_idle_power")]
    pub idle_power_w: f64,
    #[serde(default = "default_ambient")]
    pub ambient_c: f64,
    #[serde(default = "default_temp_per_worker")]
    pub temp_per_worker_c: f64,
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold_c: f64,
    #[serde(default = "default_hysteresis")]
    pub hysteresis_c: f64,
    #[serde(default = "default_reclaim")]
    pub reclaim: ThermalReclaim,
}

fn default_power_budget() -> f64 {
    240.0
}

fn default_worker_power() -> f64 {
    0.8
}

fn default_idle_power() -> f64 {
    0.0
}

fn default_ambient() -> f64 {
    25.0
}

fn default_temp_per_worker() -> f64 {
    0.2
}

fn default_safety_threshold() -> f64 {
    85.0
}

fn default_hysteresis() -> f64 {
    5.0
}

fn default_reclaim() -> ThermalReclaim {
    ThermalReclaim::Drop
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            power_budget_w: default_power_budget(),
            per_worker_power_w: default_worker_power(),
            idle_power_w: default_idle_power(),
            ambient_c: default_ambient(),
            temp_per_worker_c: default_temp_per_worker(),
            safety_threshold_c: default_safety_threshold(),
            hysteresis_c: default_hysteresis(),
            reclaim: default_reclaim(),
        }
    }
}

// ── QoS ───────────────────────────────────────────────────────

/// SLA thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosConfig {
    /// Total queued items above which a round counts against the SLA.
    #[serde(default = "default_sla_backlog")]
    pub sla_backlog: usize,
    /// Consecutive over-backlog rounds that make one violation.
    #[serde(default = "default_sla_window")]
    pub sla_window_rounds: u32,
    /// Initial value of the emergency mode flag.
    #[serde(default)]
    pub emergency_mode: bool,
}

fn default_sla_backlog() -> usize {
    512
}

fn default_sla_window() -> u32 {
    4
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            sla_backlog: default_sla_backlog(),
            sla_window_rounds: default_sla_window(),
            emergency_mode: false,
        }
    }
}

// ── Security ──────────────────────────────────────────────────

/// Tamper handling thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Deviation score above which a health report counts as a violation.
    #[serde(default = "default_deviation")]
    pub deviation_threshold: f64,
    /// Violations that trigger system-wide lockdown.
    #[serde(default = "default_lockdown")]
    pub lockdown_threshold: u32,
}

fn default_deviation() -> f64 {
    10.0
}

fn default_lockdown() -> u32 {
    16
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            deviation_threshold: default_deviation(),
            lockdown_threshold: default_lockdown(),
        }
    }
}

// ── Collector ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Smoothing factor for `avg_completion_rounds`.
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
}

fn default_ema_alpha() -> f64 {
    0.25
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            ema_alpha: default_ema_alpha(),
        }
    }
}

// ── Loading & Validation ──────────────────────────────────────

impl ArbiterConfig {
    /// Parse config from a TOML string, apply env overrides, validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ArbiterError> {
        let mut config: Self = toml::from_str(toml_str)?;
        let profile = env_opt("HASHGRID_PROFILE").unwrap_or_default().to_uppercase();
        config.apply_overrides(|key| profiled_env_opt(&profile, key));
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ArbiterError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides, for runs without a config file.
    pub fn from_env() -> Result<Self, ArbiterError> {
        Self::from_toml("")
    }

    /// Apply overrides from a key lookup.
    ///
    /// Convention: `HASHGRID_<KEY>`. Unparseable values are ignored with a warning.
    /// - `HASHGRID_WORKERS` → `pool.workers`
    /// - `HASHGRID_PARTITION_MODE` → `pool.partition_mode`
    /// - `HASHGRID_ROUND_INTERVAL_MS` → `pool.round_interval_ms`
    /// - `HASHGRID_QUEUE_CAPACITY` → `queues.capacity`
    /// - `HASHGRID_ADAPTATION_WINDOW` → `adaptation.window_rounds`
    /// - `HASHGRID_POWER_BUDGET_W` → `thermal.power_budget_w`
    /// - `HASHGRID_THERMAL_THRESHOLD_C` → `thermal.safety_threshold_c`
    /// - `HASHGRID_THERMAL_RECLAIM` → `thermal.reclaim` (`drop` | `requeue`)
    /// - `HASHGRID_SLA_BACKLOG` → `qos.sla_backlog`
    /// - `HASHGRID_LOCKDOWN_THRESHOLD` → `security.lockdown_threshold`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring unparseable config override");
                    None
                }
            }
        }

        if let Some(v) = parse("HASHGRID_WORKERS", lookup("HASHGRID_WORKERS")) {
            self.pool.workers = v;
        }
        if let Some(v) = parse("HASHGRID_PARTITION_MODE", lookup("HASHGRID_PARTITION_MODE")) {
            self.pool.partition_mode = v;
        }
        if let Some(v) = parse("HASHGRID_ROUND_INTERVAL_MS", lookup("HASHGRID_ROUND_INTERVAL_MS")) {
            self.pool.round_interval_ms = v;
        }
        if let Some(v) = parse("HASHGRID_QUEUE_CAPACITY", lookup("HASHGRID_QUEUE_CAPACITY")) {
            self.queues.capacity = v;
        }
        if let Some(v) = parse("HASHGRID_ADAPTATION_WINDOW", lookup("HASHGRID_ADAPTATION_WINDOW")) {
            self.adaptation.window_rounds = v;
        }
        if let Some(v) = parse("HASHGRID_POWER_BUDGET_W", lookup("HASHGRID_POWER_BUDGET_W")) {
            self.thermal.power_budget_w = v;
        }
        if let Some(v) = parse("HASHGRID_THERMAL_THRESHOLD_C", lookup("HASHGRID_THERMAL_THRESHOLD_C")) {
            self.thermal.safety_threshold_c = v;
        }
        if let Some(v) = lookup("HASHGRID_THERMAL_RECLAIM") {
            match v.to_ascii_lowercase().as_str() {
                "drop" => self.thermal.reclaim = ThermalReclaim::Drop,
                "requeue" => self.thermal.reclaim = ThermalReclaim::Requeue,
                other => tracing::warn!(value = %other, "ignoring unknown HASHGRID_THERMAL_RECLAIM"),
            }
        }
        if let Some(v) = parse("HASHGRID_SLA_BACKLOG", lookup("HASHGRID_SLA_BACKLOG")) {
            self.qos.sla_backlog = v;
        }
        if let Some(v) = parse("HASHGRID_LOCKDOWN_THRESHOLD", lookup("HASHGRID_LOCKDOWN_THRESHOLD")) {
            self.security.lockdown_threshold = v;
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ArbiterError> {
        if self.pool.workers == 0 {
            return Err(ArbiterError::Config("pool.workers must be at least 1".into()));
        }
        if self.pool.partition_mode && (self.pool.workers as u64) > self.pool.search_space {
            return Err(ArbiterError::Config(format!(
                "pool.search_space ({}) is smaller than pool.workers ({})",
                self.pool.search_space, self.pool.workers
            )));
        }
        if self.pool.fault_timeout_factor <= 0.0 {
            return Err(ArbiterError::Config("pool.fault_timeout_factor must be positive".into()));
        }
        for (name, capacity) in &self.queues.tier_capacity {
            name.parse::<Tier>()
                .map_err(|_| ArbiterError::Config(format!("queues.tier_capacity has unknown tier '{name}'")))?;
            if *capacity == 0 {
                return Err(ArbiterError::Config(format!("queues.tier_capacity.{name} must be at least 1")));
            }
        }
        if self.queues.capacity == 0 {
            return Err(ArbiterError::Config("queues.capacity must be at least 1".into()));
        }
        if self.adaptation.window_rounds == 0 {
            return Err(ArbiterError::Config("adaptation.window_rounds must be at least 1".into()));
        }
        if self.adaptation.low_utilization_pct >= self.adaptation.high_utilization_pct {
            return Err(ArbiterError::Config(format!(
                "adaptation.low_utilization_pct ({}) must be below high_utilization_pct ({})",
                self.adaptation.low_utilization_pct, self.adaptation.high_utilization_pct
            )));
        }
        if self.thermal.per_worker_power_w <= 0.0 {
            return Err(ArbiterError::Config("thermal.per_worker_power_w must be positive".into()));
        }
        if self.thermal.temp_per_worker_c < 0.0 || self.thermal.hysteresis_c < 0.0 {
            return Err(ArbiterError::Config("thermal temperatures must not be negative".into()));
        }
        if !(self.collector.ema_alpha > 0.0 && self.collector.ema_alpha <= 1.0) {
            return Err(ArbiterError::Config("collector.ema_alpha must be in (0, 1]".into()));
        }
        if self.security.lockdown_threshold == 0 {
            return Err(ArbiterError::Config("security.lockdown_threshold must be at least 1".into()));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  pool:        workers={}, partition={}, round={}ms",
            self.pool.workers, self.pool.partition_mode, self.pool.round_interval_ms
        );
        tracing::info!(
            "  queues:      capacity={}, headroom={}",
            self.queues.capacity, self.queues.reclaim_headroom
        );
        tracing::info!(
            "  adaptation:  window={}, high={}%, low={}%",
            self.adaptation.window_rounds,
            self.adaptation.high_utilization_pct,
            self.adaptation.low_utilization_pct
        );
        tracing::info!(
            "  thermal:     budget={}W, threshold={}C, reclaim={:?}",
            self.thermal.power_budget_w, self.thermal.safety_threshold_c, self.thermal.reclaim
        );
        tracing::info!(
            "  security:    lockdown_threshold={}",
            self.security.lockdown_threshold
        );
    }
}
