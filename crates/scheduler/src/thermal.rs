//! Power/thermal ceiling on simultaneously active workers.

use serde::Serialize;
use tracing::{info, warn};

use hashgrid_core::config::ThermalConfig;
use hashgrid_core::WorkerId;

use crate::feeds::SensorReading;
use crate::status::WorkerStatusTable;

/// Derived each round from the active-worker count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThermalPowerState {
    pub active_cap: usize,
    pub estimated_power: f64,
    pub estimated_temp: f64,
    pub throttled: bool,
}

#[derive(Debug, Clone)]
pub struct ThermalPowerGovernor {
    config: ThermalConfig,
    pool_size: usize,
    power_budget_w: f64,
    /// Ceiling imposed by an over-temperature event; shrinks only until released.
    throttle_cap: Option<usize>,
    state: ThermalPowerState,
}

impl ThermalPowerGovernor {
    pub fn new(config: &ThermalConfig, pool_size: usize) -> Self {
        let mut governor = Self {
            config: config.clone(),
            pool_size,
            power_budget_w: config.power_budget_w,
            throttle_cap: None,
            state: ThermalPowerState {
                active_cap: pool_size,
                estimated_power: config.idle_power_w,
                estimated_temp: config.ambient_c,
                throttled: false,
            },
        };
        governor.state.active_cap = governor.power_cap();
        governor
    }

    /// Workers the power budget can feed.
    pub fn power_cap(&self) -> usize {
        let usable = (self.power_budget_w - self.config.idle_power_w).max(0.0);
        // Absorb float error so 240 W / 0.8 W is 300, not 299.
        let by_power = (usable / self.config.per_worker_power_w + 1e-9).floor() as usize;
        by_power.min(self.pool_size)
    }

    pub fn set_power_budget(&mut self, watts: f64) {
        info!(from = self.power_budget_w, to = watts, "power budget changed");
        self.power_budget_w = watts.max(0.0);
    }

    pub fn power_budget(&self) -> f64 {
        self.power_budget_w
    }

    pub fn state(&self) -> ThermalPowerState {
        self.state
    }

    fn model_power(&self, active: usize) -> f64 {
        self.config.idle_power_w + active as f64 * self.config.per_worker_power_w
    }

    fn model_temp(&self, active: usize) -> f64 {
        self.config.ambient_c + active as f64 * self.config.temp_per_worker_c
    }

    /// Recompute estimates and the active cap for this round.
    ///
    /// A sensor reading, when present, replaces the model estimate.
    pub fn recompute(&mut self, active: usize, sensor: Option<SensorReading>) -> ThermalPowerState {
        let (power, temp) = match sensor {
            Some(r) => (r.estimated_power, r.estimated_temp),
            None => (self.model_power(active), self.model_temp(active)),
        };

        let threshold = self.config.safety_threshold_c;
        if temp > threshold {
            let shed = if self.config.temp_per_worker_c > 0.0 {
                ((temp - threshold) / self.config.temp_per_worker_c).ceil() as usize
            } else {
                active
            };
            let cap = active.saturating_sub(shed.max(1));
            let cap = self.throttle_cap.map_or(cap, |prev| prev.min(cap));
            if !self.state.throttled {
                warn!(temp, threshold, cap, "thermal ceiling exceeded, throttling");
            }
            self.throttle_cap = Some(cap);
            self.state.throttled = true;
        } else if self.state.throttled && temp < threshold - self.config.hysteresis_c {
            info!(temp, "temperature recovered, releasing thermal throttle");
            self.throttle_cap = None;
            self.state.throttled = false;
        }

        let cap = self
            .throttle_cap
            .map_or(self.power_cap(), |t| t.min(self.power_cap()));
        self.state = ThermalPowerState {
            active_cap: cap,
            estimated_power: power,
            estimated_temp: temp,
            throttled: self.state.throttled,
        };
        self.state
    }

    /// Highest-id active workers that must be idled to respect the cap.
    pub fn forced_deactivations(&self, workers: &WorkerStatusTable) -> Vec<WorkerId> {
        let active = workers.active_ids_descending();
        let excess = active.len().saturating_sub(self.state.active_cap);
        active.into_iter().take(excess).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashgrid_core::{Payload, Tier, WorkId, WorkItem};

    fn governor(pool: usize) -> ThermalPowerGovernor {
        ThermalPowerGovernor::new(&ThermalConfig::default(), pool)
    }

    fn busy_table(pool: usize, busy: usize) -> WorkerStatusTable {
        let mut table = WorkerStatusTable::new(pool, 1 << 32, true);
        for id in 0..busy {
            let item = WorkItem::new(WorkId(id as u64), Tier::Low, Payload::new(vec![1]), 0);
            table.assign(id, item, 0).unwrap();
        }
        table.promote_assigned();
        table
    }

    #[test]
    fn default_budget_feeds_whole_pool() {
        let g = governor(300);
        assert_eq!(g.power_cap(), 300);
        assert_eq!(g.state().active_cap, 300);
    }

    #[test]
    fn model_estimates() {
        let mut g = governor(300);
        let s = g.recompute(100, None);
        assert!((s.estimated_power - 80.0).abs() < 1e-9);
        assert!((s.estimated_temp - 45.0).abs() < 1e-9);
        assert!(!s.throttled);
    }

    #[test]
    fn budget_drop_sheds_highest_ids() {
        let mut g = governor(300);
        let table = busy_table(300, 260);
        g.set_power_budget(200.0);
        let s = g.recompute(table.active_count(), None);
        assert_eq!(s.active_cap, 250);
        let shed = g.forced_deactivations(&table);
        assert_eq!(shed, (250..260).rev().collect::<Vec<_>>());
    }

    #[test]
    fn over_temperature_throttles_with_hysteresis() {
        let mut g = governor(300);
        let hot = SensorReading { estimated_power: 230.0, estimated_temp: 87.0 };
        let s = g.recompute(280, Some(hot));
        assert!(s.throttled);
        // (87 - 85) / 0.2 = 10 workers shed
        assert_eq!(s.active_cap, 270);

        // Below threshold but inside the hysteresis band: stay throttled.
        let warm = SensorReading { estimated_power: 216.0, estimated_temp: 82.0 };
        let s = g.recompute(270, Some(warm));
        assert!(s.throttled);
        assert_eq!(s.active_cap, 270);

        let cool = SensorReading { estimated_power: 150.0, estimated_temp: 79.0 };
        let s = g.recompute(200, Some(cool));
        assert!(!s.throttled);
        assert_eq!(s.active_cap, 300);
    }

    #[test]
    fn throttle_cap_only_shrinks() {
        let mut g = governor(300);
        g.recompute(280, Some(SensorReading { estimated_power: 0.0, estimated_temp: 87.0 }));
        let s = g.recompute(200, Some(SensorReading { estimated_power: 0.0, estimated_temp: 86.0 }));
        // 200 - 5 = 195 < 270
        assert_eq!(s.active_cap, 195);
    }

    #[test]
    fn nothing_shed_under_cap() {
        let g = governor(10);
        let table = busy_table(10, 4);
        assert!(g.forced_deactivations(&table).is_empty());
    }
}
