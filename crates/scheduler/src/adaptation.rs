//! Periodic policy selection from utilization and mode flags.

use tracing::{debug, info};

use hashgrid_core::config::AdaptationConfig;

use crate::metrics::RingBuffer;
use crate::policy::{PolicyKind, SchedulingPolicy};
use crate::qos::QosHint;

/// Mode flags read at each window boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptationFlags {
    pub power_save_mode: bool,
    pub performance_boost: bool,
}

/// Re-evaluates the active [`SchedulingPolicy`] once per adaptation window.
#[derive(Debug, Clone)]
pub struct AdaptationController {
    window: u64,
    rounds_in_window: u64,
    sample_sum: f64,
    sample_count: u64,
    high_pct: f64,
    low_pct: f64,
    w1: u32,
    w2: u32,
    history: RingBuffer<f64>,
}

impl AdaptationController {
    pub fn new(config: &AdaptationConfig) -> Self {
        Self {
            window: config.window_rounds.max(1),
            rounds_in_window: 0,
            sample_sum: 0.0,
            sample_count: 0,
            high_pct: config.high_utilization_pct,
            low_pct: config.low_utilization_pct,
            w1: config.load_weight,
            w2: config.latency_weight,
            history: RingBuffer::new(config.history_capacity),
        }
    }

    /// Policy in force before the first window completes.
    pub fn initial_policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::from_kind(PolicyKind::PerformanceAware, self.w1, self.w2)
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    /// Selection order: power save, performance boost, high load, low load, default.
    pub fn choose(&self, utilization: f64, flags: AdaptationFlags) -> PolicyKind {
        if flags.power_save_mode {
            PolicyKind::RoundRobin
        } else if flags.performance_boost {
            PolicyKind::PerformanceAware
        } else if utilization > self.high_pct {
            PolicyKind::LoadBalanced
        } else if utilization < self.low_pct {
            PolicyKind::PriorityBased
        } else {
            PolicyKind::PerformanceAware
        }
    }

    /// Record this round's utilization and, at a window boundary, return the
    /// replacement policy if its kind differs from `current`.
    pub fn on_round(
        &mut self,
        utilization: f64,
        current: &SchedulingPolicy,
        flags: AdaptationFlags,
    ) -> Option<SchedulingPolicy> {
        self.sample_sum += utilization;
        self.sample_count += 1;
        self.rounds_in_window += 1;
        if self.rounds_in_window < self.window {
            return None;
        }

        let mean = self.sample_sum / self.sample_count as f64;
        self.history.push(mean);
        self.rounds_in_window = 0;
        self.sample_sum = 0.0;
        self.sample_count = 0;

        let kind = self.choose(mean, flags);
        debug!(utilization = mean, chosen = %kind, "adaptation window closed");
        if kind == current.kind() {
            return None;
        }
        info!(from = %current.kind(), to = %kind, utilization = mean, "switching scheduling policy");
        Some(SchedulingPolicy::from_kind(kind, self.w1, self.w2))
    }

    /// Starvation-guard slack for a QoS hint: looser fairness when the system is stressed.
    pub fn guard_slack_for(&self, hint: QosHint) -> u64 {
        match hint.level {
            0 | 1 => self.window / 4,
            2 => 1,
            _ => 0,
        }
    }

    /// Windowed utilization means, oldest first.
    pub fn history(&self) -> Vec<f64> {
        self.history.iter().copied().collect()
    }

    pub fn last_utilization(&self) -> Option<f64> {
        self.history.latest().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AdaptationController {
        AdaptationController::new(&AdaptationConfig::default())
    }

    #[test]
    fn starts_performance_aware() {
        let c = controller();
        assert_eq!(
            c.initial_policy(),
            SchedulingPolicy::PerformanceAware { w1: 256, w2: 1 }
        );
    }

    #[test]
    fn selection_order() {
        let c = controller();
        let none = AdaptationFlags::default();
        let save = AdaptationFlags { power_save_mode: true, performance_boost: true };
        let boost = AdaptationFlags { power_save_mode: false, performance_boost: true };

        assert_eq!(c.choose(90.0, save), PolicyKind::RoundRobin);
        assert_eq!(c.choose(90.0, boost), PolicyKind::PerformanceAware);
        assert_eq!(c.choose(90.0, none), PolicyKind::LoadBalanced);
        assert_eq!(c.choose(10.0, none), PolicyKind::PriorityBased);
        assert_eq!(c.choose(50.0, none), PolicyKind::PerformanceAware);
        // Thresholds are strict.
        assert_eq!(c.choose(85.0, none), PolicyKind::PerformanceAware);
        assert_eq!(c.choose(15.0, none), PolicyKind::PerformanceAware);
    }

    #[test]
    fn switches_only_at_window_boundary() {
        let mut c = controller();
        let current = c.initial_policy();
        for _ in 0..15 {
            assert!(c.on_round(90.0, &current, AdaptationFlags::default()).is_none());
        }
        let next = c.on_round(90.0, &current, AdaptationFlags::default());
        assert_eq!(next, Some(SchedulingPolicy::LoadBalanced));
        assert_eq!(c.history(), vec![90.0]);
    }

    #[test]
    fn same_kind_yields_no_switch() {
        let mut c = controller();
        let current = c.initial_policy();
        for _ in 0..16 {
            assert!(c.on_round(50.0, &current, AdaptationFlags::default()).is_none());
        }
        assert_eq!(c.last_utilization(), Some(50.0));
    }

    #[test]
    fn window_mean_not_last_sample() {
        let mut c = controller();
        let current = c.initial_policy();
        for _ in 0..15 {
            c.on_round(95.0, &current, AdaptationFlags::default());
        }
        // mean = (15*95 + 0) / 16 = 89.06 > 85
        let next = c.on_round(0.0, &current, AdaptationFlags::default());
        assert_eq!(next.map(|p| p.kind()), Some(PolicyKind::LoadBalanced));
    }

    #[test]
    fn qos_hint_slack() {
        let c = controller();
        assert_eq!(c.guard_slack_for(QosHint { level: 0, escalation_count: 0 }), 4);
        assert_eq!(c.guard_slack_for(QosHint { level: 2, escalation_count: 3 }), 1);
        assert_eq!(c.guard_slack_for(QosHint { level: 4, escalation_count: 9 }), 0);
    }
}
