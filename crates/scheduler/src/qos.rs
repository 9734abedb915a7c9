//! Service-level tracking: QoS level, SLA violations, hints for adaptation.

use serde::Serialize;
use tracing::{debug, warn};

use hashgrid_core::config::QosConfig;

/// Highest QoS level; only reachable in emergency mode.
pub const MAX_LEVEL: u8 = 4;

/// Recomputed every round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QosState {
    pub level: u8,
    pub violation_count: u64,
    pub escalation_count: u64,
    /// Mean of backlog and active percentages, 0-100.
    pub load_factor: f64,
}

/// What the adaptation controller needs from QoS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QosHint {
    pub level: u8,
    pub escalation_count: u64,
}

#[derive(Debug, Clone)]
pub struct QoSManager {
    sla_backlog: usize,
    sla_window_rounds: u32,
    queue_capacity: usize,
    over_sla_rounds: u32,
    state: QosState,
}

impl QoSManager {
    pub fn new(config: &QosConfig, queue_capacity: usize) -> Self {
        Self {
            sla_backlog: config.sla_backlog,
            sla_window_rounds: config.sla_window_rounds.max(1),
            queue_capacity,
            over_sla_rounds: 0,
            state: QosState::default(),
        }
    }

    pub fn state(&self) -> QosState {
        self.state
    }

    pub fn hint(&self) -> QosHint {
        QosHint {
            level: self.state.level,
            escalation_count: self.state.escalation_count,
        }
    }

    /// Fold one round of observations into the QoS state.
    pub fn update(&mut self, backlog: usize, active: usize, total: usize, emergency_mode: bool) -> QosHint {
        let backlog_pct = percent(backlog, self.queue_capacity);
        let active_pct = percent(active, total);
        self.state.load_factor = (backlog_pct + active_pct) / 2.0;

        let mut violated = false;
        if backlog > self.sla_backlog {
            self.over_sla_rounds += 1;
            if self.over_sla_rounds >= self.sla_window_rounds {
                self.state.violation_count += 1;
                self.over_sla_rounds = 0;
                violated = true;
                warn!(
                    backlog,
                    sla_backlog = self.sla_backlog,
                    violations = self.state.violation_count,
                    "SLA violation: backlog over limit"
                );
            }
        } else {
            self.over_sla_rounds = 0;
        }

        let current = self.state.level;
        let target = if emergency_mode {
            MAX_LEVEL
        } else if violated {
            (current + 1).min(MAX_LEVEL)
        } else {
            band(self.state.load_factor)
        };

        if target > current {
            self.state.level = current + 1;
            self.state.escalation_count += 1;
            debug!(level = self.state.level, target, "QoS level raised");
        } else if target < current {
            self.state.level = current - 1;
            debug!(level = self.state.level, target, "QoS level lowered");
        }

        self.hint()
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 100.0).min(100.0)
    }
}

/// Level for a load factor outside emergency mode: 20-point bands, capped at 3.
fn band(load_factor: f64) -> u8 {
    match load_factor {
        f if f < 20.0 => 0,
        f if f < 40.0 => 1,
        f if f < 60.0 => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> QoSManager {
        let config = QosConfig {
            sla_backlog: 100,
            sla_window_rounds: 3,
            emergency_mode: false,
        };
        QoSManager::new(&config, 1000)
    }

    #[test]
    fn load_factor_averages_backlog_and_active() {
        let mut q = manager();
        q.update(500, 30, 100, false);
        assert!((q.state().load_factor - 40.0).abs() < 1e-9);
    }

    #[test]
    fn level_moves_one_step_per_round() {
        let mut q = manager();
        // load factor (0 + 100) / 2 = 50 -> target 2
        q.update(0, 100, 100, false);
        assert_eq!(q.state().level, 1);
        q.update(0, 100, 100, false);
        assert_eq!(q.state().level, 2);
        q.update(0, 100, 100, false);
        assert_eq!(q.state().level, 2);
        assert_eq!(q.state().escalation_count, 2);

        q.update(0, 0, 100, false);
        assert_eq!(q.state().level, 1);
        assert_eq!(q.state().escalation_count, 2);
    }

    #[test]
    fn level_four_needs_emergency() {
        let mut q = manager();
        for _ in 0..10 {
            q.update(1000, 100, 100, false);
        }
        assert_eq!(q.state().level, 3);
        q.update(1000, 100, 100, true);
        assert_eq!(q.state().level, 4);
    }

    #[test]
    fn sla_violation_after_consecutive_rounds() {
        let mut q = manager();
        q.update(101, 0, 100, false);
        q.update(101, 0, 100, false);
        assert_eq!(q.state().violation_count, 0);
        q.update(101, 0, 100, false);
        assert_eq!(q.state().violation_count, 1);
    }

    #[test]
    fn sla_streak_resets_when_backlog_recovers() {
        let mut q = manager();
        q.update(101, 0, 100, false);
        q.update(101, 0, 100, false);
        q.update(50, 0, 100, false);
        q.update(101, 0, 100, false);
        assert_eq!(q.state().violation_count, 0);
    }

    #[test]
    fn empty_pool_does_not_divide_by_zero() {
        let mut q = QoSManager::new(&QosConfig::default(), 0);
        let hint = q.update(0, 0, 0, false);
        assert_eq!(hint.level, 0);
        assert_eq!(q.state().load_factor, 0.0);
    }
}
