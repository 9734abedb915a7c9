//! Worker exclusion on tamper, violation counting, and lockdown.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use hashgrid_core::config::SecurityConfig;
use hashgrid_core::{WorkItem, WorkerId};

use crate::feeds::HealthReport;
use crate::status::{WorkerState, WorkerStatusTable};

/// What one batch of health reports changed.
#[derive(Debug, Default)]
pub struct SecurityOutcome {
    /// Workers newly marked untrusted.
    pub excluded: Vec<WorkerId>,
    /// In-flight items taken back from excluded workers, to be requeued at the head of their tier.
    pub reclaimed: Vec<WorkItem>,
    pub lockdown_raised: bool,
}

#[derive(Debug)]
pub struct SecurityGate {
    deviation_threshold: f64,
    lockdown_threshold: u32,
    violations: u32,
    lockdown: Arc<AtomicBool>,
    excluded: BTreeSet<WorkerId>,
}

impl SecurityGate {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            deviation_threshold: config.deviation_threshold,
            lockdown_threshold: config.lockdown_threshold.max(1),
            violations: 0,
            lockdown: Arc::new(AtomicBool::new(false)),
            excluded: BTreeSet::new(),
        }
    }

    /// Shared lockdown flag, also read by admission handles.
    pub fn lockdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.lockdown)
    }

    pub fn lockdown_active(&self) -> bool {
        self.lockdown.load(Ordering::Acquire)
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    /// Apply this round's health reports to the status table.
    pub fn apply(&mut self, reports: &[HealthReport], workers: &mut WorkerStatusTable) -> SecurityOutcome {
        let mut outcome = SecurityOutcome::default();
        for report in reports {
            let Some(slot) = workers.get(report.worker_id) else {
                warn!(worker_id = report.worker_id, "health report for unknown worker ignored");
                continue;
            };

            if report.deviation_score > self.deviation_threshold {
                debug!(
                    worker_id = report.worker_id,
                    score = report.deviation_score,
                    "behavioral deviation over threshold"
                );
                outcome.lockdown_raised |= self.count_violation();
            }

            if !report.tamper_detected || !slot.security_ok {
                continue;
            }

            let was_active = slot.is_active();
            if let Some(slot) = workers.get_mut(report.worker_id) {
                slot.security_ok = false;
            }
            let item = workers.release(report.worker_id, WorkerState::Unavailable);
            warn!(
                worker_id = report.worker_id,
                reclaimed = item.as_ref().map(|i| i.id.0),
                "tamper detected, worker excluded"
            );
            if was_active {
                outcome.reclaimed.extend(item);
            }
            self.excluded.insert(report.worker_id);
            outcome.excluded.push(report.worker_id);
            outcome.lockdown_raised |= self.count_violation();
        }
        outcome
    }

    /// A `Found` result failed redundant verification. Returns true if this raised lockdown.
    pub fn record_integrity_failure(&mut self, worker_id: WorkerId) -> bool {
        warn!(worker_id, "untrusted result rejected");
        self.count_violation()
    }

    fn count_violation(&mut self) -> bool {
        self.violations = self.violations.saturating_add(1);
        if self.violations >= self.lockdown_threshold && !self.lockdown_active() {
            self.lockdown.store(true, Ordering::Release);
            error!(
                violations = self.violations,
                threshold = self.lockdown_threshold,
                "security lockdown asserted, admission halted"
            );
            return true;
        }
        false
    }

    /// Clear lockdown and violations, and return every excluded worker to service.
    pub fn reset(&mut self, workers: &mut WorkerStatusTable) {
        let restored = self.excluded.len();
        for id in std::mem::take(&mut self.excluded) {
            if let Some(slot) = workers.get_mut(id) {
                slot.security_ok = true;
                if slot.state == WorkerState::Unavailable {
                    slot.state = WorkerState::Idle;
                }
            }
        }
        self.violations = 0;
        self.lockdown.store(false, Ordering::Release);
        info!(restored, "security state reset");
    }
}
