use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use hashgrid_core::config::ThermalReclaim;
use hashgrid_core::{
    DropReason, DropRecord, Outcome, Payload, Round, Tier, WorkId, WorkItem, WorkResult, WorkerId,
};

use crate::metrics::TelemetrySnapshot;
use crate::policy::PolicyKind;
use crate::status::{SearchRange, WorkerState};

use super::core::Controller;

/// An item handed to a worker this round. The worker should search `range` for `payload`.
#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub worker_id: WorkerId,
    pub work_id: WorkId,
    pub tier: Tier,
    pub range: SearchRange,
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicySwitch {
    pub from: PolicyKind,
    pub to: PolicyKind,
}

/// Everything one round decided.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub round: Round,
    pub assignments: Vec<Assignment>,
    /// Every result published this round, `Found` and `Exhausted`.
    pub results: Vec<WorkResult>,
    pub drops: Vec<DropRecord>,
    /// Items pushed back to the head of their tier.
    pub requeued: Vec<WorkId>,
    pub faulted: Vec<WorkerId>,
    pub excluded: Vec<WorkerId>,
    pub forced_idle: Vec<WorkerId>,
    pub policy_switch: Option<PolicySwitch>,
    pub lockdown_raised: bool,
    pub telemetry: TelemetrySnapshot,
}

/// Partial report accumulated while the round runs.
#[derive(Default)]
struct RoundLog {
    assignments: Vec<Assignment>,
    results: Vec<WorkResult>,
    drops: Vec<DropRecord>,
    requeued: Vec<WorkId>,
    faulted: Vec<WorkerId>,
    excluded: Vec<WorkerId>,
    forced_idle: Vec<WorkerId>,
    policy_switch: Option<PolicySwitch>,
    lockdown_raised: bool,
}

impl Controller {
    /// Run one decision round.
    ///
    /// Order: promote last round's assignments; collect completions and
    /// detect faults; apply security transitions; recompute the thermal cap
    /// and shed workers above it; let adaptation swap the policy; assign
    /// until the policy returns nothing; update QoS and publish telemetry.
    pub fn run_round(&mut self) -> RoundReport {
        self.round += 1;
        let round = self.round;
        self.round_counter
            .store(round, std::sync::atomic::Ordering::Relaxed);
        let mut log = RoundLog::default();

        // 0. Promote
        self.workers.promote_assigned();

        // 1. Completions, then faults
        let snapshot = self.inbox.snapshot();
        for worker_id in self.collector.record_verdicts(snapshot.integrity, &self.workers) {
            log.lockdown_raised |= self.security.record_integrity_failure(worker_id);
        }
        let collected = self
            .collector
            .poll(snapshot.completions, &mut self.workers, round);
        for worker_id in collected.untrusted {
            log.lockdown_raised |= self.security.record_integrity_failure(worker_id);
        }
        for result in collected.results {
            self.publish(result, &mut log);
        }
        self.detect_faults(round, &mut log);

        // 2. Security
        let security = self.security.apply(&snapshot.health, &mut self.workers);
        log.lockdown_raised |= security.lockdown_raised;
        log.excluded = security.excluded;
        let reclaimed = security.reclaimed.len() as u64;
        for item in security.reclaimed {
            self.requeue_or_drop(item, round, &mut log);
        }

        // 3. Thermal / power
        let thermal = self
            .thermal
            .recompute(self.workers.active_count(), snapshot.sensor);
        let forced = self.thermal.forced_deactivations(&self.workers);
        for worker_id in &forced {
            let Some(item) = self.workers.release(*worker_id, WorkerState::Idle) else {
                continue;
            };
            debug!(worker_id, work_id = %item.id, "thermal preemption");
            match self.config.thermal.reclaim {
                ThermalReclaim::Drop => {
                    self.collector.forget(item.id);
                    let result = WorkResult::for_item(&item, *worker_id, Outcome::Exhausted, round);
                    self.publish(result, &mut log);
                }
                ThermalReclaim::Requeue => self.requeue_or_drop(item, round, &mut log),
            }
        }
        if !forced.is_empty() {
            warn!(
                shed = forced.len(),
                active_cap = thermal.active_cap,
                "workers forced idle by power/thermal cap"
            );
        }
        log.forced_idle = forced;

        // 4. Adaptation
        let utilization = self.workers.mean_active_load();
        if let Some(next) =
            self.adaptation
                .on_round(utilization, &self.policy, self.modes.adaptation())
        {
            log.policy_switch = Some(PolicySwitch {
                from: self.policy.kind(),
                to: next.kind(),
            });
            self.policy = next;
        }

        // 5. Selection
        let cap = self.thermal.state().active_cap;
        while let Some((item, worker_id)) = self.policy.select(&self.queues, &self.workers, cap) {
            let work_id = item.id;
            let tier = item.tier;
            let payload = item.payload.clone();
            match self.workers.assign(worker_id, item, round) {
                Ok(range) => log.assignments.push(Assignment {
                    worker_id,
                    work_id,
                    tier,
                    range,
                    payload,
                }),
                Err(item) => {
                    warn!(worker_id, work_id = %work_id, "selected worker refused assignment");
                    self.requeue_or_drop(item, round, &mut log);
                    break;
                }
            }
        }

        // 6. QoS
        let active = self.workers.active_count();
        let hint = self.qos.update(
            self.queues.total_depth(),
            active,
            self.workers.len(),
            self.modes.emergency(),
        );
        self.queues
            .set_guard_slack(self.adaptation.guard_slack_for(hint));
        self.queues.advance_round(log.policy_switch.is_some());
        self.collector.retain_in_flight(&self.workers);

        let telemetry = TelemetrySnapshot {
            round,
            level: hint.level,
            active_count: active,
            queue_depth_per_tier: self.queues.depths(),
            active_cap: self.thermal.state().active_cap,
            throttled: thermal.throttled,
            lockdown: self.security.lockdown_active(),
            policy: self.policy.kind(),
            estimated_power: thermal.estimated_power,
            estimated_temp: thermal.estimated_temp,
            taken_at: Utc::now(),
        };

        self.update_metrics(&log, reclaimed, &telemetry);
        if log.lockdown_raised || !log.assignments.is_empty() || !log.results.is_empty() {
            debug!(
                round,
                assigned = log.assignments.len(),
                results = log.results.len(),
                drops = log.drops.len(),
                active,
                policy = %telemetry.policy,
                "round complete"
            );
        }
        self.last_telemetry = Some(telemetry.clone());

        RoundReport {
            round,
            assignments: log.assignments,
            results: log.results,
            drops: log.drops,
            requeued: log.requeued,
            faulted: log.faulted,
            excluded: log.excluded,
            forced_idle: log.forced_idle,
            policy_switch: log.policy_switch,
            lockdown_raised: log.lockdown_raised,
            telemetry,
        }
    }

    /// Reclaim active workers that ran past their timeout.
    fn detect_faults(&mut self, round: Round, log: &mut RoundLog) {
        let factor = self.config.pool.fault_timeout_factor;
        let min_rounds = self.config.pool.fault_min_rounds;
        let timed_out: Vec<WorkerId> = self
            .workers
            .slots()
            .iter()
            .filter(|s| s.is_active())
            .filter(|s| {
                let timeout = ((s.avg_completion_rounds * factor).ceil() as u64).max(min_rounds);
                let elapsed = s.assigned_round.map_or(0, |r| round.saturating_sub(r));
                elapsed > timeout
            })
            .map(|s| s.id)
            .collect();

        for worker_id in timed_out {
            let item = self.workers.release(worker_id, WorkerState::Faulted);
            if let Some(slot) = self.workers.get_mut(worker_id) {
                slot.state = WorkerState::Idle;
            }
            log.faulted.push(worker_id);
            let Some(item) = item else { continue };

            let retries = self.fault_retries.entry(item.id).or_insert(0);
            *retries += 1;
            if *retries > 1 {
                warn!(worker_id, work_id = %item.id, "worker fault on retried item, dropping");
                self.record_drop(&item, DropReason::DroppedAfterRetries, round, log);
            } else {
                warn!(worker_id, work_id = %item.id, "worker fault, requeueing item");
                self.requeue_or_drop(item, round, log);
            }
        }
    }

    /// Push a reclaimed item to the head of its tier, or record a drop if even the headroom is full.
    fn requeue_or_drop(&mut self, item: WorkItem, round: Round, log: &mut RoundLog) {
        let work_id = item.id;
        self.collector.forget(work_id);
        match self.queues.requeue_front(item) {
            Ok(()) => log.requeued.push(work_id),
            Err(item) => {
                warn!(work_id = %work_id, tier = %item.tier, "reclaim headroom exhausted, dropping item");
                self.record_drop(&item, DropReason::DroppedQueueFull, round, log);
            }
        }
    }

    fn record_drop(&mut self, item: &WorkItem, reason: DropReason, round: Round, log: &mut RoundLog) {
        self.fault_retries.remove(&item.id);
        self.collector.forget(item.id);
        log.drops.push(DropRecord::for_item(item, reason, round));
    }

    fn publish(&mut self, result: WorkResult, log: &mut RoundLog) {
        self.fault_retries.remove(&result.work_id);
        if result.outcome.is_found() && self.found_tx.send(result.clone()).is_err() {
            debug!(work_id = %result.work_id, "no subscriber for found results");
        }
        log.results.push(result);
    }

    fn update_metrics(
        &self,
        log: &RoundLog,
        security_reclaims: u64,
        telemetry: &TelemetrySnapshot,
    ) {
        let Ok(mut m) = self.metrics.write() else {
            return;
        };
        m.rounds += 1;
        m.assigned_total += log.assignments.len() as u64;
        for result in &log.results {
            m.record_result(result);
        }
        for drop in &log.drops {
            m.record_drop(drop);
        }
        m.worker_faults += log.faulted.len() as u64;
        m.thermal_preemptions += log.forced_idle.len() as u64;
        m.security_reclaims += security_reclaims;
        if log.policy_switch.is_some() {
            m.policy_switches += 1;
        }
        m.current_policy = telemetry.policy;
        m.worker_utilization = if self.workers.is_empty() {
            0.0
        } else {
            telemetry.active_count as f64 / self.workers.len() as f64
        };
        if self.adaptation.last_utilization().is_some() {
            m.utilization_history = self.adaptation.history();
        }
        m.last_round_at = Some(telemetry.taken_at);
    }

    /// Record drops that happen outside a round (withdraw, drain).
    pub(super) fn record_external_drops(&mut self, drops: &[DropRecord]) {
        if let Ok(mut m) = self.metrics.write() {
            for drop in drops {
                m.record_drop(drop);
            }
        }
    }
}
