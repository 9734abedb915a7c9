use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use hashgrid_core::{DropReason, DropRecord, Round, Tier, WorkResult};

use crate::policy::PolicyKind;

// ── Ring buffer ──────────────────────────────────────────────────────

/// A fixed-size ring buffer backed by `VecDeque`.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: std::collections::VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: std::collections::VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Push an item, evicting the oldest if at capacity.
    pub fn push(&mut self, item: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Most recently pushed item.
    pub fn latest(&self) -> Option<&T> {
        self.buf.back()
    }

    /// Keep only the items matching `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.buf.retain(keep);
    }

    /// Iterate over items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

// ── Cumulative counters ──────────────────────────────────────────────

/// Controller operational metrics, cumulative since start.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerMetrics {
    pub rounds: u64,
    pub assigned_total: u64,
    pub found_total: u64,
    pub exhausted_total: u64,
    /// Terminal drops by reason.
    pub drops: HashMap<DropReason, u64>,
    pub worker_faults: u64,
    pub thermal_preemptions: u64,
    pub security_reclaims: u64,
    pub policy_switches: u64,
    pub current_policy: PolicyKind,
    /// Active workers / pool size after the last round (0.0 - 1.0).
    pub worker_utilization: f64,
    /// Completed items by tier.
    pub completed_per_tier: HashMap<Tier, u64>,
    /// Mean rounds from submission to completion, by tier.
    pub avg_turnaround_rounds: HashMap<Tier, f64>,
    /// Windowed utilization samples, oldest first.
    pub utilization_history: Vec<f64>,
    pub last_round_at: Option<DateTime<Utc>>,
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self {
            rounds: 0,
            assigned_total: 0,
            found_total: 0,
            exhausted_total: 0,
            drops: HashMap::new(),
            worker_faults: 0,
            thermal_preemptions: 0,
            security_reclaims: 0,
            policy_switches: 0,
            current_policy: PolicyKind::PerformanceAware,
            worker_utilization: 0.0,
            completed_per_tier: HashMap::new(),
            avg_turnaround_rounds: HashMap::new(),
            utilization_history: Vec::new(),
            last_round_at: None,
        }
    }
}

impl ControllerMetrics {
    /// Record a published result and fold its turnaround into the tier mean.
    pub fn record_result(&mut self, result: &WorkResult) {
        if result.outcome.is_found() {
            self.found_total += 1;
        } else {
            self.exhausted_total += 1;
        }

        let count = {
            let c = self.completed_per_tier.entry(result.tier).or_default();
            *c += 1;
            *c
        };

        // Incremental mean: new_avg = prev_avg + (x - prev_avg) / count
        let turnaround = result
            .completion_round
            .saturating_sub(result.submitted_round) as f64;
        let prev = self
            .avg_turnaround_rounds
            .get(&result.tier)
            .copied()
            .unwrap_or_default();
        let next = if count == 1 {
            turnaround
        } else {
            prev + (turnaround - prev) / count as f64
        };
        self.avg_turnaround_rounds.insert(result.tier, next);
    }

    pub fn record_drop(&mut self, drop: &DropRecord) {
        *self.drops.entry(drop.reason).or_default() += 1;
    }

    pub fn drops_for(&self, reason: DropReason) -> u64 {
        self.drops.get(&reason).copied().unwrap_or(0)
    }
}

// ── Per-round telemetry ──────────────────────────────────────────────

/// Snapshot published at the end of every round.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub round: Round,
    pub level: u8,
    pub active_count: usize,
    pub queue_depth_per_tier: [usize; Tier::COUNT],
    pub active_cap: usize,
    pub throttled: bool,
    pub lockdown: bool,
    pub policy: PolicyKind,
    pub estimated_power: f64,
    pub estimated_temp: f64,
    pub taken_at: DateTime<Utc>,
}
