//! Scheduling policies: one closed variant per pairing rule.

use serde::Serialize;

use hashgrid_core::{WorkItem, WorkerId};

use crate::queues::PriorityAdmissionQueues;
use crate::status::{WorkerSlot, WorkerStatusTable};

/// Discriminant of [`SchedulingPolicy`], for telemetry and comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    RoundRobin,
    LoadBalanced,
    PriorityBased,
    PerformanceAware,
}

impl PolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::RoundRobin => "round_robin",
            PolicyKind::LoadBalanced => "load_balanced",
            PolicyKind::PriorityBased => "priority_based",
            PolicyKind::PerformanceAware => "performance_aware",
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision rule pairing a queued item with an idle worker.
///
/// Replaced as a whole value by the adaptation controller; only the
/// round-robin cursor changes in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SchedulingPolicy {
    RoundRobin { cursor: WorkerId },
    LoadBalanced,
    PriorityBased,
    PerformanceAware { w1: u32, w2: u32 },
}

impl SchedulingPolicy {
    pub fn kind(&self) -> PolicyKind {
        match self {
            SchedulingPolicy::RoundRobin { .. } => PolicyKind::RoundRobin,
            SchedulingPolicy::LoadBalanced => PolicyKind::LoadBalanced,
            SchedulingPolicy::PriorityBased => PolicyKind::PriorityBased,
            SchedulingPolicy::PerformanceAware { .. } => PolicyKind::PerformanceAware,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Fresh policy value for a kind.
    pub fn from_kind(kind: PolicyKind, w1: u32, w2: u32) -> Self {
        match kind {
            PolicyKind::RoundRobin => SchedulingPolicy::RoundRobin { cursor: 0 },
            PolicyKind::LoadBalanced => SchedulingPolicy::LoadBalanced,
            PolicyKind::PriorityBased => SchedulingPolicy::PriorityBased,
            PolicyKind::PerformanceAware => SchedulingPolicy::PerformanceAware { w1, w2 },
        }
    }

    /// Pick the next (item, worker) pairing and remove the item from its queue.
    ///
    /// `None` when the queues are empty, no worker is eligible, or the active
    /// count has reached `thermal_cap`. Never returns an untrusted worker.
    pub fn select(
        &mut self,
        queues: &PriorityAdmissionQueues,
        workers: &WorkerStatusTable,
        thermal_cap: usize,
    ) -> Option<(WorkItem, WorkerId)> {
        if workers.active_count() >= thermal_cap || queues.is_empty() {
            return None;
        }

        let worker = match self {
            SchedulingPolicy::RoundRobin { cursor } => {
                let chosen = round_robin_worker(workers, *cursor)?;
                *cursor = (chosen + 1) % workers.len();
                chosen
            }
            SchedulingPolicy::LoadBalanced | SchedulingPolicy::PriorityBased => {
                least_loaded_worker(workers)?
            }
            SchedulingPolicy::PerformanceAware { w1, w2 } => {
                best_scored_worker(workers, *w1, *w2)?
            }
        };

        // Load balancing spreads work in arrival order; the others serve by tier.
        let item = match self {
            SchedulingPolicy::LoadBalanced => queues.pop_oldest()?,
            _ => queues.pop_next()?,
        };
        Some((item, worker))
    }
}

fn eligible(workers: &WorkerStatusTable) -> impl Iterator<Item = &WorkerSlot> {
    workers.slots().iter().filter(|s| s.is_eligible())
}

/// First eligible worker at or after `cursor`, wrapping.
fn round_robin_worker(workers: &WorkerStatusTable, cursor: WorkerId) -> Option<WorkerId> {
    let n = workers.len();
    if n == 0 {
        return None;
    }
    (0..n)
        .map(|i| (cursor + i) % n)
        .find(|id| workers.get(*id).is_some_and(WorkerSlot::is_eligible))
}

/// Minimum `load_pct`; ties go to the lowest id.
fn least_loaded_worker(workers: &WorkerStatusTable) -> Option<WorkerId> {
    eligible(workers)
        .min_by(|a, b| a.load_pct.total_cmp(&b.load_pct).then(a.id.cmp(&b.id)))
        .map(|s| s.id)
}

/// Minimum `load_pct * w1 + avg_completion_rounds * w2`; ties go to the lowest id.
fn best_scored_worker(workers: &WorkerStatusTable, w1: u32, w2: u32) -> Option<WorkerId> {
    let score = |s: &WorkerSlot| s.load_pct * f64::from(w1) + s.avg_completion_rounds * f64::from(w2);
    eligible(workers)
        .min_by(|a, b| score(a).total_cmp(&score(b)).then(a.id.cmp(&b.id)))
        .map(|s| s.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashgrid_core::config::QueueConfig;
    use hashgrid_core::{Payload, Tier, WorkId};

    fn setup(workers: usize) -> (PriorityAdmissionQueues, WorkerStatusTable) {
        (
            PriorityAdmissionQueues::new(&QueueConfig::default(), 16, 256),
            WorkerStatusTable::new(workers, 1 << 32, true),
        )
    }

    fn push(q: &PriorityAdmissionQueues, id: u64, tier: Tier) {
        q.admit(WorkItem::new(WorkId(id), tier, Payload::new(vec![1, 1]), 0))
            .unwrap();
    }

    #[test]
    fn empty_queue_selects_nothing() {
        let (q, w) = setup(4);
        let mut policy = SchedulingPolicy::LoadBalanced;
        assert!(policy.select(&q, &w, 4).is_none());
    }

    #[test]
    fn round_robin_advances_cursor() {
        let (q, w) = setup(4);
        push(&q, 1, Tier::Low);
        push(&q, 2, Tier::Low);
        let mut policy = SchedulingPolicy::RoundRobin { cursor: 3 };

        let (item, worker) = policy.select(&q, &w, 4).unwrap();
        assert_eq!((item.id, worker), (WorkId(1), 3));
        assert_eq!(policy, SchedulingPolicy::RoundRobin { cursor: 0 });
    }

    #[test]
    fn round_robin_skips_untrusted() {
        let (q, mut w) = setup(3);
        push(&q, 1, Tier::Low);
        w.get_mut(0).unwrap().security_ok = false;
        let mut policy = SchedulingPolicy::RoundRobin { cursor: 0 };
        let (_, worker) = policy.select(&q, &w, 3).unwrap();
        assert_eq!(worker, 1);
    }

    #[test]
    fn load_balanced_min_load_lowest_id() {
        let (q, mut w) = setup(4);
        push(&q, 1, Tier::Medium);
        w.get_mut(0).unwrap().load_pct = 50.0;
        w.get_mut(1).unwrap().load_pct = 10.0;
        w.get_mut(2).unwrap().load_pct = 10.0;
        w.get_mut(3).unwrap().load_pct = 30.0;
        let mut policy = SchedulingPolicy::LoadBalanced;
        let (_, worker) = policy.select(&q, &w, 4).unwrap();
        assert_eq!(worker, 1);
    }

    #[test]
    fn priority_based_takes_highest_tier() {
        let (q, w) = setup(2);
        push(&q, 1, Tier::Background);
        push(&q, 2, Tier::High);
        let mut policy = SchedulingPolicy::PriorityBased;
        let (item, _) = policy.select(&q, &w, 2).unwrap();
        assert_eq!(item.id, WorkId(2));
    }

    #[test]
    fn load_balanced_and_priority_based_order_items_differently() {
        let drain = |mut policy: SchedulingPolicy| {
            let (q, mut w) = setup(5);
            let arrivals = [
                (1, Tier::Low),
                (2, Tier::Background),
                (3, Tier::Critical),
                (4, Tier::Medium),
            ];
            for (id, tier) in arrivals {
                push(&q, id, tier);
            }
            for (id, load) in [(0, 40.0), (1, 10.0), (2, 30.0), (3, 20.0), (4, 50.0)] {
                w.get_mut(id).unwrap().load_pct = load;
            }
            let mut picks = Vec::new();
            while let Some((item, worker)) = policy.select(&q, &w, 5) {
                picks.push((item.id.0, worker));
                w.assign(worker, item, 0).unwrap();
            }
            picks
        };

        assert_eq!(
            drain(SchedulingPolicy::LoadBalanced),
            vec![(1, 1), (2, 3), (3, 2), (4, 0)]
        );
        assert_eq!(
            drain(SchedulingPolicy::PriorityBased),
            vec![(3, 1), (4, 3), (1, 2), (2, 0)]
        );
    }

    #[test]
    fn performance_aware_scores() {
        let (q, mut w) = setup(3);
        push(&q, 1, Tier::Medium);
        // 10*256 + 5 = 2565
        w.get_mut(0).unwrap().load_pct = 10.0;
        w.get_mut(0).unwrap().avg_completion_rounds = 5.0;
        // 9*256 + 300 = 2604
        w.get_mut(1).unwrap().load_pct = 9.0;
        w.get_mut(1).unwrap().avg_completion_rounds = 300.0;
        // 20*256 = 5120
        w.get_mut(2).unwrap().load_pct = 20.0;
        let mut policy = SchedulingPolicy::PerformanceAware { w1: 256, w2: 1 };
        let (_, worker) = policy.select(&q, &w, 3).unwrap();
        assert_eq!(worker, 0);
    }

    #[test]
    fn cap_saturated_returns_none() {
        let (q, mut w) = setup(3);
        push(&q, 1, Tier::Medium);
        push(&q, 2, Tier::Medium);
        w.assign(0, WorkItem::new(WorkId(9), Tier::Low, Payload::new(vec![3]), 0), 0)
            .unwrap();
        let mut policy = SchedulingPolicy::LoadBalanced;
        assert!(policy.select(&q, &w, 1).is_none());
        assert_eq!(q.total_depth(), 2);
    }

    #[test]
    fn no_eligible_worker_keeps_item_queued() {
        let (q, mut w) = setup(2);
        push(&q, 1, Tier::Medium);
        w.get_mut(0).unwrap().security_ok = false;
        w.get_mut(1).unwrap().security_ok = false;
        for mut policy in [
            SchedulingPolicy::RoundRobin { cursor: 0 },
            SchedulingPolicy::LoadBalanced,
            SchedulingPolicy::PriorityBased,
            SchedulingPolicy::PerformanceAware { w1: 256, w2: 1 },
        ] {
            assert!(policy.select(&q, &w, 2).is_none());
        }
        assert_eq!(q.total_depth(), 1);
    }

    #[test]
    fn from_kind_round_trip() {
        for kind in [
            PolicyKind::RoundRobin,
            PolicyKind::LoadBalanced,
            PolicyKind::PriorityBased,
            PolicyKind::PerformanceAware,
        ] {
            assert_eq!(SchedulingPolicy::from_kind(kind, 256, 1).kind(), kind);
        }
    }
}
