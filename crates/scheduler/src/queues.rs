//! Bounded per-tier admission queues with a starvation guard.
//!
//! Producers push through [`AdmissionHandle::submit`] (or
//! [`PriorityAdmissionQueues::admit`]) from any thread; each tier sits behind
//! its own mutex. Only the controller pops.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use hashgrid_core::config::QueueConfig;
use hashgrid_core::{ArbiterError, Payload, Round, Tier, WorkId, WorkItem};

/// FIFO buffer for one tier.
#[derive(Debug)]
struct TierQueue {
    items: VecDeque<WorkItem>,
    capacity: usize,
    headroom: usize,
}

impl TierQueue {
    fn new(capacity: usize, headroom: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            headroom,
        }
    }
}

/// Tracks which tiers were serviced in the current adaptation window.
///
/// When the rounds left in the window are no more than the number of starved
/// tiers plus `slack`, the highest-priority starved tier wins over strict order.
#[derive(Debug, Clone)]
pub struct StarvationGuard {
    window: u64,
    round_in_window: u64,
    serviced: [bool; Tier::COUNT],
    slack: u64,
}

impl StarvationGuard {
    pub fn new(window: u64) -> Self {
        Self {
            window: window.max(1),
            round_in_window: 0,
            serviced: [false; Tier::COUNT],
            slack: window / 4,
        }
    }

    /// Pick the tier to service given current depths.
    pub fn choose(&self, depths: &[usize; Tier::COUNT]) -> Option<Tier> {
        self.overdue(depths)
            .or_else(|| Tier::ALL.iter().copied().find(|t| depths[t.index()] > 0))
    }

    /// Highest-priority starved tier, once the window is too short to wait any longer.
    pub fn overdue(&self, depths: &[usize; Tier::COUNT]) -> Option<Tier> {
        let mut starved = Tier::ALL
            .iter()
            .copied()
            .filter(|t| depths[t.index()] > 0 && !self.serviced[t.index()]);
        let first = starved.next()?;
        let starved_count = 1 + starved.count() as u64;
        let remaining = self.window - self.round_in_window;
        (remaining <= starved_count + self.slack).then_some(first)
    }

    pub fn mark_serviced(&mut self, tier: Tier) {
        self.serviced[tier.index()] = true;
    }

    pub fn was_serviced(&self, tier: Tier) -> bool {
        self.serviced[tier.index()]
    }

    /// Move to the next round; starts a fresh window at the boundary.
    pub fn advance_round(&mut self) {
        self.round_in_window += 1;
        if self.round_in_window >= self.window {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.round_in_window = 0;
        self.serviced = [false; Tier::COUNT];
    }

    pub fn set_slack(&mut self, slack: u64) {
        self.slack = slack;
    }

    pub fn slack(&self) -> u64 {
        self.slack
    }
}

/// Five bounded tier queues plus the consumer-side starvation guard.
#[derive(Debug)]
pub struct PriorityAdmissionQueues {
    tiers: [Mutex<TierQueue>; Tier::COUNT],
    guard: Mutex<StarvationGuard>,
    max_payload_bytes: usize,
}

/// Recover the guard from a poisoned lock; queue state stays consistent
/// because every critical section is a single VecDeque operation.
fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl PriorityAdmissionQueues {
    pub fn new(config: &QueueConfig, window_rounds: u64, max_payload_bytes: usize) -> Self {
        let tiers = Tier::ALL.map(|t| {
            Mutex::new(TierQueue::new(config.capacity_for(t), config.reclaim_headroom))
        });
        Self {
            tiers,
            guard: Mutex::new(StarvationGuard::new(window_rounds)),
            max_payload_bytes,
        }
    }

    /// Validate and enqueue at the tail of the item's tier.
    pub fn admit(&self, item: WorkItem) -> Result<(), ArbiterError> {
        item.payload.validate(self.max_payload_bytes)?;
        let tier = item.tier;
        let mut q = relock(&self.tiers[tier.index()]);
        if q.items.len() >= q.capacity {
            return Err(ArbiterError::AdmissionRejected { tier });
        }
        debug!(work_id = %item.id, %tier, depth = q.items.len() + 1, "admitted");
        q.items.push_back(item);
        Ok(())
    }

    /// Push a reclaimed item back at the head of its tier.
    ///
    /// May exceed capacity by the reclaim headroom. Hands the item back if even that is full.
    pub fn requeue_front(&self, item: WorkItem) -> Result<(), WorkItem> {
        let mut q = relock(&self.tiers[item.tier.index()]);
        if q.items.len() >= q.capacity + q.headroom {
            return Err(item);
        }
        q.items.push_front(item);
        Ok(())
    }

    /// Head of the highest-priority non-empty tier.
    pub fn peek_highest(&self) -> Option<WorkItem> {
        Tier::ALL
            .iter()
            .find_map(|t| relock(&self.tiers[t.index()]).items.front().cloned())
    }

    /// Id at the head of one tier.
    pub fn head_of(&self, tier: Tier) -> Option<WorkId> {
        relock(&self.tiers[tier.index()]).items.front().map(|i| i.id)
    }

    /// Remove and return the head of a tier.
    pub fn pop_from(&self, tier: Tier) -> Option<WorkItem> {
        let item = relock(&self.tiers[tier.index()]).items.pop_front();
        if item.is_some() {
            relock(&self.guard).mark_serviced(tier);
        }
        item
    }

    /// Tier the next pop should come from, starvation guard applied.
    pub fn next_tier(&self) -> Option<Tier> {
        let depths = self.depths();
        relock(&self.guard).choose(&depths)
    }

    /// Pop from the tier chosen by [`Self::next_tier`].
    pub fn pop_next(&self) -> Option<WorkItem> {
        let tier = self.next_tier()?;
        self.pop_from(tier)
    }

    /// Pop the longest-waiting head across all tiers, unless the starvation
    /// guard has a tier overdue.
    pub fn pop_oldest(&self) -> Option<WorkItem> {
        let depths = self.depths();
        let overdue = relock(&self.guard).overdue(&depths);
        let tier = match overdue {
            Some(tier) => tier,
            None => Tier::ALL
                .iter()
                .filter_map(|t| {
                    relock(&self.tiers[t.index()])
                        .items
                        .front()
                        .map(|i| (i.submitted_round, i.id, *t))
                })
                .min_by_key(|&(round, id, _)| (round, id))
                .map(|(_, _, tier)| tier)?,
        };
        self.pop_from(tier)
    }

    /// Remove a queued item by id.
    pub fn withdraw(&self, id: WorkId) -> Option<WorkItem> {
        for tier in Tier::ALL {
            let mut q = relock(&self.tiers[tier.index()]);
            if let Some(pos) = q.items.iter().position(|i| i.id == id) {
                return q.items.remove(pos);
            }
        }
        None
    }

    pub fn depths(&self) -> [usize; Tier::COUNT] {
        Tier::ALL.map(|t| relock(&self.tiers[t.index()]).items.len())
    }

    pub fn depth(&self, tier: Tier) -> usize {
        relock(&self.tiers[tier.index()]).items.len()
    }

    pub fn total_depth(&self) -> usize {
        self.depths().iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_depth() == 0
    }

    pub fn total_capacity(&self) -> usize {
        self.tiers.iter().map(|q| relock(q).capacity).sum()
    }

    /// Close the round for the starvation guard.
    ///
    /// A policy switch restarts the guard window here, after the round's
    /// selection, so an override due this round still runs.
    pub fn advance_round(&self, policy_switched: bool) {
        let mut guard = relock(&self.guard);
        guard.advance_round();
        if policy_switched {
            guard.reset();
        }
    }

    pub fn set_guard_slack(&self, slack: u64) {
        relock(&self.guard).set_slack(slack);
    }

    pub fn guard(&self) -> StarvationGuard {
        relock(&self.guard).clone()
    }
}

/// Cloneable producer handle: the work-intake API.
#[derive(Debug, Clone)]
pub struct AdmissionHandle {
    queues: Arc<PriorityAdmissionQueues>,
    next_id: Arc<AtomicU64>,
    round: Arc<AtomicU64>,
    lockdown: Arc<AtomicBool>,
}

impl AdmissionHandle {
    pub(crate) fn new(
        queues: Arc<PriorityAdmissionQueues>,
        next_id: Arc<AtomicU64>,
        round: Arc<AtomicU64>,
        lockdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queues,
            next_id,
            round,
            lockdown,
        }
    }

    /// Admit a payload at a tier. Never blocks.
    pub fn submit(&self, payload: Payload, tier: Tier) -> Result<WorkId, ArbiterError> {
        if self.lockdown.load(Ordering::Acquire) {
            return Err(ArbiterError::SecurityLockdown);
        }
        let id = WorkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let submitted_round: Round = self.round.load(Ordering::Relaxed);
        self.queues
            .admit(WorkItem::new(id, tier, payload, submitted_round))?;
        Ok(id)
    }

    pub fn lockdown_active(&self) -> bool {
        self.lockdown.load(Ordering::Acquire)
    }

    pub fn queue_depths(&self) -> [usize; Tier::COUNT] {
        self.queues.depths()
    }
}
