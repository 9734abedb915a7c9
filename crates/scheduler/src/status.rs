//! Worker status table: one contiguous slot per worker, addressed by index.

use serde::Serialize;

use hashgrid_core::{Round, WorkItem, WorkerId};

/// Lifecycle of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    /// Handed an item this round; becomes `Busy` at the next round boundary.
    Assigned,
    Busy,
    /// Reclaimed by the fault detector; returned to `Idle` in the same round.
    Faulted,
    /// Excluded by the security gate until reset.
    Unavailable,
}

/// Inclusive slice of the candidate space.
pub type SearchRange = (u64, u64);

/// State of one worker in the pool.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSlot {
    pub id: WorkerId,
    pub state: WorkerState,
    pub current_item: Option<WorkItem>,
    pub assigned_range: Option<SearchRange>,
    pub assigned_round: Option<Round>,
    /// Rolling load average reported by the worker (0-100).
    pub load_pct: f64,
    /// Exponential average of completion latency, in rounds.
    pub avg_completion_rounds: f64,
    pub security_ok: bool,
}

impl WorkerSlot {
    fn new(id: WorkerId) -> Self {
        Self {
            id,
            state: WorkerState::Idle,
            current_item: None,
            assigned_range: None,
            assigned_round: None,
            load_pct: 0.0,
            avg_completion_rounds: 0.0,
            security_ok: true,
        }
    }

    /// Assigned or Busy.
    pub fn is_active(&self) -> bool {
        matches!(self.state, WorkerState::Assigned | WorkerState::Busy)
    }

    /// Idle and trusted: the only slots a policy may select.
    pub fn is_eligible(&self) -> bool {
        self.state == WorkerState::Idle && self.security_ok
    }
}

/// Fixed-size table of worker slots.
#[derive(Debug, Clone)]
pub struct WorkerStatusTable {
    slots: Vec<WorkerSlot>,
    search_space: u64,
    partition_mode: bool,
}

impl WorkerStatusTable {
    pub fn new(workers: usize, search_space: u64, partition_mode: bool) -> Self {
        Self {
            slots: (0..workers).map(WorkerSlot::new).collect(),
            search_space,
            partition_mode,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: WorkerId) -> Option<&WorkerSlot> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut WorkerSlot> {
        self.slots.get_mut(id)
    }

    pub fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    pub fn eligible_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_eligible()).count()
    }

    /// Ids of active workers, highest id first.
    pub fn active_ids_descending(&self) -> Vec<WorkerId> {
        self.slots
            .iter()
            .rev()
            .filter(|s| s.is_active())
            .map(|s| s.id)
            .collect()
    }

    /// Mean `load_pct` over active workers, 0 when none are active.
    pub fn mean_active_load(&self) -> f64 {
        let (sum, count) = self
            .slots
            .iter()
            .filter(|s| s.is_active())
            .fold((0.0, 0usize), |(sum, n), s| (sum + s.load_pct, n + 1));
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Slice of the candidate space owned by a worker.
    pub fn range_for(&self, id: WorkerId) -> SearchRange {
        if !self.partition_mode || self.slots.is_empty() {
            return (0, self.search_space.saturating_sub(1));
        }
        let span = self.search_space / self.slots.len() as u64;
        let lo = id as u64 * span;
        // The last slot absorbs the remainder of an uneven split.
        let hi = if id + 1 == self.slots.len() {
            self.search_space - 1
        } else {
            lo + span - 1
        };
        (lo, hi)
    }

    /// Hand an item to an eligible worker. Returns the item back if the slot cannot take it.
    pub fn assign(&mut self, id: WorkerId, item: WorkItem, round: Round) -> Result<SearchRange, WorkItem> {
        let range = self.range_for(id);
        match self.slots.get_mut(id) {
            Some(slot) if slot.is_eligible() => {
                slot.state = WorkerState::Assigned;
                slot.current_item = Some(item);
                slot.assigned_range = Some(range);
                slot.assigned_round = Some(round);
                Ok(range)
            }
            _ => Err(item),
        }
    }

    /// Promote last round's assignments to Busy.
    pub fn promote_assigned(&mut self) -> usize {
        let mut promoted = 0;
        for slot in self.slots.iter_mut().filter(|s| s.state == WorkerState::Assigned) {
            slot.state = WorkerState::Busy;
            promoted += 1;
        }
        promoted
    }

    /// Clear a slot's assignment and move it to `next`. Returns the item it held.
    pub fn release(&mut self, id: WorkerId, next: WorkerState) -> Option<WorkItem> {
        let slot = self.slots.get_mut(id)?;
        slot.state = next;
        slot.assigned_range = None;
        slot.assigned_round = None;
        slot.current_item.take()
    }

    /// Whether active ranges are pairwise disjoint.
    pub fn ranges_disjoint(&self) -> bool {
        let mut ranges: Vec<SearchRange> = self
            .slots
            .iter()
            .filter(|s| s.is_active())
            .filter_map(|s| s.assigned_range)
            .collect();
        ranges.sort_unstable();
        ranges.windows(2).all(|w| w[0].1 < w[1].0)
    }
}
