//! Turns worker completions into published results and frees the workers.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};

use hashgrid_core::{Outcome, Round, WorkId, WorkResult, WorkerId};

use crate::feeds::Completion;
use crate::metrics::RingBuffer;
use crate::status::{WorkerState, WorkerStatusTable};

/// Published `Found` results a late integrity verdict can still be charged to.
const RECENT_FOUND: usize = 64;

/// Results of one poll.
#[derive(Debug, Default)]
pub struct Collected {
    pub results: Vec<WorkResult>,
    /// Workers whose `Found` failed integrity verification.
    pub untrusted: Vec<WorkerId>,
    /// Completions that did not match the worker's current assignment.
    pub stale: usize,
}

#[derive(Debug, Clone)]
pub struct ResultCollector {
    /// Last serviced slot; the next poll starts after it.
    cursor: Option<WorkerId>,
    alpha: f64,
    /// Integrity verdicts for in-flight items, awaiting their completion.
    verdicts: HashMap<WorkId, bool>,
    recent_found: RingBuffer<(WorkId, WorkerId)>,
}

impl ResultCollector {
    pub fn new(alpha: f64) -> Self {
        Self {
            cursor: None,
            alpha: alpha.clamp(0.0, 1.0),
            verdicts: HashMap::new(),
            recent_found: RingBuffer::new(RECENT_FOUND),
        }
    }

    pub fn cursor(&self) -> Option<WorkerId> {
        self.cursor
    }

    pub fn pending_verdicts(&self) -> usize {
        self.verdicts.len()
    }

    /// Hold verdicts for in-flight items until their completion is polled.
    ///
    /// A failed verdict for a `Found` that was already published cannot
    /// gate it any more; the worker that produced it is returned so the
    /// failure still counts against it. Anything else is discarded.
    pub fn record_verdicts(
        &mut self,
        verdicts: HashMap<WorkId, bool>,
        workers: &WorkerStatusTable,
    ) -> Vec<WorkerId> {
        if verdicts.is_empty() {
            return Vec::new();
        }
        let in_flight = in_flight_ids(workers);
        let mut late_failures = Vec::new();
        for (work_id, valid) in verdicts {
            if in_flight.contains(&work_id) {
                self.verdicts.insert(work_id, valid);
                continue;
            }
            let published = self
                .recent_found
                .iter()
                .find(|(id, _)| *id == work_id)
                .map(|(_, worker)| *worker);
            match published {
                Some(worker_id) if !valid => {
                    warn!(
                        worker_id,
                        work_id = %work_id,
                        "integrity failure for an already published result"
                    );
                    self.recent_found.retain(|(id, _)| *id != work_id);
                    late_failures.push(worker_id);
                }
                _ => debug!(work_id = %work_id, valid, "verdict for item not in flight discarded"),
            }
        }
        late_failures
    }

    /// Forget a verdict for an item that left the system without completing.
    pub fn forget(&mut self, work_id: WorkId) {
        self.verdicts.remove(&work_id);
    }

    /// Drop verdicts whose item no longer sits on an active worker.
    pub fn retain_in_flight(&mut self, workers: &WorkerStatusTable) {
        if self.verdicts.is_empty() {
            return;
        }
        let in_flight = in_flight_ids(workers);
        self.verdicts.retain(|id, _| in_flight.contains(id));
    }

    /// Accept this round's completions in round-robin slot order.
    ///
    /// Polling with no completions changes nothing.
    pub fn poll(
        &mut self,
        completions: Vec<Completion>,
        workers: &mut WorkerStatusTable,
        round: Round,
    ) -> Collected {
        let mut out = Collected::default();
        if completions.is_empty() || workers.is_empty() {
            return out;
        }

        let n = workers.len();
        let mut by_worker: BTreeMap<WorkerId, Vec<Completion>> = BTreeMap::new();
        for c in completions {
            if c.worker_id >= n {
                warn!(worker_id = c.worker_id, "completion from unknown worker discarded");
                out.stale += 1;
                continue;
            }
            by_worker.entry(c.worker_id).or_default().push(c);
        }

        let start = self.cursor.map_or(0, |c| (c + 1) % n);
        let order: Vec<WorkerId> = by_worker
            .range(start..)
            .chain(by_worker.range(..start))
            .map(|(id, _)| *id)
            .collect();

        for worker_id in order {
            let Some(reports) = by_worker.remove(&worker_id) else {
                continue;
            };
            for completion in reports {
                match self.accept(completion, workers, round) {
                    Some((result, trusted)) => {
                        if !trusted {
                            out.untrusted.push(worker_id);
                        }
                        out.results.push(result);
                        self.cursor = Some(worker_id);
                    }
                    None => out.stale += 1,
                }
            }
        }
        out
    }

    fn accept(
        &mut self,
        completion: Completion,
        workers: &mut WorkerStatusTable,
        round: Round,
    ) -> Option<(WorkResult, bool)> {
        let slot = workers.get(completion.worker_id)?;
        let matches = slot.is_active()
            && slot
                .current_item
                .as_ref()
                .is_some_and(|i| i.id == completion.work_id);
        if !matches {
            debug!(
                worker_id = completion.worker_id,
                work_id = %completion.work_id,
                "stale completion discarded"
            );
            return None;
        }
        let elapsed = slot
            .assigned_round
            .map_or(0, |r| round.saturating_sub(r)) as f64;

        let item = workers.release(completion.worker_id, WorkerState::Idle)?;
        if let Some(slot) = workers.get_mut(completion.worker_id) {
            slot.load_pct = completion.load_pct.clamp(0.0, 100.0);
            slot.avg_completion_rounds = if slot.avg_completion_rounds == 0.0 {
                elapsed
            } else {
                self.alpha * elapsed + (1.0 - self.alpha) * slot.avg_completion_rounds
            };
        }

        let verdict = self.verdicts.remove(&item.id);
        let (outcome, trusted) = match completion.outcome {
            Outcome::Found(_) if verdict == Some(false) => (Outcome::Exhausted, false),
            other => (other, true),
        };
        let result = WorkResult::for_item(&item, completion.worker_id, outcome, round);
        if result.outcome.is_found() {
            self.recent_found.push((item.id, completion.worker_id));
        }
        debug!(
            worker_id = completion.worker_id,
            work_id = %item.id,
            found = result.outcome.is_found(),
            "result published"
        );
        Some((result, trusted))
    }
}

fn in_flight_ids(workers: &WorkerStatusTable) -> HashSet<WorkId> {
    workers
        .slots()
        .iter()
        .filter(|s| s.is_active())
        .filter_map(|s| s.current_item.as_ref().map(|i| i.id))
        .collect()
}
