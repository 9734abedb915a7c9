use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::work::{Round, Tier, WorkId, WorkItem, WorkerId};

/// Terminal outcome reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum Outcome {
    /// A qualifying result, opaque to the arbiter.
    Found(Vec<u8>),
    /// The assigned range was searched without a hit.
    Exhausted,
}

impl Outcome {
    pub fn is_found(&self) -> bool {
        matches!(self, Outcome::Found(_))
    }
}

/// Published exactly once per completed work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    pub work_id: WorkId,
    pub worker_id: WorkerId,
    pub tier: Tier,
    pub outcome: Outcome,
    pub submitted_round: Round,
    pub completion_round: Round,
    pub published_at: DateTime<Utc>,
}

impl WorkResult {
    pub fn for_item(item: &WorkItem, worker_id: WorkerId, outcome: Outcome, round: Round) -> Self {
        Self {
            work_id: item.id,
            worker_id,
            tier: item.tier,
            outcome,
            submitted_round: item.submitted_round,
            completion_round: round,
            published_at: Utc::now(),
        }
    }
}

/// Why an admitted item left the system without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Timed out on a worker twice.
    DroppedAfterRetries,
    /// Withdrawn by the submitter before assignment.
    Withdrawn,
    /// In flight when the pool was drained for shutdown.
    Drained,
    /// Reclaimed item found its tier queue and headroom full.
    DroppedQueueFull,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::DroppedAfterRetries => write!(f, "dropped_after_retries"),
            DropReason::Withdrawn => write!(f, "withdrawn"),
            DropReason::Drained => write!(f, "drained"),
            DropReason::DroppedQueueFull => write!(f, "dropped_queue_full"),
        }
    }
}

/// Terminal record for an item that will never produce a [`WorkResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropRecord {
    pub work_id: WorkId,
    pub tier: Tier,
    pub reason: DropReason,
    pub round: Round,
}

impl DropRecord {
    pub fn for_item(item: &WorkItem, reason: DropReason, round: Round) -> Self {
        Self {
            work_id: item.id,
            tier: item.tier,
            reason,
            round,
        }
    }
}
