use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use hashgrid_core::{ArbiterError, DropReason, DropRecord, WorkId};

use crate::status::WorkerState;

use super::core::Controller;

impl Controller {
    /// Remove a queued item before it is assigned.
    pub fn withdraw(&mut self, work_id: WorkId) -> Result<DropRecord, ArbiterError> {
        let item = self
            .queues
            .withdraw(work_id)
            .ok_or(ArbiterError::UnknownWorkItem(work_id.0))?;
        self.fault_retries.remove(&item.id);
        self.collector.forget(item.id);
        let drop = DropRecord::for_item(&item, DropReason::Withdrawn, self.round);
        info!(work_id = %work_id, tier = %item.tier, "work item withdrawn");
        self.record_external_drops(std::slice::from_ref(&drop));
        Ok(drop)
    }

    /// Return every active worker to Idle without requeueing its item.
    ///
    /// Queued items are untouched.
    pub fn drain(&mut self) -> Vec<DropRecord> {
        let active = self.workers.active_ids_descending();
        let mut drops = Vec::with_capacity(active.len());
        for worker_id in active.into_iter().rev() {
            if let Some(item) = self.workers.release(worker_id, WorkerState::Idle) {
                self.fault_retries.remove(&item.id);
                self.collector.forget(item.id);
                drops.push(DropRecord::for_item(&item, DropReason::Drained, self.round));
            }
        }
        if !drops.is_empty() {
            warn!(drained = drops.len(), "in-flight work drained");
        }
        self.record_external_drops(&drops);
        drops
    }

    /// Clear lockdown and restore every excluded worker.
    pub fn reset_security(&mut self) {
        self.security.reset(&mut self.workers);
    }

    /// Tick rounds on the configured interval until `shutdown` resolves or
    /// lockdown is asserted. Returns the number of rounds run.
    ///
    /// Each [`RoundReport`](super::RoundReport) goes to the subscriber
    /// registered with [`Controller::subscribe_reports`], if any.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<u64, ArbiterError>
    where
        F: Future<Output = ()>,
    {
        let interval = Duration::from_millis(self.config.pool.round_interval_ms.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_ms = interval.as_millis() as u64, "controller loop starting");
        let start = self.round;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(rounds = self.round - start, "controller loop stopped");
                    return Ok(self.round - start);
                }
                _ = ticker.tick() => {
                    let report = self.run_round();
                    let delivered = self.report_tx.as_ref().map(|tx| tx.send(report).is_ok());
                    if delivered == Some(false) {
                        warn!("report subscriber dropped");
                        self.report_tx = None;
                    }
                    if self.security.lockdown_active() {
                        error!(round = self.round, "stopping controller loop: security lockdown");
                        return Err(ArbiterError::SecurityLockdown);
                    }
                }
            }
        }
    }
}
