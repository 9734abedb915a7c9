//! Asynchronous report channels, snapshotted at round boundaries.
//!
//! Workers, monitors and sensors push through a cloneable [`FeedSenders`];
//! the controller owns the matching [`FeedInbox`] and drains it with
//! `try_recv` once per round, so nothing a producer does can change state
//! mid-round.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use hashgrid_core::config::AdaptationConfig;
use hashgrid_core::{Outcome, WorkId, WorkerId};

use crate::adaptation::AdaptationFlags;

/// A worker finished its assigned item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub worker_id: WorkerId,
    pub work_id: WorkId,
    pub outcome: Outcome,
    /// Worker's rolling load average at completion time (0-100).
    pub load_pct: f64,
}

/// Per-worker health report from the security monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub worker_id: WorkerId,
    pub tamper_detected: bool,
    pub deviation_score: f64,
}

/// Measured power and temperature; overrides the governor's model for one round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub estimated_power: f64,
    pub estimated_temp: f64,
}

/// Pass/fail verdict from the redundant-execution voter for a `Found` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegritySignal {
    pub work_id: WorkId,
    pub valid: bool,
}

/// Everything that arrived since the previous round.
#[derive(Debug, Default)]
pub struct FeedSnapshot {
    pub completions: Vec<Completion>,
    pub health: Vec<HealthReport>,
    /// Latest reading only.
    pub sensor: Option<SensorReading>,
    pub integrity: HashMap<WorkId, bool>,
}

impl FeedSnapshot {
    pub fn is_empty(&self) -> bool {
        self.completions.is_empty()
            && self.health.is_empty()
            && self.sensor.is_none()
            && self.integrity.is_empty()
    }
}

/// Producer side. Sends never block; a send after the controller is gone is dropped.
#[derive(Debug, Clone)]
pub struct FeedSenders {
    completions: mpsc::UnboundedSender<Completion>,
    health: mpsc::UnboundedSender<HealthReport>,
    sensors: mpsc::UnboundedSender<SensorReading>,
    integrity: mpsc::UnboundedSender<IntegritySignal>,
}

impl FeedSenders {
    pub fn complete(&self, completion: Completion) -> bool {
        self.completions.send(completion).is_ok()
    }

    pub fn report_health(&self, report: HealthReport) -> bool {
        self.health.send(report).is_ok()
    }

    pub fn report_sensor(&self, reading: SensorReading) -> bool {
        self.sensors.send(reading).is_ok()
    }

    pub fn report_integrity(&self, signal: IntegritySignal) -> bool {
        self.integrity.send(signal).is_ok()
    }
}

/// Consumer side, owned by the controller.
#[derive(Debug)]
pub struct FeedInbox {
    completions: mpsc::UnboundedReceiver<Completion>,
    health: mpsc::UnboundedReceiver<HealthReport>,
    sensors: mpsc::UnboundedReceiver<SensorReading>,
    integrity: mpsc::UnboundedReceiver<IntegritySignal>,
}

/// Create a connected sender/inbox pair.
pub fn channel() -> (FeedSenders, FeedInbox) {
    let (ctx, crx) = mpsc::unbounded_channel();
    let (htx, hrx) = mpsc::unbounded_channel();
    let (stx, srx) = mpsc::unbounded_channel();
    let (itx, irx) = mpsc::unbounded_channel();
    (
        FeedSenders {
            completions: ctx,
            health: htx,
            sensors: stx,
            integrity: itx,
        },
        FeedInbox {
            completions: crx,
            health: hrx,
            sensors: srx,
            integrity: irx,
        },
    )
}

impl FeedInbox {
    /// Drain every channel without waiting.
    pub fn snapshot(&mut self) -> FeedSnapshot {
        let mut snap = FeedSnapshot::default();
        while let Ok(c) = self.completions.try_recv() {
            snap.completions.push(c);
        }
        while let Ok(h) = self.health.try_recv() {
            snap.health.push(h);
        }
        while let Ok(s) = self.sensors.try_recv() {
            snap.sensor = Some(s);
        }
        while let Ok(i) = self.integrity.try_recv() {
            snap.integrity.insert(i.work_id, i.valid);
        }
        if !snap.is_empty() {
            debug!(
                completions = snap.completions.len(),
                health = snap.health.len(),
                sensor = snap.sensor.is_some(),
                integrity = snap.integrity.len(),
                "feed snapshot"
            );
        }
        snap
    }
}

/// Operator mode switches, shared with whoever drives them.
#[derive(Debug, Clone)]
pub struct ModeFlags {
    power_save_mode: Arc<AtomicBool>,
    performance_boost: Arc<AtomicBool>,
    emergency_mode: Arc<AtomicBool>,
}

impl ModeFlags {
    pub fn new(adaptation: &AdaptationConfig, emergency_mode: bool) -> Self {
        Self {
            power_save_mode: Arc::new(AtomicBool::new(adaptation.power_save_mode)),
            performance_boost: Arc::new(AtomicBool::new(adaptation.performance_boost)),
            emergency_mode: Arc::new(AtomicBool::new(emergency_mode)),
        }
    }

    pub fn set_power_save(&self, on: bool) {
        self.power_save_mode.store(on, Ordering::Release);
    }

    pub fn set_performance_boost(&self, on: bool) {
        self.performance_boost.store(on, Ordering::Release);
    }

    pub fn set_emergency(&self, on: bool) {
        self.emergency_mode.store(on, Ordering::Release);
    }

    pub fn adaptation(&self) -> AdaptationFlags {
        AdaptationFlags {
            power_save_mode: self.power_save_mode.load(Ordering::Acquire),
            performance_boost: self.performance_boost.load(Ordering::Acquire),
        }
    }

    pub fn emergency(&self) -> bool {
        self.emergency_mode.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_drains_and_keeps_latest_sensor() {
        let (tx, mut rx) = channel();
        assert!(tx.complete(Completion {
            worker_id: 1,
            work_id: WorkId(4),
            outcome: Outcome::Exhausted,
            load_pct: 40.0,
        }));
        tx.report_sensor(SensorReading { estimated_power: 10.0, estimated_temp: 30.0 });
        tx.report_sensor(SensorReading { estimated_power: 20.0, estimated_temp: 40.0 });
        tx.report_integrity(IntegritySignal { work_id: WorkId(4), valid: false });

        let snap = rx.snapshot();
        assert_eq!(snap.completions.len(), 1);
        assert_eq!(snap.sensor.map(|s| s.estimated_temp), Some(40.0));
        assert_eq!(snap.integrity.get(&WorkId(4)), Some(&false));

        assert!(rx.snapshot().is_empty());
    }

    #[test]
    fn send_after_inbox_dropped_reports_failure() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(!tx.report_health(HealthReport {
            worker_id: 0,
            tamper_detected: true,
            deviation_score: 0.0,
        }));
    }

    #[test]
    fn mode_flags_are_shared() {
        let flags = ModeFlags::new(&AdaptationConfig::default(), false);
        let remote = flags.clone();
        remote.set_power_save(true);
        remote.set_emergency(true);
        assert!(flags.adaptation().power_save_mode);
        assert!(!flags.adaptation().performance_boost);
        assert!(flags.emergency());
    }
}
