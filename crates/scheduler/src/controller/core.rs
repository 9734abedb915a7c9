use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::info;

use hashgrid_core::{ArbiterConfig, ArbiterError, Round, WorkId, WorkResult, WorkerId};

use crate::adaptation::AdaptationController;
use crate::collector::ResultCollector;
use crate::feeds::{self, FeedInbox, FeedSenders, ModeFlags};
use crate::metrics::{ControllerMetrics, TelemetrySnapshot};
use crate::policy::SchedulingPolicy;
use crate::qos::{QoSManager, QosState};
use crate::queues::{AdmissionHandle, PriorityAdmissionQueues};
use crate::security::SecurityGate;
use crate::status::{WorkerSlot, WorkerStatusTable};
use crate::thermal::{ThermalPowerGovernor, ThermalPowerState};

use super::round::RoundReport;

/// Owns every component and runs one decision round at a time.
///
/// Admission and the report feeds are the only concurrent entry points;
/// everything else happens under `&mut self`.
pub struct Controller {
    pub(super) config: ArbiterConfig,
    pub(super) round: Round,
    /// Current round, read by admission handles to stamp items.
    pub(super) round_counter: Arc<AtomicU64>,
    pub(super) next_id: Arc<AtomicU64>,
    pub(super) queues: Arc<PriorityAdmissionQueues>,
    pub(super) workers: WorkerStatusTable,
    pub(super) policy: SchedulingPolicy,
    pub(super) adaptation: AdaptationController,
    pub(super) thermal: ThermalPowerGovernor,
    pub(super) qos: QoSManager,
    pub(super) security: SecurityGate,
    pub(super) collector: ResultCollector,
    pub(super) inbox: FeedInbox,
    pub(super) senders: FeedSenders,
    pub(super) modes: ModeFlags,
    /// Fault requeues per in-flight item.
    pub(super) fault_retries: HashMap<WorkId, u32>,
    pub(super) found_tx: mpsc::UnboundedSender<WorkResult>,
    pub(super) found_rx: Option<mpsc::UnboundedReceiver<WorkResult>>,
    pub(super) report_tx: Option<mpsc::UnboundedSender<RoundReport>>,
    pub(super) metrics: Arc<RwLock<ControllerMetrics>>,
    pub(super) last_telemetry: Option<TelemetrySnapshot>,
}

impl Controller {
    /// Build a controller from a validated configuration.
    pub fn new(config: ArbiterConfig) -> Result<Self, ArbiterError> {
        config.validate()?;

        let adaptation = AdaptationController::new(&config.adaptation);
        let queues = Arc::new(PriorityAdmissionQueues::new(
            &config.queues,
            adaptation.window(),
            config.pool.max_payload_bytes,
        ));
        let workers = WorkerStatusTable::new(
            config.pool.workers,
            config.pool.search_space,
            config.pool.partition_mode,
        );
        let (senders, inbox) = feeds::channel();
        let (found_tx, found_rx) = mpsc::unbounded_channel();

        let metrics = ControllerMetrics {
            current_policy: adaptation.initial_policy().kind(),
            ..ControllerMetrics::default()
        };

        info!(
            workers = config.pool.workers,
            queue_capacity = queues.total_capacity(),
            policy = %adaptation.initial_policy().kind(),
            "controller initialized"
        );

        Ok(Self {
            policy: adaptation.initial_policy(),
            thermal: ThermalPowerGovernor::new(&config.thermal, config.pool.workers),
            qos: QoSManager::new(&config.qos, queues.total_capacity()),
            security: SecurityGate::new(&config.security),
            collector: ResultCollector::new(config.collector.ema_alpha),
            modes: ModeFlags::new(&config.adaptation, config.qos.emergency_mode),
            round: 0,
            round_counter: Arc::new(AtomicU64::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
            queues,
            workers,
            adaptation,
            inbox,
            senders,
            fault_retries: HashMap::new(),
            found_tx,
            found_rx: Some(found_rx),
            report_tx: None,
            metrics: Arc::new(RwLock::new(metrics)),
            last_telemetry: None,
            config,
        })
    }

    /// Cloneable intake handle for producers.
    pub fn admission_handle(&self) -> AdmissionHandle {
        AdmissionHandle::new(
            Arc::clone(&self.queues),
            Arc::clone(&self.next_id),
            Arc::clone(&self.round_counter),
            self.security.lockdown_handle(),
        )
    }

    /// Cloneable senders for completions, health, sensor and integrity reports.
    pub fn feed_senders(&self) -> FeedSenders {
        self.senders.clone()
    }

    pub fn mode_flags(&self) -> ModeFlags {
        self.modes.clone()
    }

    pub fn lockdown_handle(&self) -> Arc<AtomicBool> {
        self.security.lockdown_handle()
    }

    /// Stream of `Found` results. Can be taken once.
    pub fn take_found_stream(&mut self) -> Option<mpsc::UnboundedReceiver<WorkResult>> {
        self.found_rx.take()
    }

    /// Receive every [`RoundReport`] produced by [`Controller::run`].
    pub fn subscribe_reports(&mut self) -> mpsc::UnboundedReceiver<RoundReport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.report_tx = Some(tx);
        rx
    }

    pub fn set_power_budget(&mut self, watts: f64) {
        self.thermal.set_power_budget(watts);
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn workers(&self) -> &WorkerStatusTable {
        &self.workers
    }

    /// One worker's slot.
    pub fn worker(&self, id: WorkerId) -> Result<&WorkerSlot, ArbiterError> {
        self.workers.get(id).ok_or(ArbiterError::UnknownWorker(id))
    }

    pub fn queues(&self) -> &PriorityAdmissionQueues {
        &self.queues
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    pub fn qos_state(&self) -> QosState {
        self.qos.state()
    }

    pub fn thermal_state(&self) -> ThermalPowerState {
        self.thermal.state()
    }

    pub fn lockdown_active(&self) -> bool {
        self.security.lockdown_active()
    }

    pub fn telemetry(&self) -> Option<&TelemetrySnapshot> {
        self.last_telemetry.as_ref()
    }

    /// Get a snapshot of the current controller metrics.
    pub fn metrics(&self) -> ControllerMetrics {
        match self.metrics.read() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Get an Arc to the metrics (for external reads without cloning).
    pub fn metrics_handle(&self) -> Arc<RwLock<ControllerMetrics>> {
        Arc::clone(&self.metrics)
    }
}
