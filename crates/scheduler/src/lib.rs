//! Work distribution and arbitration for a fixed pool of hash-search workers.
//!
//! Items enter through an [`AdmissionHandle`], wait in per-tier
//! [`PriorityAdmissionQueues`], and are paired with idle workers once per
//! round by the [`Controller`] under the active [`SchedulingPolicy`], the
//! power/thermal cap, and the security gate.

pub mod adaptation;
pub mod collector;
pub mod controller;
pub mod feeds;
pub mod metrics;
pub mod policy;
pub mod qos;
pub mod queues;
pub mod security;
pub mod status;
pub mod thermal;

pub use adaptation::{AdaptationController, AdaptationFlags};
pub use collector::ResultCollector;
pub use controller::{Assignment, Controller, PolicySwitch, RoundReport};
pub use feeds::{Completion, FeedSenders, HealthReport, IntegritySignal, ModeFlags, SensorReading};
pub use metrics::{ControllerMetrics, TelemetrySnapshot};
pub use policy::{PolicyKind, SchedulingPolicy};
pub use qos::{QoSManager, QosHint, QosState};
pub use queues::{AdmissionHandle, PriorityAdmissionQueues};
pub use security::SecurityGate;
pub use status::{SearchRange, WorkerSlot, WorkerState, WorkerStatusTable};
pub use thermal::{ThermalPowerGovernor, ThermalPowerState};
