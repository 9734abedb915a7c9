mod cli;
mod config;
mod sim;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use hashgrid_core::config::load_dotenv;
use hashgrid_core::{ArbiterError, Payload, Tier};
use hashgrid_scheduler::{AdmissionHandle, Controller, RoundReport};

use crate::cli::CliArgs;
use crate::sim::SimulatedPool;

/// Workload mix: mostly mid-priority, some urgent, a little background.
const TIER_MIX: [Tier; 8] = [
    Tier::Critical,
    Tier::High,
    Tier::High,
    Tier::Medium,
    Tier::Medium,
    Tier::Medium,
    Tier::Low,
    Tier::Background,
];

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = config::load(&args).context("failed to load configuration")?;

    if args.print_config {
        print!("{}", config::render(&config)?);
        return Ok(());
    }
    config.log_summary();

    let interval = Duration::from_millis(config.pool.round_interval_ms.max(1));
    let mut controller = Controller::new(config).context("failed to build controller")?;
    let mut reports = controller.subscribe_reports();
    let mut found = controller
        .take_found_stream()
        .context("found-result stream already taken")?;
    let sim = SimulatedPool::new(
        controller.feed_senders(),
        args.difficulty,
        args.scan_budget,
        args.sim_threads,
    )?;

    let producer = tokio::spawn(produce(controller.admission_handle(), args.submit_rate, interval));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut stop_tx = Some(stop_tx);
    let mut driver = tokio::spawn(async move {
        let shutdown = async {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
                _ = stop_rx => info!("round limit reached, shutting down"),
            }
        };
        let outcome = controller.run(shutdown).await;
        (controller, outcome)
    });

    let (mut controller, outcome) = loop {
        tokio::select! {
            Some(report) = reports.recv() => {
                for assignment in &report.assignments {
                    sim.dispatch(assignment);
                }
                emit_report(&report, args.quiet)?;
                if args.rounds.is_some_and(|limit| report.round >= limit) {
                    if let Some(tx) = stop_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
            Some(result) = found.recv() => {
                info!(work_id = %result.work_id, worker_id = result.worker_id, tier = %result.tier, "found");
            }
            joined = &mut driver => break joined.context("controller task panicked")?,
        }
    };
    producer.abort();

    while let Ok(report) = reports.try_recv() {
        emit_report(&report, args.quiet)?;
    }

    let drained = controller.drain();
    for drop in &drained {
        emit("drop", serde_json::to_value(drop)?);
    }
    emit("metrics", serde_json::to_value(controller.metrics())?);

    match outcome {
        Ok(rounds) => {
            info!(rounds, drained = drained.len(), "hashgrid stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "controller halted");
            Err(e).context("controller loop ended abnormally")
        }
    }
}

/// Submit a steady synthetic workload until the controller refuses it.
async fn produce(intake: AdmissionHandle, rate: usize, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut n: u64 = 0;
    loop {
        ticker.tick().await;
        for _ in 0..rate {
            n += 1;
            let tier = TIER_MIX[(n % TIER_MIX.len() as u64) as usize];
            let payload = Payload::new(Sha256::digest(n.to_le_bytes()).to_vec());
            match intake.submit(payload, tier) {
                Ok(id) => debug!(work_id = %id, %tier, "submitted"),
                Err(ArbiterError::AdmissionRejected { tier }) => {
                    debug!(%tier, depths = ?intake.queue_depths(), "queue full, backing off");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    warn!(error = %e, "admission halted, producer stopping");
                    return;
                }
                Err(e) => warn!(error = %e, "submission refused"),
            }
        }
    }
}

fn emit_report(report: &RoundReport, quiet: bool) -> Result<()> {
    if !quiet {
        emit("round", serde_json::to_value(&report.telemetry)?);
    }
    for result in &report.results {
        emit("result", serde_json::to_value(result)?);
    }
    for drop in &report.drops {
        emit("drop", serde_json::to_value(drop)?);
    }
    Ok(())
}

/// One JSON line on stdout: `{"type": kind, ...body}`.
fn emit(kind: &str, body: serde_json::Value) {
    let line = match body {
        serde_json::Value::Object(mut map) => {
            map.insert("type".into(), json!(kind));
            serde_json::Value::Object(map)
        }
        other => json!({ "type": kind, "data": other }),
    };
    println!("{line}");
}
