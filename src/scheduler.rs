//! # Scheduler: Auto-Release Sweep
//!
//! A SUBMITTED milestone whose review window has closed is approved and its
//! escrow released as if the client had approved it. The sweep is a
//! stateless pass over the due milestones:
//!
//! - each milestone is its own atomic unit, so a failure is recorded and the
//!   pass moves on;
//! - a milestone that left SUBMITTED between listing and locking (the client
//!   approved it first) is counted as skipped, not failed;
//! - the stop signal is checked between milestones, never inside one.
//!
//! Running it twice, concurrently, or after a missed interval is harmless.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::ApprovalOutcome;
use crate::engine::Engine;
use crate::error::EngineResult;

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub milestone_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub released: usize,
    pub skipped: usize,
    pub failures: Vec<SweepFailure>,
    pub interrupted: bool,
    pub timestamp: DateTime<Utc>,
}

impl SweepReport {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            scanned: 0,
            released: 0,
            skipped: 0,
            failures: Vec::new(),
            interrupted: false,
            timestamp,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One uninterruptible pass, for the cron endpoint and the CLI.
pub async fn run_sweep(engine: &Engine, now: DateTime<Utc>) -> EngineResult<SweepReport> {
    let (_keep, stop) = watch::channel(false);
    sweep(engine, now, &stop).await
}

/// One pass that stops early once `stop` reads `true`.
pub async fn sweep(
    engine: &Engine,
    now: DateTime<Utc>,
    stop: &watch::Receiver<bool>,
) -> EngineResult<SweepReport> {
    let started = Instant::now();
    let mut report = SweepReport::new(now);
    let due = engine
        .db()
        .list_due_auto_releases(now, engine.config().sweep_batch_limit)
        .await?;

    for milestone in &due {
        if *stop.borrow() {
            report.interrupted = true;
            info!(remaining = due.len() - report.scanned, "auto-release sweep interrupted");
            break;
        }
        report.scanned += 1;
        match engine.auto_release(milestone.id, now).await {
            Ok(ApprovalOutcome::Settled(_)) => {
                report.released += 1;
            }
            Ok(ApprovalOutcome::NotSubmitted(status)) => {
                report.skipped += 1;
                info!(
                    milestone_id = %milestone.id,
                    status = %status,
                    "auto-release lost race; milestone already left SUBMITTED"
                );
            }
            Ok(ApprovalOutcome::ProjectClosed(status)) => {
                report.skipped += 1;
                info!(
                    milestone_id = %milestone.id,
                    project_status = %status,
                    "auto-release skipped; project is no longer in progress"
                );
            }
            Ok(ApprovalOutcome::NotFunded(status)) => {
                report.skipped += 1;
                info!(
                    milestone_id = %milestone.id,
                    escrow_status = ?status,
                    "auto-release skipped; milestone payment is not in escrow"
                );
            }
            Err(e) => {
                engine.metrics().sweep_failures.inc();
                warn!(milestone_id = %milestone.id, error = %e, "auto-release failed");
                report.failures.push(SweepFailure {
                    milestone_id: milestone.id,
                    error: e.to_string(),
                });
            }
        }
    }

    engine
        .metrics()
        .sweep_duration
        .observe(started.elapsed().as_secs_f64());
    info!(
        scanned = report.scanned,
        released = report.released,
        skipped = report.skipped,
        failures = report.failures.len(),
        interrupted = report.interrupted,
        "auto-release sweep finished"
    );
    Ok(report)
}

/// Run the sweep every `sweep_interval_secs` until `stop` flips to `true`.
pub fn spawn_loop(engine: Arc<Engine>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(engine.config().sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = sweep(&engine, Utc::now(), &stop).await {
                        warn!(error = %e, "auto-release sweep could not list due milestones");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("auto-release loop stopped");
    })
}
