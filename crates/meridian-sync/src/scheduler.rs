//! # Sync Scheduler
//!
//! Background cadence for the engine. One ticker drives both periodic sync
//! cycles and scheduled backups:
//!
//! ```text
//! tick ──▶ interval elapsed? ──no──▶ wait
//!              │ yes
//!              ▼
//!          auto_sync on and not paused? ──yes──▶ start_sync()
//!              │
//!              ▼
//!          backup due? ──yes──▶ create_backup(Full) + retention sweep
//! ```
//!
//! The first tick fires immediately, so a terminal gets a sync attempt (and
//! its first backup) right after boot. Attempts are spaced by
//! `CloudSettings::sync_interval` from the moment the attempt started, not
//! from when it succeeded, so an offline terminal probes once per interval
//! instead of hammering the link.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use meridian_core::BackupKind;

use crate::engine::SyncEngine;

// =============================================================================
// Scheduler
// =============================================================================

pub struct SyncScheduler;

impl SyncScheduler {
    /// Starts the background loop. `tick` is how often the scheduler wakes
    /// to reevaluate, not how often it syncs.
    pub fn spawn(engine: Arc<SyncEngine>, tick: Duration) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_loop(engine, tick, shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }
}

/// Handle for stopping the scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop to stop and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

async fn run_loop(engine: Arc<SyncEngine>, tick: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_attempt: Option<Instant> = None;

    info!(tick_secs = tick.as_secs(), "Sync scheduler started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let settings = engine.settings().await;
                let due = match last_attempt {
                    None => true,
                    Some(at) => at.elapsed() >= settings.sync_interval(),
                };
                if !due {
                    continue;
                }
                last_attempt = Some(Instant::now());

                if settings.auto_sync && !engine.is_paused().await {
                    match engine.start_sync().await {
                        Ok(report) if report.ran => debug!(
                            uploads = report.uploads_completed,
                            downloads = report.downloads_completed,
                            conflicts = report.conflicts_detected,
                            failures = report.failures,
                            "Scheduled sync finished"
                        ),
                        Ok(_) => debug!("Scheduled sync skipped, a cycle is already running"),
                        Err(e) => warn!(error = %e, "Scheduled sync failed"),
                    }
                }

                if engine.is_backup_due().await {
                    match engine.create_backup(BackupKind::Full, None).await {
                        Ok(record) => {
                            info!(backup_id = %record.id, name = %record.name, "Scheduled backup completed");
                            if let Err(e) = engine.cleanup_old_backups().await {
                                warn!(error = %e, "Backup retention sweep failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "Scheduled backup failed"),
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Sync scheduler shutting down");
                break;
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
