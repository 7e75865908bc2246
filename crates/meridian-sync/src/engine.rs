//! # Sync Engine
//!
//! Main orchestrator. Owns the queue, drives sync cycles, and fronts the
//! conflict, backup, device, and notification subsystems behind one handle.
//!
//! ## Cycle Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          start_sync() cycle                             │
//! │                                                                         │
//! │  try_lock ──busy──▶ return { ran: false }                               │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  GATE      check_now() offline? ──▶ Err(Offline)                        │
//! │            wifi-only + metered? ──▶ Err(MeteredLink)                    │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  RECONCILE dirty rows with no live upload get one queued                │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  UPLOADS   ready_batch(Upload, batch_size)                              │
//! │            ├─ Accepted ──▶ mark_synced (or follow-up on version race)   │
//! │            ├─ Conflict ──▶ hold op, record conflict, policy may resolve │
//! │            └─ Err      ──▶ requeue with holdoff, or fail terminally     │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  DOWNLOADS ready_batch(Download, batch_size), since = last_sync         │
//! │            └─ apply_remote per row (dirty and stale rows are skipped)   │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  SETTLE    last_sync advances unless every processed op failed;         │
//! │            status recomputed and pushed to sinks                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One cycle makes at most one attempt per operation. Holdoffs between
//! retries come from `CloudSettings::retry_holdoff` and are enforced by the
//! queue, so a cycle that runs early simply skips held operations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use meridian_core::{
    BackupKind, BackupRecord, CloudSettings, ConflictRecord, CoreError, DeviceRecord,
    NotificationKind, OfflineRecord, OperationKind, OperationStatus, RecordStatus,
    ResolutionChoice, SyncAnalytics, SyncNotification, SyncOperation, SyncPriority, SyncStatus,
};
use meridian_store::{OfflineStore, RemoteApplyOutcome, StoreObserver};

use crate::analytics::build_report;
use crate::backup::BackupManager;
use crate::conflict::{ConflictResolver, LastWriterWins, MergeStrategy, ResolutionOutcome};
use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe};
use crate::devices::DeviceRegistry;
use crate::error::{SyncError, SyncResult};
use crate::notify::{NotificationCenter, SyncEventSink};
use crate::queue::SyncQueue;
use crate::transport::{RemoteTransport, UploadRequest, UploadResponse};

/// Default reachability probe timeout when the builder does not set one.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Attribution recorded on conflicts the configured policy resolves.
const POLICY_RESOLVER: &str = "policy";

// =============================================================================
// Cycle Report
// =============================================================================

/// What one `start_sync` pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// False when another cycle already held the lock; all counters zero.
    pub ran: bool,
    pub uploads_completed: usize,
    pub downloads_completed: usize,
    /// Remote rows actually written into the store by the download phase.
    pub records_pulled: usize,
    pub conflicts_detected: usize,
    pub failures: usize,
}

// =============================================================================
// Store Bridge
// =============================================================================

/// Turns dirty writes into queued uploads and keeps the settings mirror
/// fresh. Registered as a store observer so the store stays unaware of the
/// queue.
struct QueueBridge {
    queue: Arc<Mutex<SyncQueue>>,
    settings: Arc<RwLock<CloudSettings>>,
}

#[async_trait]
impl StoreObserver for QueueBridge {
    async fn on_dirty_write(&self, record: &OfflineRecord) {
        let mut queue = self.queue.lock().await;
        if queue.refresh_pending_upload(
            &record.entity_type,
            &record.entity_id,
            &record.payload,
            record.version,
            SyncPriority::Normal,
        ) {
            return;
        }
        if queue.has_active_upload(&record.entity_type, &record.entity_id) {
            // An upload for this row is mid-flight. The engine notices the
            // newer version when that attempt settles, or the reconcile
            // sweep picks the row up next cycle.
            return;
        }
        let op = SyncOperation::upload(
            &record.entity_type,
            &record.entity_id,
            record.payload.clone(),
            record.version,
            SyncPriority::Normal,
            Utc::now(),
        );
        queue.enqueue(op);
    }

    async fn on_settings_updated(&self, settings: &CloudSettings) {
        *self.settings.write().await = settings.clone();
    }
}

// =============================================================================
// Engine State
// =============================================================================

#[derive(Default)]
struct EngineState {
    last_sync: Option<DateTime<Utc>>,
    sync_errors: Vec<String>,
    sync_in_progress: bool,
    auto_sync_paused: bool,
}

// =============================================================================
// Sync Engine
// =============================================================================

pub struct SyncEngine {
    store: Arc<OfflineStore>,
    transport: Arc<dyn RemoteTransport>,
    connectivity: Arc<ConnectivityMonitor>,
    queue: Arc<Mutex<SyncQueue>>,
    conflicts: Arc<RwLock<Vec<ConflictRecord>>>,
    resolver: ConflictResolver,
    backups: Option<Arc<BackupManager>>,
    devices: Arc<DeviceRegistry>,
    notifier: Arc<NotificationCenter>,
    settings: Arc<RwLock<CloudSettings>>,
    state: RwLock<EngineState>,
    cycle_lock: Mutex<()>,
}

impl SyncEngine {
    // =========================================================================
    // Sync Cycle
    // =========================================================================

    /// Runs one sync cycle. Returns immediately with `ran: false` when a
    /// cycle is already in flight.
    pub async fn start_sync(&self) -> SyncResult<CycleReport> {
        let Ok(_cycle) = self.cycle_lock.try_lock() else {
            debug!("Sync cycle already running, skipping");
            return Ok(CycleReport::default());
        };

        let settings = self.settings().await;
        let link = self.connectivity.check_now().await;
        if !link.is_online {
            return Err(SyncError::Offline("no reachable uplink".into()));
        }
        if settings.sync_on_wifi_only && !link.connection_type.unmetered() {
            return Err(SyncError::MeteredLink(link.connection_type));
        }

        let since = {
            let mut state = self.state.write().await;
            state.sync_in_progress = true;
            state.last_sync
        };

        info!(connection = %link.connection_type, speed = %link.speed, "Sync cycle started");
        let mut report = CycleReport {
            ran: true,
            ..CycleReport::default()
        };
        let mut errors = Vec::new();

        self.reconcile_dirty_rows().await;

        let upload_ids = {
            self.queue
                .lock()
                .await
                .ready_batch(OperationKind::Upload, settings.batch_size, Utc::now())
        };
        for id in upload_ids {
            let begun = { self.queue.lock().await.begin(&id, Utc::now()) };
            let Some(op) = begun else { continue };
            self.process_upload(op, &settings, &mut report, &mut errors)
                .await;
        }

        let download_ids = {
            self.queue
                .lock()
                .await
                .ready_batch(OperationKind::Download, settings.batch_size, Utc::now())
        };
        for id in download_ids {
            let begun = { self.queue.lock().await.begin(&id, Utc::now()) };
            let Some(op) = begun else { continue };
            self.process_download(op, &settings, since, &mut report, &mut errors)
                .await;
        }

        let processed = report.uploads_completed
            + report.downloads_completed
            + report.conflicts_detected
            + report.failures;
        {
            let mut state = self.state.write().await;
            state.sync_in_progress = false;
            state.sync_errors = errors;
            if processed == 0 || report.failures < processed {
                state.last_sync = Some(Utc::now());
            }
        }

        self.emit_status().await;
        info!(
            uploads = report.uploads_completed,
            downloads = report.downloads_completed,
            pulled = report.records_pulled,
            conflicts = report.conflicts_detected,
            failures = report.failures,
            "Sync cycle finished"
        );
        Ok(report)
    }

    /// Dirty rows with no live upload get one queued. Covers writes that
    /// landed while an upload for the same row was in flight, and queues
    /// lost to a restart. Rows held by an open conflict are left alone.
    async fn reconcile_dirty_rows(&self) {
        let dirty = self.store.dirty_records().await;
        if dirty.is_empty() {
            return;
        }
        let now = Utc::now();
        let mut queue = self.queue.lock().await;
        let mut queued = 0usize;
        for record in dirty {
            if record.sync_status == RecordStatus::Conflict {
                continue;
            }
            if queue.has_active_upload(&record.entity_type, &record.entity_id) {
                continue;
            }
            let op = SyncOperation::upload(
                &record.entity_type,
                &record.entity_id,
                record.payload.clone(),
                record.version,
                SyncPriority::Normal,
                now,
            );
            queue.enqueue(op);
            queued += 1;
        }
        if queued > 0 {
            debug!(queued, "Reconcile queued uploads for dirty rows");
        }
    }

    async fn process_upload(
        &self,
        op: SyncOperation,
        settings: &CloudSettings,
        report: &mut CycleReport,
        errors: &mut Vec<String>,
    ) {
        debug!(
            op_id = %op.id,
            entity_type = %op.entity_type,
            entity_id = %op.entity_id,
            base_version = op.base_version,
            "Uploading"
        );
        let request = UploadRequest {
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id.clone(),
            base_version: op.base_version,
            force: op.force,
            payload: op.payload.clone(),
        };
        match self.transport.upload(request).await {
            Ok(UploadResponse::Accepted { new_version }) => {
                match self.finish_upload(&op, new_version).await {
                    Ok(()) => report.uploads_completed += 1,
                    Err(e) => {
                        warn!(op_id = %op.id, error = %e, "Upload bookkeeping failed");
                        errors.push(e.to_string());
                        report.failures += 1;
                    }
                }
            }
            Ok(UploadResponse::Conflict {
                server_snapshot,
                server_version,
            }) => {
                report.conflicts_detected += 1;
                if let Err(e) = self
                    .register_conflict(&op, server_snapshot, server_version, settings)
                    .await
                {
                    warn!(op_id = %op.id, error = %e, "Conflict bookkeeping failed");
                    errors.push(e.to_string());
                }
            }
            Err(e) => {
                self.handle_operation_error(&op, e, settings, report, errors)
                    .await
            }
        }
    }

    /// Settles an accepted upload. When the row changed locally while the
    /// attempt was in flight, the accepted payload is stale: the operation
    /// completes, the row stays dirty, and a follow-up upload is queued.
    async fn finish_upload(&self, op: &SyncOperation, new_version: i64) -> SyncResult<()> {
        let now = Utc::now();
        match self.store.get(&op.entity_type, &op.entity_id).await {
            Some(current) if current.version > op.base_version => {
                let mut queue = self.queue.lock().await;
                queue.complete(&op.id, now)?;
                let follow_up = SyncOperation::upload(
                    &current.entity_type,
                    &current.entity_id,
                    current.payload.clone(),
                    current.version,
                    op.priority,
                    now,
                );
                queue.enqueue(follow_up);
                drop(queue);
                debug!(
                    entity_type = %op.entity_type,
                    entity_id = %op.entity_id,
                    uploaded_version = op.base_version,
                    local_version = current.version,
                    "Row changed mid-upload, follow-up queued"
                );
                Ok(())
            }
            _ => {
                self.queue.lock().await.complete(&op.id, now)?;
                self.store
                    .mark_synced(&op.entity_type, &op.entity_id, new_version)
                    .await?;
                Ok(())
            }
        }
    }

    /// Records a rejected upload as a conflict. The detecting operation
    /// stays in progress until a resolution settles or supersedes it.
    async fn register_conflict(
        &self,
        op: &SyncOperation,
        server_snapshot: Value,
        server_version: i64,
        settings: &CloudSettings,
    ) -> SyncResult<()> {
        let now = Utc::now();
        let conflict = ConflictRecord::new(
            &op.id,
            &op.entity_type,
            &op.entity_id,
            op.payload.clone(),
            op.base_version,
            server_snapshot,
            server_version,
            now,
        );
        warn!(
            conflict_id = %conflict.id,
            entity_type = %op.entity_type,
            entity_id = %op.entity_id,
            kind = %conflict.conflict_type,
            client_version = op.base_version,
            server_version,
            "Version conflict detected"
        );

        self.store
            .mark_conflict(&op.entity_type, &op.entity_id)
            .await?;
        let conflict_id = conflict.id.clone();
        self.conflicts.write().await.push(conflict);
        self.notifier
            .publish(
                NotificationKind::Conflict,
                "Sync conflict detected",
                format!(
                    "{}/{} has local and remote changes",
                    op.entity_type, op.entity_id
                ),
                SyncPriority::High,
                now,
            )
            .await;

        if let Some(choice) = settings.conflict_policy.preselected_choice() {
            match self.resolver.resolve(&conflict_id, choice, POLICY_RESOLVER).await {
                Ok(outcome) => {
                    debug!(conflict_id = %conflict_id, ?outcome, "Conflict auto-resolved by policy")
                }
                Err(e) => {
                    warn!(conflict_id = %conflict_id, error = %e, "Policy resolution failed")
                }
            }
        }
        Ok(())
    }

    async fn process_download(
        &self,
        op: SyncOperation,
        settings: &CloudSettings,
        since: Option<DateTime<Utc>>,
        report: &mut CycleReport,
        errors: &mut Vec<String>,
    ) {
        debug!(op_id = %op.id, entity_type = %op.entity_type, ?since, "Downloading");
        match self.transport.download(&op.entity_type, since).await {
            Ok(rows) => {
                let mut pulled = 0usize;
                for row in rows {
                    match self
                        .store
                        .apply_remote(&op.entity_type, &row.entity_id, row.payload, row.version)
                        .await
                    {
                        Ok(RemoteApplyOutcome::Applied) => pulled += 1,
                        Ok(outcome) => debug!(
                            entity_type = %op.entity_type,
                            entity_id = %row.entity_id,
                            ?outcome,
                            "Remote row not applied"
                        ),
                        Err(e) => {
                            warn!(
                                entity_type = %op.entity_type,
                                entity_id = %row.entity_id,
                                error = %e,
                                "Could not apply remote row"
                            );
                            errors.push(e.to_string());
                        }
                    }
                }
                match self.queue.lock().await.complete(&op.id, Utc::now()) {
                    Ok(_) => {
                        report.downloads_completed += 1;
                        report.records_pulled += pulled;
                    }
                    Err(e) => warn!(op_id = %op.id, error = %e, "Download bookkeeping failed"),
                }
            }
            Err(e) => {
                self.handle_operation_error(&op, e, settings, report, errors)
                    .await
            }
        }
    }

    /// Retryable errors requeue with a holdoff until the retry budget runs
    /// out; everything else fails the operation on the spot.
    async fn handle_operation_error(
        &self,
        op: &SyncOperation,
        error: SyncError,
        settings: &CloudSettings,
        report: &mut CycleReport,
        errors: &mut Vec<String>,
    ) {
        let now = Utc::now();
        let text = error.to_string();
        report.failures += 1;
        errors.push(text.clone());

        if error.is_retryable() && op.retry_count < settings.max_retries {
            let holdoff = settings.retry_holdoff(op.retry_count + 1);
            let next_attempt_at = chrono::Duration::from_std(holdoff).ok().map(|d| now + d);
            match { self.queue.lock().await.requeue(&op.id, &text, next_attempt_at) } {
                Ok(requeued) => debug!(
                    op_id = %requeued.id,
                    retry_count = requeued.retry_count,
                    holdoff_secs = holdoff.as_secs(),
                    "Operation requeued after transport error"
                ),
                Err(e) => warn!(op_id = %op.id, error = %e, "Could not requeue operation"),
            }
            return;
        }

        if let Err(e) = { self.queue.lock().await.fail(&op.id, &text, now) } {
            warn!(op_id = %op.id, error = %e, "Could not fail operation");
        }
        if op.kind == OperationKind::Upload {
            if let Err(e) = self.store.mark_error(&op.entity_type, &op.entity_id).await {
                warn!(
                    entity_type = %op.entity_type,
                    entity_id = %op.entity_id,
                    error = %e,
                    "Could not flag record error"
                );
            }
        }
        warn!(
            op_id = %op.id,
            retry_count = op.retry_count,
            error = %text,
            "Operation failed terminally"
        );
        self.notifier
            .publish(
                NotificationKind::Sync,
                "Sync operation failed",
                format!(
                    "{} {}/{} gave up: {}",
                    op.kind, op.entity_type, op.entity_id, text
                ),
                SyncPriority::High,
                now,
            )
            .await;
    }

    // =========================================================================
    // Queue Facade
    // =========================================================================

    /// Queues an upload of the row's current state. A pending upload for the
    /// same row is refreshed instead; its id is returned either way.
    pub async fn request_upload(
        &self,
        entity_type: &str,
        entity_id: &str,
        priority: SyncPriority,
    ) -> SyncResult<String> {
        let record = self.store.get(entity_type, entity_id).await.ok_or_else(|| {
            CoreError::RecordNotFound {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
            }
        })?;

        let mut queue = self.queue.lock().await;
        queue.refresh_pending_upload(
            entity_type,
            entity_id,
            &record.payload,
            record.version,
            priority,
        );
        if let Some(id) = queue.active_upload_id(entity_type, entity_id) {
            return Ok(id);
        }
        let op = SyncOperation::upload(
            entity_type,
            entity_id,
            record.payload.clone(),
            record.version,
            priority,
            Utc::now(),
        );
        Ok(queue.enqueue(op))
    }

    /// Queues a type-wide download.
    pub async fn request_download(&self, entity_type: &str, priority: SyncPriority) -> String {
        let op = SyncOperation::download(entity_type, priority, Utc::now());
        self.queue.lock().await.enqueue(op)
    }

    /// Every known operation, live before archived.
    pub async fn operations(&self) -> Vec<SyncOperation> {
        self.queue.lock().await.operations()
    }

    pub async fn operation(&self, id: &str) -> Option<SyncOperation> {
        self.queue.lock().await.get(id)
    }

    /// Puts an archived failed operation back in the queue with a fresh
    /// retry budget and flags its row pending again.
    pub async fn retry_operation(&self, id: &str) -> SyncResult<SyncOperation> {
        let op = { self.queue.lock().await.retry(id) }
            .ok_or_else(|| CoreError::OperationNotFound(id.to_string()))?;
        if op.kind == OperationKind::Upload {
            if let Err(e) = self.store.mark_pending(&op.entity_type, &op.entity_id).await {
                warn!(
                    entity_type = %op.entity_type,
                    entity_id = %op.entity_id,
                    error = %e,
                    "Could not flag record pending"
                );
            }
        }
        self.emit_status().await;
        Ok(op)
    }

    /// Cancels a pending operation. In-progress operations cannot be
    /// cancelled from outside a cycle.
    pub async fn cancel_operation(&self, id: &str) -> bool {
        let cancelled = { self.queue.lock().await.cancel_pending(id, Utc::now()) };
        if cancelled {
            self.emit_status().await;
        }
        cancelled
    }

    /// Drops a settled operation from the archive.
    pub async fn acknowledge_operation(&self, id: &str) -> bool {
        self.queue.lock().await.acknowledge(id)
    }

    // =========================================================================
    // Conflict Facade
    // =========================================================================

    pub async fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.read().await.clone()
    }

    pub async fn unresolved_conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts
            .read()
            .await
            .iter()
            .filter(|c| !c.is_resolved())
            .cloned()
            .collect()
    }

    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        choice: ResolutionChoice,
        resolved_by: &str,
    ) -> SyncResult<ResolutionOutcome> {
        let outcome = self.resolver.resolve(conflict_id, choice, resolved_by).await?;
        self.emit_status().await;
        Ok(outcome)
    }

    // =========================================================================
    // Status and Control
    // =========================================================================

    pub async fn status(&self) -> SyncStatus {
        let link = self.connectivity.snapshot().await;
        let (pending_uploads, pending_downloads) = { self.queue.lock().await.pending_counts() };
        let state = self.state.read().await;
        SyncStatus {
            is_online: link.is_online,
            connection_type: link.connection_type,
            connection_speed: link.speed,
            last_sync: state.last_sync,
            pending_uploads,
            pending_downloads,
            sync_in_progress: state.sync_in_progress,
            auto_sync_paused: state.auto_sync_paused,
            sync_errors: state.sync_errors.clone(),
        }
    }

    /// Stops the scheduler from starting cycles. Manual `start_sync` calls
    /// still run.
    pub async fn pause_sync(&self) {
        self.state.write().await.auto_sync_paused = true;
        info!("Automatic sync paused");
        self.emit_status().await;
    }

    pub async fn resume_sync(&self) {
        self.state.write().await.auto_sync_paused = false;
        info!("Automatic sync resumed");
        self.emit_status().await;
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.auto_sync_paused
    }

    pub fn store(&self) -> &Arc<OfflineStore> {
        &self.store
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    async fn emit_status(&self) {
        let status = self.status().await;
        self.notifier.emit_status(&status).await;
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub async fn settings(&self) -> CloudSettings {
        self.settings.read().await.clone()
    }

    /// Validates and persists new settings. The observer bridge refreshes
    /// the engine's mirror.
    pub async fn update_settings(&self, settings: CloudSettings) -> SyncResult<()> {
        self.store.update_settings(settings).await?;
        Ok(())
    }

    // =========================================================================
    // Backup Facade
    // =========================================================================

    pub fn backups_configured(&self) -> bool {
        self.backups.is_some()
    }

    fn backup_manager(&self) -> SyncResult<&BackupManager> {
        self.backups
            .as_deref()
            .ok_or_else(|| SyncError::InvalidConfig("backups are not configured".into()))
    }

    pub async fn create_backup(
        &self,
        kind: BackupKind,
        name: Option<String>,
    ) -> SyncResult<BackupRecord> {
        let manager = self.backup_manager()?;
        match manager.create_backup(kind, name).await {
            Ok(record) => {
                self.notifier
                    .publish(
                        NotificationKind::Backup,
                        "Backup completed",
                        format!("{} ({} bytes on disk)", record.name, record.stored_size_bytes),
                        SyncPriority::Normal,
                        Utc::now(),
                    )
                    .await;
                Ok(record)
            }
            Err(e) => {
                self.notifier
                    .publish(
                        NotificationKind::Backup,
                        "Backup failed",
                        e.to_string(),
                        SyncPriority::High,
                        Utc::now(),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Replaces the store from a backup. Pending operations are cancelled;
    /// they describe rows the restore just rewrote. Dirty restored rows are
    /// requeued by the reconcile sweep on the next cycle.
    pub async fn restore_backup(&self, backup_id: &str) -> SyncResult<usize> {
        let restored = self.backup_manager()?.restore_backup(backup_id).await?;
        let now = Utc::now();
        let cancelled = {
            let mut queue = self.queue.lock().await;
            let pending: Vec<String> = queue
                .operations()
                .into_iter()
                .filter(|op| op.status == OperationStatus::Pending)
                .map(|op| op.id)
                .collect();
            pending
                .into_iter()
                .filter(|id| queue.cancel_pending(id, now))
                .count()
        };
        info!(backup_id = %backup_id, restored, cancelled, "Restore applied");
        self.notifier
            .publish(
                NotificationKind::Backup,
                "Backup restored",
                format!("{restored} records restored"),
                SyncPriority::High,
                now,
            )
            .await;
        self.emit_status().await;
        Ok(restored)
    }

    pub async fn list_backups(&self) -> SyncResult<Vec<BackupRecord>> {
        Ok(self.backup_manager()?.list_backups().await)
    }

    pub async fn delete_backup(&self, backup_id: &str) -> SyncResult<()> {
        self.backup_manager()?.delete_backup(backup_id).await
    }

    pub async fn cleanup_old_backups(&self) -> SyncResult<usize> {
        self.backup_manager()?.cleanup_old_backups(Utc::now()).await
    }

    /// False when backups are not configured.
    pub async fn is_backup_due(&self) -> bool {
        match &self.backups {
            Some(manager) => manager.is_backup_due(Utc::now()).await,
            None => false,
        }
    }

    // =========================================================================
    // Devices, Notifications, Analytics
    // =========================================================================

    pub async fn register_device(&self, device: DeviceRecord) -> DeviceRecord {
        self.devices.register(device).await
    }

    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.devices.list(Utc::now()).await
    }

    pub async fn touch_device(&self, device_id: &str) -> bool {
        self.devices.touch(device_id, Utc::now()).await
    }

    pub async fn notifications(&self) -> Vec<SyncNotification> {
        self.notifier.notifications().await
    }

    pub async fn unread_notifications(&self) -> usize {
        self.notifier.unread_count().await
    }

    pub async fn mark_notification_read(&self, id: &str) -> bool {
        self.notifier.mark_read(id, Utc::now()).await
    }

    pub async fn mark_all_notifications_read(&self) -> usize {
        self.notifier.mark_all_read(Utc::now()).await
    }

    pub async fn register_sink(&self, sink: Arc<dyn SyncEventSink>) {
        self.notifier.register_sink(sink).await;
    }

    /// Sync activity over a closed time window.
    pub async fn analytics(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> SyncAnalytics {
        let operations = { self.queue.lock().await.operations() };
        let conflicts = self.conflicts.read().await.clone();
        let active_devices = self.devices.online_count(Utc::now()).await as u64;
        let backups = match &self.backups {
            Some(manager) => manager.list_backups().await,
            None => Vec::new(),
        };
        build_report(
            period_start,
            period_end,
            &operations,
            &conflicts,
            active_devices,
            &backups,
        )
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`SyncEngine`] over a store, a transport, and a probe.
pub struct SyncEngineBuilder {
    store: Arc<OfflineStore>,
    transport: Arc<dyn RemoteTransport>,
    probe: Arc<dyn ReachabilityProbe>,
    probe_timeout: Duration,
    merge: Arc<dyn MergeStrategy>,
    sinks: Vec<Arc<dyn SyncEventSink>>,
    backup_dir: Option<PathBuf>,
    backup_key: Option<[u8; 32]>,
}

impl SyncEngineBuilder {
    pub fn new(
        store: Arc<OfflineStore>,
        transport: Arc<dyn RemoteTransport>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        SyncEngineBuilder {
            store,
            transport,
            probe,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            merge: Arc::new(LastWriterWins),
            sinks: Vec::new(),
            backup_dir: None,
            backup_key: None,
        }
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Replaces the default last-writer-wins merge strategy.
    pub fn merge_strategy(mut self, merge: Arc<dyn MergeStrategy>) -> Self {
        self.merge = merge;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn SyncEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Enables the backup pipeline under `dir`. The key is required once
    /// the store settings ask for encrypted backups.
    pub fn backups(mut self, dir: impl Into<PathBuf>, key: Option<[u8; 32]>) -> Self {
        self.backup_dir = Some(dir.into());
        self.backup_key = key;
        self
    }

    pub async fn build(self) -> SyncResult<Arc<SyncEngine>> {
        let settings = Arc::new(RwLock::new(self.store.settings().await));
        let queue = Arc::new(Mutex::new(SyncQueue::new()));
        let conflicts: Arc<RwLock<Vec<ConflictRecord>>> = Arc::new(RwLock::new(Vec::new()));
        let notifier = Arc::new(NotificationCenter::new());
        for sink in self.sinks {
            notifier.register_sink(sink).await;
        }

        let connectivity = Arc::new(ConnectivityMonitor::new(self.probe, self.probe_timeout));
        let resolver = ConflictResolver::new(
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            Arc::clone(&queue),
            Arc::clone(&conflicts),
            self.merge,
            Arc::clone(&notifier),
        );

        let backups = match self.backup_dir {
            Some(dir) => Some(Arc::new(
                BackupManager::open(Arc::clone(&self.store), dir, self.backup_key).await?,
            )),
            None => None,
        };

        self.store
            .register_observer(Arc::new(QueueBridge {
                queue: Arc::clone(&queue),
                settings: Arc::clone(&settings),
            }))
            .await;

        info!(device_id = %self.store.device_id(), "Sync engine assembled");
        Ok(Arc::new(SyncEngine {
            store: self.store,
            transport: self.transport,
            connectivity,
            queue,
            conflicts,
            resolver,
            backups,
            devices: Arc::new(DeviceRegistry::new()),
            notifier,
            settings,
            state: RwLock::new(EngineState::default()),
            cycle_lock: Mutex::new(()),
        }))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::StaticProbe;
    use crate::transport::{RemoteRecord, ScriptedOutcome, ScriptedTransport};
    use meridian_core::{ConflictPolicy, ConnectionType};
    use serde_json::json;
    use tokio::sync::oneshot;

    async fn online_engine(
        settings: CloudSettings,
        transport: Arc<ScriptedTransport>,
    ) -> Arc<SyncEngine> {
        let store = Arc::new(OfflineStore::in_memory("term-1", settings).unwrap());
        let engine = SyncEngineBuilder::new(store, transport, Arc::new(StaticProbe::online(40)))
            .build()
            .await
            .unwrap();
        engine.connectivity().set_connection(ConnectionType::Wifi).await;
        engine
    }

    fn fast_retry_settings() -> CloudSettings {
        CloudSettings {
            retry_delay_secs: 0,
            ..CloudSettings::default()
        }
    }

    #[tokio::test]
    async fn test_dirty_write_queues_upload_and_cycle_syncs() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = online_engine(CloudSettings::default(), transport.clone()).await;

        engine
            .store()
            .save("customer", "c-1", json!({"name": "Alice"}), true)
            .await
            .unwrap();
        let status = engine.status().await;
        assert_eq!(status.pending_uploads, 1);
        assert!(status.last_sync.is_none());

        let report = engine.start_sync().await.unwrap();
        assert!(report.ran);
        assert_eq!(report.uploads_completed, 1);
        assert_eq!(report.failures, 0);

        let record = engine.store().get("customer", "c-1").await.unwrap();
        assert!(!record.is_dirty);
        assert_eq!(record.sync_status, RecordStatus::Synced);
        assert_eq!(
            Some(record.version),
            transport.remote_version("customer", "c-1")
        );

        let status = engine.status().await;
        assert_eq!(status.pending_uploads, 0);
        assert!(status.last_sync.is_some());
        assert!(!status.sync_in_progress);

        let window_start = Utc::now() - chrono::Duration::hours(1);
        let analytics = engine.analytics(window_start, Utc::now()).await;
        assert_eq!(analytics.total_operations, 1);
        assert_eq!(analytics.successful_operations, 1);
    }

    #[tokio::test]
    async fn test_cycle_uploads_in_priority_order() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = online_engine(CloudSettings::default(), transport.clone()).await;
        let store = engine.store();

        store.save("sale", "s-1", json!({"total": 1}), true).await.unwrap();
        store.save("sale", "s-2", json!({"total": 2}), true).await.unwrap();
        store.save("sale", "s-3", json!({"total": 3}), true).await.unwrap();
        engine
            .request_upload("sale", "s-3", SyncPriority::Critical)
            .await
            .unwrap();

        let report = engine.start_sync().await.unwrap();
        assert_eq!(report.uploads_completed, 3);

        let order: Vec<String> = transport
            .uploads()
            .into_iter()
            .map(|r| r.entity_id)
            .collect();
        assert_eq!(order, vec!["s-3", "s-1", "s-2"]);
    }

    #[tokio::test]
    async fn test_retryable_failure_requeues_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_upload_outcome(
            "customer",
            "c-1",
            ScriptedOutcome::Fail("connection reset".into()),
        );
        transport.push_upload_outcome(
            "customer",
            "c-1",
            ScriptedOutcome::Fail("connection reset".into()),
        );
        let engine = online_engine(fast_retry_settings(), transport.clone()).await;

        engine
            .store()
            .save("customer", "c-1", json!({"name": "Alice"}), true)
            .await
            .unwrap();

        let first = engine.start_sync().await.unwrap();
        assert_eq!(first.failures, 1);
        assert_eq!(first.uploads_completed, 0);
        // Every processed operation failed, so the sync marker stays put
        assert!(engine.status().await.last_sync.is_none());

        let second = engine.start_sync().await.unwrap();
        assert_eq!(second.failures, 1);

        let third = engine.start_sync().await.unwrap();
        assert_eq!(third.uploads_completed, 1);
        assert_eq!(third.failures, 0);

        let ops = engine.operations().await;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, OperationStatus::Completed);
        assert_eq!(ops[0].retry_count, 2);
        assert_eq!(transport.upload_calls(), 3);
        assert!(engine.status().await.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_retry_budget_exhausts_to_terminal_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..4 {
            transport.push_upload_outcome(
                "customer",
                "c-1",
                ScriptedOutcome::Fail("gateway unavailable".into()),
            );
        }
        let engine = online_engine(fast_retry_settings(), transport.clone()).await;

        engine
            .store()
            .save("customer", "c-1", json!({"name": "Alice"}), true)
            .await
            .unwrap();

        for _ in 0..4 {
            let report = engine.start_sync().await.unwrap();
            assert_eq!(report.failures, 1);
        }
        assert_eq!(transport.upload_calls(), 4);

        let ops = engine.operations().await;
        assert_eq!(ops.len(), 1);
        let failed = &ops[0];
        assert_eq!(failed.status, OperationStatus::Failed);
        assert_eq!(failed.retry_count, 3);
        assert!(failed.error_message.as_deref().unwrap().contains("gateway"));

        let record = engine.store().get("customer", "c-1").await.unwrap();
        assert!(record.is_dirty);
        assert_eq!(record.sync_status, RecordStatus::Error);
        assert!(engine
            .notifications()
            .await
            .iter()
            .any(|n| n.kind == NotificationKind::Sync));

        // An operator retry reactivates the operation with a fresh budget
        let retried = engine.retry_operation(&failed.id).await.unwrap();
        assert_eq!(retried.retry_count, 0);
        assert_eq!(
            engine.store().get("customer", "c-1").await.unwrap().sync_status,
            RecordStatus::Pending
        );
        let report = engine.start_sync().await.unwrap();
        assert_eq!(report.uploads_completed, 1);
        assert!(!engine.store().get("customer", "c-1").await.unwrap().is_dirty);
    }

    #[tokio::test]
    async fn test_offline_cycle_aborts_without_touching_queue() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(
            OfflineStore::in_memory("term-1", CloudSettings::default()).unwrap(),
        );
        let engine = SyncEngineBuilder::new(
            store,
            transport.clone(),
            Arc::new(StaticProbe::offline()),
        )
        .build()
        .await
        .unwrap();
        engine.connectivity().set_connection(ConnectionType::Wifi).await;

        engine
            .store()
            .save("customer", "c-1", json!({"name": "Alice"}), true)
            .await
            .unwrap();

        let err = engine.start_sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Offline(_)));
        assert_eq!(transport.upload_calls(), 0);

        let status = engine.status().await;
        assert!(!status.is_online);
        assert_eq!(status.pending_uploads, 1);
    }

    #[tokio::test]
    async fn test_wifi_only_gate_blocks_metered_links() {
        let transport = Arc::new(ScriptedTransport::new());
        let settings = CloudSettings {
            sync_on_wifi_only: true,
            ..CloudSettings::default()
        };
        let engine = online_engine(settings, transport.clone()).await;
        engine
            .store()
            .save("customer", "c-1", json!({"name": "Alice"}), true)
            .await
            .unwrap();

        engine
            .connectivity()
            .set_connection(ConnectionType::Cellular)
            .await;
        let err = engine.start_sync().await.unwrap_err();
        assert!(matches!(err, SyncError::MeteredLink(ConnectionType::Cellular)));
        assert_eq!(transport.upload_calls(), 0);

        engine.connectivity().set_connection(ConnectionType::Wifi).await;
        let report = engine.start_sync().await.unwrap();
        assert_eq!(report.uploads_completed, 1);
    }

    #[tokio::test]
    async fn test_download_applies_remote_rows() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_download_rows(
            "product",
            vec![
                RemoteRecord {
                    entity_id: "p-1".into(),
                    payload: json!({"price": 5}),
                    version: 1,
                },
                RemoteRecord {
                    entity_id: "p-2".into(),
                    payload: json!({"price": 8}),
                    version: 2,
                },
            ],
        );
        let engine = online_engine(CloudSettings::default(), transport.clone()).await;

        // p-1 already exists locally at the same version; p-2 is new
        engine
            .store()
            .save("product", "p-1", json!({"price": 4}), false)
            .await
            .unwrap();
        engine.request_download("product", SyncPriority::Normal).await;

        let report = engine.start_sync().await.unwrap();
        assert_eq!(report.downloads_completed, 1);
        assert_eq!(report.records_pulled, 1);

        let p1 = engine.store().get("product", "p-1").await.unwrap();
        assert_eq!(p1.payload, json!({"price": 4}));
        let p2 = engine.store().get("product", "p-2").await.unwrap();
        assert_eq!(p2.payload, json!({"price": 8}));
        assert_eq!(p2.version, 2);
    }

    #[tokio::test]
    async fn test_conflict_held_for_manual_resolution() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_upload_outcome(
            "customer",
            "c-1",
            ScriptedOutcome::Conflict {
                server_snapshot: json!({"name": "Remote"}),
                server_version: 5,
            },
        );
        let settings = CloudSettings {
            conflict_policy: ConflictPolicy::Manual,
            ..CloudSettings::default()
        };
        let engine = online_engine(settings, transport.clone()).await;

        engine
            .store()
            .save("customer", "c-1", json!({"name": "Local"}), true)
            .await
            .unwrap();

        let report = engine.start_sync().await.unwrap();
        assert_eq!(report.conflicts_detected, 1);
        assert_eq!(report.uploads_completed, 0);

        let open = engine.unresolved_conflicts().await;
        assert_eq!(open.len(), 1);
        let conflict = &open[0];
        assert_eq!(conflict.client_version, 1);
        assert_eq!(conflict.server_version, 5);

        // The detecting operation stays in progress until resolution
        let op = engine.operation(&conflict.operation_id).await.unwrap();
        assert_eq!(op.status, OperationStatus::InProgress);
        let record = engine.store().get("customer", "c-1").await.unwrap();
        assert_eq!(record.sync_status, RecordStatus::Conflict);

        // A second cycle does not re-upload the held row
        let report = engine.start_sync().await.unwrap();
        assert_eq!(report.uploads_completed + report.conflicts_detected, 0);
        assert_eq!(transport.upload_calls(), 1);

        let outcome = engine
            .resolve_conflict(&conflict.id, ResolutionChoice::Server, "operator")
            .await
            .unwrap();
        assert_eq!(outcome, ResolutionOutcome::Synced);
        let record = engine.store().get("customer", "c-1").await.unwrap();
        assert_eq!(record.payload, json!({"name": "Remote"}));
        assert_eq!(record.version, 5);
        assert!(engine.unresolved_conflicts().await.is_empty());
        assert_eq!(
            engine.operation(&conflict.operation_id).await.unwrap().status,
            OperationStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_policy_resolves_conflict_within_cycle() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_upload_outcome(
            "customer",
            "c-1",
            ScriptedOutcome::Conflict {
                server_snapshot: json!({"name": "Remote"}),
                server_version: 5,
            },
        );
        // Default policy is server-wins
        let engine = online_engine(CloudSettings::default(), transport.clone()).await;

        engine
            .store()
            .save("customer", "c-1", json!({"name": "Local"}), true)
            .await
            .unwrap();

        let report = engine.start_sync().await.unwrap();
        assert_eq!(report.conflicts_detected, 1);

        assert!(engine.unresolved_conflicts().await.is_empty());
        let conflicts = engine.conflicts().await;
        assert_eq!(conflicts[0].resolution, Some(ResolutionChoice::Server));
        assert_eq!(conflicts[0].resolved_by.as_deref(), Some("policy"));

        let record = engine.store().get("customer", "c-1").await.unwrap();
        assert!(!record.is_dirty);
        assert_eq!(record.payload, json!({"name": "Remote"}));
        assert_eq!(record.version, 5);
        assert_eq!(
            engine.operation(&conflicts[0].operation_id).await.unwrap().status,
            OperationStatus::Completed
        );
    }

    // Transport that parks the first upload until released, so a cycle can
    // be held open mid-flight from the test body.
    struct GatedTransport {
        entered: std::sync::Mutex<Option<oneshot::Sender<()>>>,
        release: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl RemoteTransport for GatedTransport {
        async fn upload(&self, request: UploadRequest) -> SyncResult<UploadResponse> {
            let entered = self.entered.lock().unwrap().take();
            if let Some(tx) = entered {
                let _ = tx.send(());
            }
            let release = self.release.lock().await.take();
            if let Some(rx) = release {
                let _ = rx.await;
            }
            Ok(UploadResponse::Accepted {
                new_version: request.base_version + 1,
            })
        }

        async fn download(
            &self,
            _entity_type: &str,
            _since: Option<DateTime<Utc>>,
        ) -> SyncResult<Vec<RemoteRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_cycles_run_single_flight() {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let transport = Arc::new(GatedTransport {
            entered: std::sync::Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        let store = Arc::new(
            OfflineStore::in_memory("term-1", CloudSettings::default()).unwrap(),
        );
        let engine = SyncEngineBuilder::new(store, transport, Arc::new(StaticProbe::online(40)))
            .build()
            .await
            .unwrap();
        engine.connectivity().set_connection(ConnectionType::Wifi).await;

        engine
            .store()
            .save("customer", "c-1", json!({"name": "Alice"}), true)
            .await
            .unwrap();

        let background = engine.clone();
        let first = tokio::spawn(async move { background.start_sync().await });
        entered_rx.await.unwrap();

        assert!(engine.status().await.sync_in_progress);
        let overlapped = engine.start_sync().await.unwrap();
        assert!(!overlapped.ran);

        release_tx.send(()).unwrap();
        let first = first.await.unwrap().unwrap();
        assert!(first.ran);
        assert_eq!(first.uploads_completed, 1);
        assert!(!engine.status().await.sync_in_progress);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_mid_flight_write_queues_follow_up_upload() {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let transport = Arc::new(GatedTransport {
            entered: std::sync::Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        let store = Arc::new(
            OfflineStore::in_memory("term-1", CloudSettings::default()).unwrap(),
        );
        let engine = SyncEngineBuilder::new(store, transport, Arc::new(StaticProbe::online(40)))
            .build()
            .await
            .unwrap();
        engine.connectivity().set_connection(ConnectionType::Wifi).await;

        engine
            .store()
            .save("customer", "c-1", json!({"step": 1}), true)
            .await
            .unwrap();

        let background = engine.clone();
        let cycle = tokio::spawn(async move { background.start_sync().await });
        entered_rx.await.unwrap();

        // The row moves on while its version 1 payload is in flight
        engine
            .store()
            .save("customer", "c-1", json!({"step": 2}), true)
            .await
            .unwrap();
        release_tx.send(()).unwrap();

        let report = cycle.await.unwrap().unwrap();
        assert_eq!(report.uploads_completed, 1);

        // The stale acceptance did not clear the dirty flag
        let record = engine.store().get("customer", "c-1").await.unwrap();
        assert!(record.is_dirty);
        assert_eq!(record.version, 2);

        let pending: Vec<SyncOperation> = engine
            .operations()
            .await
            .into_iter()
            .filter(|op| op.status == OperationStatus::Pending)
            .collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].base_version, 2);
        assert_eq!(pending[0].payload, json!({"step": 2}));

        let report = engine.start_sync().await.unwrap();
        assert_eq!(report.uploads_completed, 1);
        let record = engine.store().get("customer", "c-1").await.unwrap();
        assert!(!record.is_dirty);
        assert_eq!(record.version, 3);
    }

    #[tokio::test]
    async fn test_empty_cycle_still_advances_sync_marker() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = online_engine(CloudSettings::default(), transport).await;

        let report = engine.start_sync().await.unwrap();
        assert!(report.ran);
        assert_eq!(report.uploads_completed, 0);
        assert!(engine.status().await.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_backup_facade_requires_configuration() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = online_engine(CloudSettings::default(), transport).await;

        assert!(!engine.backups_configured());
        assert!(!engine.is_backup_due().await);
        let err = engine.create_backup(BackupKind::Full, None).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_backup_facade_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(
            OfflineStore::in_memory("term-1", CloudSettings::default()).unwrap(),
        );
        let engine = SyncEngineBuilder::new(store, transport, Arc::new(StaticProbe::online(40)))
            .backups(dir.path(), Some([9u8; 32]))
            .build()
            .await
            .unwrap();
        engine.connectivity().set_connection(ConnectionType::Wifi).await;

        engine
            .store()
            .save("customer", "c-1", json!({"name": "Alice"}), true)
            .await
            .unwrap();
        assert!(engine.is_backup_due().await);

        let record = engine.create_backup(BackupKind::Full, None).await.unwrap();
        assert!(!engine.is_backup_due().await);

        engine
            .store()
            .save("customer", "c-2", json!({"name": "Bob"}), true)
            .await
            .unwrap();
        assert_eq!(engine.status().await.pending_uploads, 2);

        let restored = engine.restore_backup(&record.id).await.unwrap();
        assert_eq!(restored, 1);
        assert!(engine.store().get("customer", "c-2").await.is_none());
        // Pending uploads were cancelled along with the state they described
        assert_eq!(engine.status().await.pending_uploads, 0);
        assert!(engine
            .notifications()
            .await
            .iter()
            .any(|n| n.kind == NotificationKind::Backup));

        assert_eq!(engine.list_backups().await.unwrap().len(), 1);
    }
}
