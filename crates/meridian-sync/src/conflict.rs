//! # Conflict Resolution
//!
//! Settles divergences between a local record and the server's copy.
//!
//! ## Resolution Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Resolving a Conflict                              │
//! │                                                                         │
//! │  resolve(id, choice)                                                    │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  record_resolution  ◀── exactly once; a second attempt is rejected     │
//! │        │                                                                │
//! │        ├── SERVER ─▶ overwrite local row with server snapshot           │
//! │        │             (local edits discarded)                            │
//! │        │                                                                │
//! │        ├── CLIENT ─▶ forced upload of the client snapshot               │
//! │        │             (version check bypassed once)                      │
//! │        │                                                                │
//! │        └── MERGE ──▶ MergeStrategy combines both snapshots,             │
//! │                      save locally, upload against server version       │
//! │                                                                         │
//! │  The upload that detected the conflict stays in-progress until here:   │
//! │  it settles completed on success. If the resolution's own network      │
//! │  step fails, it is cancelled and a high-priority replacement upload    │
//! │  carries the chosen state instead.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use meridian_core::{
    ConflictRecord, CoreError, NotificationKind, ResolutionChoice, SyncOperation, SyncPriority,
};
use meridian_store::OfflineStore;

use crate::error::SyncResult;
use crate::notify::NotificationCenter;
use crate::queue::SyncQueue;
use crate::transport::{RemoteTransport, UploadRequest, UploadResponse};

// =============================================================================
// Merge Strategy
// =============================================================================

/// Combines the two sides of a conflict into one payload.
pub trait MergeStrategy: Send + Sync {
    fn merge(&self, conflict: &ConflictRecord) -> Value;
}

/// Field-level merge ordered by record timestamps.
///
/// Reads `last_modified` or `updated_at` (RFC 3339) from each snapshot to
/// decide which side is newer, then overlays the newer side's fields onto
/// the older side's. Fields present on only one side survive. Ties and
/// missing timestamps count the client side as newer. Non-object snapshots
/// cannot be merged field-wise; the newer side is taken wholesale.
pub struct LastWriterWins;

impl LastWriterWins {
    fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
        let obj = value.as_object()?;
        for key in ["last_modified", "updated_at"] {
            if let Some(raw) = obj.get(key).and_then(Value::as_str) {
                if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
                    return Some(ts.with_timezone(&Utc));
                }
            }
        }
        None
    }
}

impl MergeStrategy for LastWriterWins {
    fn merge(&self, conflict: &ConflictRecord) -> Value {
        let client_ts = Self::timestamp(&conflict.client_snapshot);
        let server_ts = Self::timestamp(&conflict.server_snapshot);

        let client_newer = match (client_ts, server_ts) {
            (Some(client), Some(server)) => client >= server,
            _ => true,
        };

        let (newer, older) = if client_newer {
            (&conflict.client_snapshot, &conflict.server_snapshot)
        } else {
            (&conflict.server_snapshot, &conflict.client_snapshot)
        };

        match (older.as_object(), newer.as_object()) {
            (Some(base), Some(overlay)) => {
                let mut merged = base.clone();
                for (key, value) in overlay {
                    merged.insert(key.clone(), value.clone());
                }
                Value::Object(merged)
            }
            _ => newer.clone(),
        }
    }
}

// =============================================================================
// Resolution Outcome
// =============================================================================

/// How far a resolution got within the `resolve` call itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The chosen state is consistent on both sides.
    Synced,

    /// The network step failed. The chosen state is queued as a
    /// high-priority upload and will reach the server on a later cycle.
    Requeued,
}

// =============================================================================
// Conflict Resolver
// =============================================================================

/// Applies resolution choices to detected conflicts.
pub struct ConflictResolver {
    store: Arc<OfflineStore>,
    transport: Arc<dyn RemoteTransport>,
    queue: Arc<Mutex<SyncQueue>>,
    conflicts: Arc<RwLock<Vec<ConflictRecord>>>,
    merge: Arc<dyn MergeStrategy>,
    notifier: Arc<NotificationCenter>,
}

impl ConflictResolver {
    pub fn new(
        store: Arc<OfflineStore>,
        transport: Arc<dyn RemoteTransport>,
        queue: Arc<Mutex<SyncQueue>>,
        conflicts: Arc<RwLock<Vec<ConflictRecord>>>,
        merge: Arc<dyn MergeStrategy>,
        notifier: Arc<NotificationCenter>,
    ) -> Self {
        ConflictResolver {
            store,
            transport,
            queue,
            conflicts,
            merge,
            notifier,
        }
    }

    /// Resolves one conflict with the given choice.
    ///
    /// The decision is recorded before any store or network work, so it
    /// stands even if a later step fails; the conflict never becomes
    /// resolvable twice.
    pub async fn resolve(
        &self,
        conflict_id: &str,
        choice: ResolutionChoice,
        resolved_by: &str,
    ) -> SyncResult<ResolutionOutcome> {
        let now = Utc::now();

        let conflict = {
            let mut conflicts = self.conflicts.write().await;
            let record = conflicts
                .iter_mut()
                .find(|c| c.id == conflict_id)
                .ok_or_else(|| CoreError::ConflictNotFound(conflict_id.to_string()))?;
            if record.is_resolved() {
                return Err(CoreError::ConflictAlreadyResolved(conflict_id.to_string()).into());
            }
            record.record_resolution(choice, resolved_by, now);
            record.clone()
        };

        let outcome = match choice {
            ResolutionChoice::Server => self.apply_server_wins(&conflict, now).await?,
            ResolutionChoice::Client => self.apply_client_wins(&conflict, now).await?,
            ResolutionChoice::Merge => self.apply_merge(&conflict, now).await?,
        };

        info!(
            conflict_id = %conflict.id,
            entity_type = %conflict.entity_type,
            entity_id = %conflict.entity_id,
            choice = %choice,
            resolved_by = %resolved_by,
            outcome = ?outcome,
            "Conflict resolved"
        );
        self.notifier
            .publish(
                NotificationKind::Conflict,
                "Conflict resolved",
                format!(
                    "{}/{} resolved as {}",
                    conflict.entity_type, conflict.entity_id, choice
                ),
                SyncPriority::Normal,
                now,
            )
            .await;

        Ok(outcome)
    }

    /// Discards the local edit and adopts the server snapshot.
    async fn apply_server_wins(
        &self,
        conflict: &ConflictRecord,
        now: DateTime<Utc>,
    ) -> SyncResult<ResolutionOutcome> {
        self.store
            .overwrite_with_remote(
                &conflict.entity_type,
                &conflict.entity_id,
                conflict.server_snapshot.clone(),
                conflict.server_version,
            )
            .await?;
        self.settle_operation(&conflict.operation_id, now).await;
        Ok(ResolutionOutcome::Synced)
    }

    /// Pushes the client snapshot with the version check bypassed.
    async fn apply_client_wins(
        &self,
        conflict: &ConflictRecord,
        now: DateTime<Utc>,
    ) -> SyncResult<ResolutionOutcome> {
        let request = UploadRequest {
            entity_type: conflict.entity_type.clone(),
            entity_id: conflict.entity_id.clone(),
            base_version: conflict.client_version,
            force: true,
            payload: conflict.client_snapshot.clone(),
        };

        match self.transport.upload(request).await {
            Ok(UploadResponse::Accepted { new_version }) => {
                self.store
                    .mark_synced(&conflict.entity_type, &conflict.entity_id, new_version)
                    .await?;
                self.settle_operation(&conflict.operation_id, now).await;
                Ok(ResolutionOutcome::Synced)
            }
            Ok(UploadResponse::Conflict { .. }) => {
                warn!(
                    conflict_id = %conflict.id,
                    "Forced upload reported a conflict; queueing replacement"
                );
                self.supersede(
                    conflict,
                    conflict.client_snapshot.clone(),
                    conflict.client_version,
                    true,
                    now,
                )
                .await?;
                Ok(ResolutionOutcome::Requeued)
            }
            Err(e) => {
                warn!(
                    conflict_id = %conflict.id,
                    error = %e,
                    "Resolution upload failed; queueing replacement"
                );
                self.supersede(
                    conflict,
                    conflict.client_snapshot.clone(),
                    conflict.client_version,
                    true,
                    now,
                )
                .await?;
                Ok(ResolutionOutcome::Requeued)
            }
        }
    }

    /// Merges both snapshots, saves the result locally, then uploads it
    /// against the server's version.
    async fn apply_merge(
        &self,
        conflict: &ConflictRecord,
        now: DateTime<Utc>,
    ) -> SyncResult<ResolutionOutcome> {
        let merged = self.merge.merge(conflict);

        // Saved while the detecting upload is still in progress, so the
        // store observer does not queue a second upload for this record.
        self.store
            .save(&conflict.entity_type, &conflict.entity_id, merged.clone(), true)
            .await?;

        let request = UploadRequest {
            entity_type: conflict.entity_type.clone(),
            entity_id: conflict.entity_id.clone(),
            base_version: conflict.server_version,
            force: false,
            payload: merged.clone(),
        };

        match self.transport.upload(request).await {
            Ok(UploadResponse::Accepted { new_version }) => {
                self.store
                    .mark_synced(&conflict.entity_type, &conflict.entity_id, new_version)
                    .await?;
                self.settle_operation(&conflict.operation_id, now).await;
                Ok(ResolutionOutcome::Synced)
            }
            Ok(UploadResponse::Conflict { .. }) | Err(_) => {
                warn!(
                    conflict_id = %conflict.id,
                    "Merged upload did not land; queueing replacement"
                );
                self.supersede(conflict, merged, conflict.server_version, false, now)
                    .await?;
                Ok(ResolutionOutcome::Requeued)
            }
        }
    }

    /// Settles the upload that detected the conflict as completed.
    async fn settle_operation(&self, operation_id: &str, now: DateTime<Utc>) {
        let mut queue = self.queue.lock().await;
        if let Err(e) = queue.complete(operation_id, now) {
            warn!(operation_id, error = %e, "Could not settle conflicted operation");
        }
    }

    /// Replaces the held upload with a fresh high-priority one carrying the
    /// chosen state, and puts the record back on the upload path.
    async fn supersede(
        &self,
        conflict: &ConflictRecord,
        payload: Value,
        base_version: i64,
        force: bool,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        {
            let mut queue = self.queue.lock().await;
            queue.cancel_in_progress(&conflict.operation_id, now);
            let mut op = SyncOperation::upload(
                &conflict.entity_type,
                &conflict.entity_id,
                payload,
                base_version,
                SyncPriority::High,
                now,
            );
            op.force = force;
            queue.enqueue(op);
        }
        self.store
            .mark_pending(&conflict.entity_type, &conflict.entity_id)
            .await?;
        Ok(())
    }
}
