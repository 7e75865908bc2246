//! # Sync Queue
//!
//! Ordered, prioritized store of pending sync operations.
//!
//! ## Operation Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Queue State Machine                              │
//! │                                                                         │
//! │   enqueue            begin              complete                        │
//! │  ─────────▶ PENDING ───────▶ IN_PROGRESS ─────────▶ COMPLETED ──┐      │
//! │               ▲  │               │    │                          │      │
//! │               │  │ cancel        │    │ fail (budget spent)      │      │
//! │               │  ▼               │    ▼                          ▼      │
//! │               │ CANCELLED ◀──────┘  FAILED ──retry──▶ PENDING  archive  │
//! │               │                       │                                 │
//! │               └───── requeue ◀────────┘ (transient error,               │
//! │                      (+1 retry,          budget remaining)              │
//! │                       hold-off)                                         │
//! │                                                                         │
//! │  Terminal operations move to a bounded archive, newest first, where     │
//! │  they stay visible until acknowledged or pushed out.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dispatch Order
//! Uploads drain by priority (critical first), ties broken by enqueue
//! sequence, so two writes to the same entity type never reorder. Downloads
//! drain in plain enqueue order. Operations holding a retry hold-off are
//! skipped until the hold-off passes.
//!
//! The queue itself is single-threaded state; the engine wraps it in a
//! `tokio::sync::Mutex`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

use meridian_core::{
    CoreError, OperationKind, OperationStatus, SyncOperation, SyncPriority,
};

use crate::error::SyncResult;

/// How many terminal operations the archive keeps before dropping the oldest.
pub const DEFAULT_ARCHIVE_LIMIT: usize = 200;

/// Priority-aware operation queue with a bounded terminal archive.
#[derive(Debug)]
pub struct SyncQueue {
    /// Pending and in-progress operations, unordered.
    active: Vec<SyncOperation>,

    /// Terminal operations, newest first, capped at `archive_limit`.
    archive: VecDeque<SyncOperation>,

    archive_limit: usize,
    next_sequence: u64,
}

impl Default for SyncQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncQueue {
    pub fn new() -> Self {
        SyncQueue {
            active: Vec::new(),
            archive: VecDeque::new(),
            archive_limit: DEFAULT_ARCHIVE_LIMIT,
            next_sequence: 1,
        }
    }

    pub fn with_archive_limit(limit: usize) -> Self {
        SyncQueue {
            archive_limit: limit.max(1),
            ..Self::new()
        }
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Adds an operation, stamping its dispatch sequence. Returns the id.
    pub fn enqueue(&mut self, mut op: SyncOperation) -> String {
        op.sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!(
            op_id = %op.id,
            kind = %op.kind,
            entity_type = %op.entity_type,
            entity_id = %op.entity_id,
            priority = %op.priority,
            sequence = op.sequence,
            "Operation enqueued"
        );
        let id = op.id.clone();
        self.active.push(op);
        id
    }

    /// True when a pending or in-progress upload already covers this record.
    pub fn has_active_upload(&self, entity_type: &str, entity_id: &str) -> bool {
        self.active_upload_id(entity_type, entity_id).is_some()
    }

    /// Id of the pending or in-progress upload covering a row.
    pub fn active_upload_id(&self, entity_type: &str, entity_id: &str) -> Option<String> {
        self.active
            .iter()
            .find(|op| {
                op.kind == OperationKind::Upload
                    && op.entity_type == entity_type
                    && op.entity_id == entity_id
            })
            .map(|op| op.id.clone())
    }

    /// Folds a new local write into an already pending upload of the same
    /// record, so one record never holds two queue slots.
    ///
    /// Only pending operations are touched; an in-flight upload keeps the
    /// payload it left with. Returns false when there was nothing to fold
    /// into and the caller should enqueue.
    pub fn refresh_pending_upload(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        payload: &Value,
        base_version: i64,
        priority: SyncPriority,
    ) -> bool {
        let Some(op) = self.active.iter_mut().find(|op| {
            op.kind == OperationKind::Upload
                && op.status == OperationStatus::Pending
                && op.entity_type == entity_type
                && op.entity_id == entity_id
        }) else {
            return false;
        };

        op.payload = payload.clone();
        op.base_version = base_version;
        if priority > op.priority {
            op.priority = priority;
        }
        debug!(op_id = %op.id, entity_type, entity_id, "Pending upload refreshed");
        true
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Ids of operations ready to run now, most urgent first, at most `limit`.
    pub fn ready_batch(
        &self,
        kind: OperationKind,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut ready: Vec<&SyncOperation> = self
            .active
            .iter()
            .filter(|op| op.kind == kind && op.is_ready(now))
            .collect();

        match kind {
            OperationKind::Upload => {
                ready.sort_by(|a, b| {
                    b.priority
                        .cmp(&a.priority)
                        .then_with(|| a.sequence.cmp(&b.sequence))
                });
            }
            OperationKind::Download => {
                ready.sort_by_key(|op| op.sequence);
            }
        }

        ready.into_iter().take(limit).map(|op| op.id.clone()).collect()
    }

    /// Marks a pending operation in-progress and returns a working copy.
    /// Returns None if the operation is missing or not pending.
    pub fn begin(&mut self, id: &str, now: DateTime<Utc>) -> Option<SyncOperation> {
        let op = self
            .active
            .iter_mut()
            .find(|op| op.id == id && op.status == OperationStatus::Pending)?;
        op.begin(now);
        Some(op.clone())
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Settles an in-progress operation as completed and archives it.
    pub fn complete(&mut self, id: &str, now: DateTime<Utc>) -> SyncResult<SyncOperation> {
        let index = self.require_in_progress(id, "complete")?;
        let mut op = self.active.swap_remove(index);
        op.complete(now);
        let settled = op.clone();
        self.push_archive(op);
        Ok(settled)
    }

    /// Returns an in-progress operation to pending after a transient error.
    pub fn requeue(
        &mut self,
        id: &str,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> SyncResult<SyncOperation> {
        let index = self.require_in_progress(id, "requeue")?;
        let op = &mut self.active[index];
        op.requeue(error, next_attempt_at);
        Ok(op.clone())
    }

    /// Settles an in-progress operation as failed and archives it.
    pub fn fail(&mut self, id: &str, error: &str, now: DateTime<Utc>) -> SyncResult<SyncOperation> {
        let index = self.require_in_progress(id, "fail")?;
        let mut op = self.active.swap_remove(index);
        op.fail(error, now);
        let settled = op.clone();
        self.push_archive(op);
        Ok(settled)
    }

    /// Cancels a pending operation. False when the id is missing or the
    /// operation already left the pending state.
    pub fn cancel_pending(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        self.cancel_where(id, OperationStatus::Pending, now)
    }

    /// Cancels an in-progress operation. Used when a conflict resolution
    /// supersedes the upload that detected the conflict.
    pub fn cancel_in_progress(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        self.cancel_where(id, OperationStatus::InProgress, now)
    }

    fn cancel_where(&mut self, id: &str, expected: OperationStatus, now: DateTime<Utc>) -> bool {
        let Some(index) = self
            .active
            .iter()
            .position(|op| op.id == id && op.status == expected)
        else {
            return false;
        };
        let mut op = self.active.swap_remove(index);
        op.cancel(now);
        debug!(op_id = %op.id, "Operation cancelled");
        self.push_archive(op);
        true
    }

    // =========================================================================
    // Archive
    // =========================================================================

    /// Puts an archived failed operation back in the queue with a fresh
    /// retry budget. Returns the reactivated copy.
    pub fn retry(&mut self, id: &str) -> Option<SyncOperation> {
        let index = self
            .archive
            .iter()
            .position(|op| op.id == id && op.status == OperationStatus::Failed)?;
        let mut op = self.archive.remove(index)?;
        op.reset_for_retry();
        debug!(op_id = %op.id, "Failed operation requeued by operator");
        let reactivated = op.clone();
        self.active.push(op);
        Some(reactivated)
    }

    /// Dismisses a terminal operation from the archive.
    pub fn acknowledge(&mut self, id: &str) -> bool {
        let Some(index) = self.archive.iter().position(|op| op.id == id) else {
            return false;
        };
        self.archive.remove(index);
        true
    }

    fn push_archive(&mut self, op: SyncOperation) {
        self.archive.push_front(op);
        self.archive.truncate(self.archive_limit);
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Looks up an operation in the queue or the archive.
    pub fn get(&self, id: &str) -> Option<SyncOperation> {
        self.active
            .iter()
            .find(|op| op.id == id)
            .or_else(|| self.archive.iter().find(|op| op.id == id))
            .cloned()
    }

    /// Every known operation: active first, then the archive newest first.
    pub fn operations(&self) -> Vec<SyncOperation> {
        self.active
            .iter()
            .chain(self.archive.iter())
            .cloned()
            .collect()
    }

    /// Pending upload and download counts. In-progress operations are not
    /// pending; they are being worked right now.
    pub fn pending_counts(&self) -> (u64, u64) {
        let mut uploads = 0;
        let mut downloads = 0;
        for op in &self.active {
            if op.status != OperationStatus::Pending {
                continue;
            }
            match op.kind {
                OperationKind::Upload => uploads += 1,
                OperationKind::Download => downloads += 1,
            }
        }
        (uploads, downloads)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn archived_len(&self) -> usize {
        self.archive.len()
    }

    fn require_in_progress(&self, id: &str, action: &str) -> SyncResult<usize> {
        let index = self
            .active
            .iter()
            .position(|op| op.id == id)
            .ok_or_else(|| CoreError::OperationNotFound(id.to_string()))?;
        let op = &self.active[index];
        if op.status != OperationStatus::InProgress {
            return Err(CoreError::InvalidOperationState {
                operation_id: id.to_string(),
                current_status: op.status.to_string(),
                action: action.to_string(),
            }
            .into());
        }
        Ok(index)
    }
}
