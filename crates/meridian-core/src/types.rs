//! # Domain Types
//!
//! Core domain types used throughout the Meridian sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  OfflineRecord  │   │  SyncOperation  │   │ ConflictRecord  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  entity key     │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  payload (JSON) │   │  kind, status   │   │  operation_id   │       │
//! │  │  version        │   │  priority       │   │  both snapshots │       │
//! │  │  is_dirty       │   │  retry_count    │   │  resolution     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SyncStatus    │   │  BackupRecord   │   │  DeviceRecord   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  derived view   │   │  checksum over  │   │  registry entry │       │
//! │  │  of the engine  │   │  final bytes    │   │  per terminal   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership Rules
//! - The sync engine exclusively owns `SyncOperation` status transitions
//! - The offline store exclusively owns record version/dirty state
//! - The conflict resolver exclusively owns resolution transitions
//!
//! The transition methods here are pure: they take the current time as an
//! argument and never touch a clock, a file, or the network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::ENTITY_ID_WILDCARD;

// =============================================================================
// Sync Priority
// =============================================================================

/// Processing priority of a queued sync operation.
///
/// ## Ordering
/// Derives `Ord` in ascending urgency, so a descending sort drains the queue
/// critical-first:
/// ```rust
/// use meridian_core::types::SyncPriority;
///
/// assert!(SyncPriority::Critical > SyncPriority::High);
/// assert!(SyncPriority::Normal > SyncPriority::Low);
/// ```
/// Operations of equal priority keep their enqueue order (stable sort on the
/// queue's sequence number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncPriority {
    /// Background housekeeping (analytics rollups, etc.).
    Low,
    /// Routine entity writes. Default for dirty-write uploads.
    Normal,
    /// User-visible data the register depends on.
    High,
    /// Must go out next cycle (completed sales, payments).
    Critical,
}

impl Default for SyncPriority {
    fn default() -> Self {
        SyncPriority::Normal
    }
}

impl fmt::Display for SyncPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncPriority::Low => "low",
            SyncPriority::Normal => "normal",
            SyncPriority::High => "high",
            SyncPriority::Critical => "critical",
        })
    }
}

impl FromStr for SyncPriority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(SyncPriority::Low),
            "normal" => Ok(SyncPriority::Normal),
            "high" => Ok(SyncPriority::High),
            "critical" => Ok(SyncPriority::Critical),
            _ => Err(ValidationError::NotAllowed {
                field: "priority".to_string(),
                allowed: vec![
                    "low".to_string(),
                    "normal".to_string(),
                    "high".to_string(),
                    "critical".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Operation Kind & Status
// =============================================================================

/// Direction of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Push a local record to the remote source of truth.
    Upload,
    /// Pull remote changes for an entity type.
    Download,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Upload => "upload",
            OperationKind::Download => "download",
        })
    }
}

/// Lifecycle state of a sync operation.
///
/// ## State Machine
/// ```text
/// pending ──► in_progress ──► completed
///    ▲             │
///    │ retry       ├──► failed      (retry budget exhausted)
///    └─────────────┤
///                  └──► cancelled   (superseded by a resolution)
///
/// cancel is only accepted while still pending
/// ```
/// `pending` and `in_progress` are the only non-terminal states. An
/// in-progress operation with an unresolved conflict attached stays
/// in-progress until the conflict is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting in the queue (fresh or awaiting a retry slot).
    Pending,
    /// Dispatched in the current cycle, or held on an unresolved conflict.
    InProgress,
    /// Remote accepted the operation.
    Completed,
    /// Retry budget exhausted. Terminal.
    Failed,
    /// Withdrawn before dispatch or superseded by a conflict resolution.
    Cancelled,
}

impl OperationStatus {
    /// Terminal states never transition again and move to the archive.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// Active states count towards the dirty-record guarantee.
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::InProgress)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        })
    }
}

// =============================================================================
// Sync Operation
// =============================================================================

/// A queued unit of sync work: push one record up, or pull one entity type
/// down.
///
/// ## Lifecycle
/// Created when a dirty write occurs (upload) or a remote pull is requested
/// (download). The queue assigns `sequence` at enqueue time; the engine owns
/// every status transition after that. Terminal operations move to a bounded
/// archive until acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncOperation {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Upload or download.
    pub kind: OperationKind,

    /// Entity class this operation covers ("customer", "product", ...).
    pub entity_type: String,

    /// Record id for uploads; `"*"` for type-wide downloads.
    pub entity_id: String,

    /// Snapshot of the record being uploaded. Null for downloads.
    #[ts(type = "any")]
    pub payload: Value,

    /// Record version the client held when the operation was created.
    /// The remote compares against this to detect conflicts.
    pub base_version: i64,

    /// Skip the remote version check once. Set only by conflict resolution.
    pub force: bool,

    pub status: OperationStatus,
    pub priority: SyncPriority,

    /// Completed retry attempts. Bounded by `CloudSettings::max_retries`.
    pub retry_count: u32,

    /// Queue-assigned monotonic sequence. Ties within a priority class are
    /// broken by this, keeping the drain order stable.
    pub sequence: u64,

    /// Earliest time the next attempt may run. None means immediately.
    #[ts(as = "Option<String>")]
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Last transport error, kept across retries for diagnostics.
    pub error_message: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub started_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    /// Creates a pending upload for one record.
    pub fn upload(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
        base_version: i64,
        priority: SyncPriority,
        now: DateTime<Utc>,
    ) -> Self {
        SyncOperation {
            id: Uuid::new_v4().to_string(),
            kind: OperationKind::Upload,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            base_version,
            force: false,
            status: OperationStatus::Pending,
            priority,
            retry_count: 0,
            sequence: 0,
            next_attempt_at: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Creates a pending download covering a whole entity type.
    pub fn download(
        entity_type: impl Into<String>,
        priority: SyncPriority,
        now: DateTime<Utc>,
    ) -> Self {
        SyncOperation {
            id: Uuid::new_v4().to_string(),
            kind: OperationKind::Download,
            entity_type: entity_type.into(),
            entity_id: ENTITY_ID_WILDCARD.to_string(),
            payload: Value::Null,
            base_version: 0,
            force: false,
            status: OperationStatus::Pending,
            priority,
            retry_count: 0,
            sequence: 0,
            next_attempt_at: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Pending and past its retry hold-off, if any.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Pending
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Dispatch: pending → in_progress.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.status = OperationStatus::InProgress;
        self.started_at = Some(now);
    }

    /// Remote accepted: → completed. Clears any stale retry error.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = OperationStatus::Completed;
        self.completed_at = Some(now);
        self.error_message = None;
    }

    /// Retry budget exhausted: → failed. Terminal.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = OperationStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = Some(error.into());
    }

    /// Withdrawn: → cancelled. Terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = OperationStatus::Cancelled;
        self.completed_at = Some(now);
    }

    /// Transient failure: back to pending with the retry counter bumped and
    /// an optional hold-off before the next attempt.
    pub fn requeue(&mut self, error: impl Into<String>, next_attempt_at: Option<DateTime<Utc>>) {
        self.status = OperationStatus::Pending;
        self.retry_count += 1;
        self.next_attempt_at = next_attempt_at;
        self.error_message = Some(error.into());
    }

    /// Failed operation put back in the queue by an operator. Resets the
    /// retry budget so it gets a full set of attempts again.
    pub fn reset_for_retry(&mut self) {
        self.status = OperationStatus::Pending;
        self.retry_count = 0;
        self.next_attempt_at = None;
        self.error_message = None;
        self.completed_at = None;
    }

    /// Approximate wire size, used by the analytics report.
    pub fn payload_bytes(&self) -> u64 {
        match &self.payload {
            Value::Null => 0,
            other => serde_json::to_vec(other).map(|v| v.len() as u64).unwrap_or(0),
        }
    }

    /// Wall-clock duration of the finished attempt, if both ends were stamped.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

// =============================================================================
// Offline Record
// =============================================================================

/// Sync state of a locally stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Local and remote agree as of the record's version.
    Synced,
    /// Local changes await upload.
    Pending,
    /// An unresolved conflict blocks this record.
    Conflict,
    /// Last sync attempt exhausted its retries.
    Error,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordStatus::Synced => "synced",
            RecordStatus::Pending => "pending",
            RecordStatus::Conflict => "conflict",
            RecordStatus::Error => "error",
        })
    }
}

/// One entity snapshot in the offline store, keyed by
/// (`entity_type`, `entity_id`).
///
/// ## Dirty Guarantee
/// While `is_dirty` is true there is always a pending/in-progress operation
/// or an unresolved conflict covering this record. The store's dirty-write
/// hook and the engine's bookkeeping maintain this together; nothing else
/// may clear the flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OfflineRecord {
    pub entity_type: String,
    pub entity_id: String,

    /// Full entity snapshot as JSON.
    #[ts(type = "any")]
    pub payload: Value,

    /// Monotonically increasing content version. Bumped on every local write
    /// that changes the payload; replaced by the remote version on download
    /// or upload acknowledgement.
    pub version: i64,

    /// Local changes not yet confirmed by the remote.
    pub is_dirty: bool,

    pub sync_status: RecordStatus,

    #[ts(as = "String")]
    pub last_modified: DateTime<Utc>,
}

impl OfflineRecord {
    /// First local write of a record. Starts at version 1, dirty.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        OfflineRecord {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            version: 1,
            is_dirty: true,
            sync_status: RecordStatus::Pending,
            last_modified: now,
        }
    }

    /// Applies a local write. The version bumps only when the payload
    /// actually changed; a rewrite of identical content keeps it.
    /// Returns whether the content changed.
    pub fn apply_local_write(&mut self, payload: Value, now: DateTime<Utc>) -> bool {
        let changed = self.payload != payload;
        if changed {
            self.payload = payload;
            self.version += 1;
        }
        self.is_dirty = true;
        self.sync_status = RecordStatus::Pending;
        self.last_modified = now;
        changed
    }

    /// First sight of a record that originated remotely. Clean by definition.
    pub fn from_remote(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
        version: i64,
        now: DateTime<Utc>,
    ) -> Self {
        OfflineRecord {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            version,
            is_dirty: false,
            sync_status: RecordStatus::Synced,
            last_modified: now,
        }
    }

    /// Applies a record pulled from the remote. Clean by definition.
    pub fn apply_remote(&mut self, payload: Value, version: i64, now: DateTime<Utc>) {
        self.payload = payload;
        self.version = version;
        self.is_dirty = false;
        self.sync_status = RecordStatus::Synced;
        self.last_modified = now;
    }

    /// Upload acknowledged: adopt the server-assigned version, clear dirty.
    pub fn mark_synced(&mut self, new_version: i64) {
        self.version = new_version;
        self.is_dirty = false;
        self.sync_status = RecordStatus::Synced;
    }

    /// An unresolved conflict now blocks this record.
    pub fn mark_conflict(&mut self) {
        self.sync_status = RecordStatus::Conflict;
    }

    /// Sync attempts exhausted; record stays dirty.
    pub fn mark_error(&mut self) {
        self.sync_status = RecordStatus::Error;
    }

    /// Back on the upload path (after a resolution or an operator retry).
    pub fn mark_pending(&mut self) {
        self.is_dirty = true;
        self.sync_status = RecordStatus::Pending;
    }
}

// =============================================================================
// Conflicts
// =============================================================================

/// How the divergence between local and remote was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Remote version moved past the client's base version.
    VersionMismatch,
    /// Same version, different content.
    DataConflict,
    /// Remote deleted a record the client modified.
    DeleteConflict,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictType::VersionMismatch => "version_mismatch",
            ConflictType::DataConflict => "data_conflict",
            ConflictType::DeleteConflict => "delete_conflict",
        })
    }
}

/// Which side a conflict was resolved in favor of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionChoice {
    /// Keep the local snapshot; force-upload it.
    Client,
    /// Adopt the server snapshot; discard local changes.
    Server,
    /// Combine both snapshots via the configured merge strategy.
    Merge,
}

impl fmt::Display for ResolutionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResolutionChoice::Client => "client",
            ResolutionChoice::Server => "server",
            ResolutionChoice::Merge => "merge",
        })
    }
}

impl FromStr for ResolutionChoice {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(ResolutionChoice::Client),
            "server" => Ok(ResolutionChoice::Server),
            "merge" => Ok(ResolutionChoice::Merge),
            _ => Err(ValidationError::NotAllowed {
                field: "resolution".to_string(),
                allowed: vec![
                    "client".to_string(),
                    "server".to_string(),
                    "merge".to_string(),
                ],
            }),
        }
    }
}

/// A detected divergence between the local and remote copy of one record.
///
/// Holds both full snapshots so either side (or a merge of the two) can be
/// applied later. `resolution` is set at most once; the resolver rejects a
/// second attempt.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConflictRecord {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// The upload operation that hit the conflict. That operation stays
    /// in-progress until this conflict is resolved.
    pub operation_id: String,

    pub entity_type: String,
    pub entity_id: String,

    /// Local snapshot at detection time.
    #[ts(type = "any")]
    pub client_snapshot: Value,

    /// Remote snapshot returned by the rejected upload.
    #[ts(type = "any")]
    pub server_snapshot: Value,

    pub client_version: i64,
    pub server_version: i64,

    pub conflict_type: ConflictType,

    /// Set exactly once by the resolver. Immutable thereafter.
    pub resolution: Option<ResolutionChoice>,
    pub resolved_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub resolved_at: Option<DateTime<Utc>>,

    #[ts(as = "String")]
    pub detected_at: DateTime<Utc>,
}

impl ConflictRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        operation_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        client_snapshot: Value,
        client_version: i64,
        server_snapshot: Value,
        server_version: i64,
        now: DateTime<Utc>,
    ) -> Self {
        // A null server snapshot means the remote deleted the record.
        let conflict_type = if server_snapshot.is_null() {
            ConflictType::DeleteConflict
        } else if client_version == server_version {
            ConflictType::DataConflict
        } else {
            ConflictType::VersionMismatch
        };

        ConflictRecord {
            id: Uuid::new_v4().to_string(),
            operation_id: operation_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            client_snapshot,
            server_snapshot,
            client_version,
            server_version,
            conflict_type,
            resolution: None,
            resolved_by: None,
            resolved_at: None,
            detected_at: now,
        }
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Records the decision. Caller must have checked `is_resolved` first.
    pub fn record_resolution(
        &mut self,
        choice: ResolutionChoice,
        resolved_by: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.resolution = Some(choice);
        self.resolved_by = Some(resolved_by.into());
        self.resolved_at = Some(now);
    }
}

// =============================================================================
// Connectivity
// =============================================================================

/// Network link class reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    None,
}

impl ConnectionType {
    /// Links the wifi-only setting accepts. Ethernet counts as wifi-class:
    /// the setting exists to avoid metered links, not to require radio.
    #[inline]
    pub const fn unmetered(&self) -> bool {
        matches!(self, ConnectionType::Wifi | ConnectionType::Ethernet)
    }

    #[inline]
    pub const fn is_connected(&self) -> bool {
        !matches!(self, ConnectionType::None)
    }
}

impl Default for ConnectionType {
    fn default() -> Self {
        ConnectionType::None
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionType::Wifi => "wifi",
            ConnectionType::Cellular => "cellular",
            ConnectionType::Ethernet => "ethernet",
            ConnectionType::None => "none",
        })
    }
}

/// Rough link quality derived from probe round-trip times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSpeed {
    Fast,
    Medium,
    Slow,
    Unknown,
}

impl ConnectionSpeed {
    /// Probe RTT below this is a fast link (milliseconds).
    pub const FAST_RTT_MS: u64 = 150;
    /// Probe RTT below this is a medium link (milliseconds).
    pub const MEDIUM_RTT_MS: u64 = 600;

    /// Classifies a reachability probe round-trip time.
    pub const fn classify_rtt(rtt_ms: u64) -> Self {
        if rtt_ms < Self::FAST_RTT_MS {
            ConnectionSpeed::Fast
        } else if rtt_ms < Self::MEDIUM_RTT_MS {
            ConnectionSpeed::Medium
        } else {
            ConnectionSpeed::Slow
        }
    }
}

impl Default for ConnectionSpeed {
    fn default() -> Self {
        ConnectionSpeed::Unknown
    }
}

impl fmt::Display for ConnectionSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionSpeed::Fast => "fast",
            ConnectionSpeed::Medium => "medium",
            ConnectionSpeed::Slow => "slow",
            ConnectionSpeed::Unknown => "unknown",
        })
    }
}

// =============================================================================
// Sync Status (observable view)
// =============================================================================

/// Aggregate view of the engine for the UI. Derived, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStatus {
    pub is_online: bool,
    pub connection_type: ConnectionType,
    pub connection_speed: ConnectionSpeed,

    /// Completion time of the last cycle that did not fail outright.
    #[ts(as = "Option<String>")]
    pub last_sync: Option<DateTime<Utc>>,

    pub pending_uploads: u64,
    pub pending_downloads: u64,

    /// The single-flight lock, as seen by observers.
    pub sync_in_progress: bool,

    /// Automatic triggering suspended; manual sync still allowed.
    pub auto_sync_paused: bool,

    /// Per-operation errors from the most recent cycle.
    pub sync_errors: Vec<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            is_online: false,
            connection_type: ConnectionType::None,
            connection_speed: ConnectionSpeed::Unknown,
            last_sync: None,
            pending_uploads: 0,
            pending_downloads: 0,
            sync_in_progress: false,
            auto_sync_paused: false,
            sync_errors: Vec::new(),
        }
    }
}

// =============================================================================
// Backups
// =============================================================================

/// Declared capture scope of a backup. Recorded as metadata; every backup
/// snapshots the full document so a restore is always a whole-document swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    Incremental,
    Differential,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Differential => "differential",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        })
    }
}

/// Index entry for one backup artifact.
///
/// `checksum` is SHA-256 over the final stored bytes, after compression and
/// encryption. Restore re-hashes what it reads from disk and refuses to
/// proceed on a mismatch, before attempting decryption.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BackupRecord {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Operator-facing label ("nightly-2026-08-22", ...).
    pub name: String,

    pub kind: BackupKind,
    pub status: BackupStatus,

    /// Snapshot size before compression/encryption.
    pub raw_size_bytes: u64,

    /// Size of the artifact as stored.
    pub stored_size_bytes: u64,

    /// Hex SHA-256 of the stored artifact. Empty until completed.
    pub checksum: String,

    pub compressed: bool,
    pub encrypted: bool,

    /// Entity classes captured in the snapshot.
    pub includes: Vec<String>,

    /// Where the artifact lives (path under the backup directory).
    pub location: String,

    pub error_message: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackupRecord {
    pub fn new(
        name: impl Into<String>,
        kind: BackupKind,
        includes: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        BackupRecord {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            status: BackupStatus::InProgress,
            raw_size_bytes: 0,
            stored_size_bytes: 0,
            checksum: String::new(),
            compressed: false,
            encrypted: false,
            includes,
            location: String::new(),
            error_message: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// Pipeline finished; record the artifact facts.
    #[allow(clippy::too_many_arguments)]
    pub fn complete(
        &mut self,
        raw_size_bytes: u64,
        stored_size_bytes: u64,
        checksum: String,
        location: String,
        compressed: bool,
        encrypted: bool,
        now: DateTime<Utc>,
    ) {
        self.status = BackupStatus::Completed;
        self.raw_size_bytes = raw_size_bytes;
        self.stored_size_bytes = stored_size_bytes;
        self.checksum = checksum;
        self.location = location;
        self.compressed = compressed;
        self.encrypted = encrypted;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = BackupStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(now);
    }

    /// Age in whole days, used by the retention sweep.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

// =============================================================================
// Configuration Types
// =============================================================================

/// Default stance when a conflict is detected.
///
/// `Manual` leaves every conflict for an operator. The other three preselect
/// a [`ResolutionChoice`] the resolver can apply without input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    ClientWins,
    ServerWins,
    Merge,
    Manual,
}

impl ConflictPolicy {
    /// The resolution this policy preselects, if any.
    pub const fn preselected_choice(&self) -> Option<ResolutionChoice> {
        match self {
            ConflictPolicy::ClientWins => Some(ResolutionChoice::Client),
            ConflictPolicy::ServerWins => Some(ResolutionChoice::Server),
            ConflictPolicy::Merge => Some(ResolutionChoice::Merge),
            ConflictPolicy::Manual => None,
        }
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::ServerWins
    }
}

impl FromStr for ConflictPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client_wins" => Ok(ConflictPolicy::ClientWins),
            "server_wins" => Ok(ConflictPolicy::ServerWins),
            "merge" => Ok(ConflictPolicy::Merge),
            "manual" => Ok(ConflictPolicy::Manual),
            _ => Err(ValidationError::NotAllowed {
                field: "conflict_policy".to_string(),
                allowed: vec![
                    "client_wins".to_string(),
                    "server_wins".to_string(),
                    "merge".to_string(),
                    "manual".to_string(),
                ],
            }),
        }
    }
}

/// How often the scheduler takes an automatic backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BackupFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl BackupFrequency {
    /// Length of one backup period in days.
    pub const fn period_days(&self) -> i64 {
        match self {
            BackupFrequency::Daily => 1,
            BackupFrequency::Weekly => 7,
            BackupFrequency::Monthly => 30,
        }
    }
}

impl Default for BackupFrequency {
    fn default() -> Self {
        BackupFrequency::Daily
    }
}

impl FromStr for BackupFrequency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(BackupFrequency::Daily),
            "weekly" => Ok(BackupFrequency::Weekly),
            "monthly" => Ok(BackupFrequency::Monthly),
            _ => Err(ValidationError::NotAllowed {
                field: "backup_frequency".to_string(),
                allowed: vec![
                    "daily".to_string(),
                    "weekly".to_string(),
                    "monthly".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Devices
// =============================================================================

/// Form factor of a registered terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Mobile,
    Tablet,
    Desktop,
}

/// A device known to this store's sync scope.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeviceRecord {
    /// Stable device identifier from runtime configuration.
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,

    /// Platform string ("linux", "android 14", ...).
    pub platform: String,
    pub app_version: String,

    /// Feature capabilities ("barcode_scanner", "cash_drawer", ...).
    pub capabilities: Vec<String>,

    pub is_online: bool,
    #[ts(as = "String")]
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: DeviceKind,
        platform: impl Into<String>,
        app_version: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        DeviceRecord {
            id: id.into(),
            name: name.into(),
            kind,
            platform: platform.into(),
            app_version: app_version.into(),
            capabilities: Vec::new(),
            is_online: true,
            last_seen: now,
        }
    }

    /// Activity heartbeat.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.is_online = true;
        self.last_seen = now;
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Sync,
    Conflict,
    Backup,
    System,
}

/// An operator-facing notification raised by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncNotification {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub priority: SyncPriority,
    pub is_read: bool,
    #[ts(as = "String")]
    pub sent_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub read_at: Option<DateTime<Utc>>,
}

impl SyncNotification {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        priority: SyncPriority,
        now: DateTime<Utc>,
    ) -> Self {
        SyncNotification {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            body: body.into(),
            priority,
            is_read: false,
            sent_at: now,
            read_at: None,
        }
    }

    /// Marks read once. Returns false if it already was.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(now);
        true
    }
}

// =============================================================================
// Analytics
// =============================================================================

/// Read-only sync activity report over a date range.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncAnalytics {
    #[ts(as = "String")]
    pub period_start: DateTime<Utc>,
    #[ts(as = "String")]
    pub period_end: DateTime<Utc>,

    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,

    /// Mean wall-clock duration of completed operations.
    pub average_duration_ms: u64,

    /// Serialized payload bytes moved by completed operations.
    pub data_transferred_bytes: u64,

    pub conflicts_detected: u64,
    pub active_devices: u64,
    pub backups_created: u64,
}

impl SyncAnalytics {
    /// Completed share of all terminal operations in the period.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.successful_operations as f64 / self.total_operations as f64
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
