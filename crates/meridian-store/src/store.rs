//! # Offline Store
//!
//! The authoritative local record of entity snapshots.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Dirty Write Sequence                                │
//! │                                                                         │
//! │  CRUD SERVICE (e.g., update_customer)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  store.save("customer", "c-1", payload, dirty: true)                   │
//! │       │                                                                 │
//! │       ├── 1. Upsert row, bump version if content changed               │
//! │       │                                                                 │
//! │       ├── 2. Persist document (tmp + rename; roll back row on failure) │
//! │       │                                                                 │
//! │       └── 3. Notify observers (engine enqueues the upload)             │
//! │                                                                         │
//! │  save() returns only after step 3, so a dirty row always has its       │
//! │  queue entry by the time the caller sees the write.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//! This store exclusively owns record version and dirty state. The engine
//! calls back in through the `mark_*` methods; nothing else mutates rows.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use meridian_core::validation::{validate_entity_id, validate_entity_type};
use meridian_core::{CloudSettings, OfflineRecord, RecordStatus};

use crate::document::StoreDocument;
use crate::error::{StoreError, StoreResult};
use crate::persist::DocumentFile;

// =============================================================================
// Store Observer
// =============================================================================

/// Hook into store mutations.
///
/// The sync engine registers one of these to turn dirty writes into queued
/// upload operations. Observers run after the write is durable and before
/// `save()` returns.
#[async_trait]
pub trait StoreObserver: Send + Sync {
    /// A record was written with the dirty flag set.
    async fn on_dirty_write(&self, record: &OfflineRecord);

    /// Settings were replaced.
    async fn on_settings_updated(&self, _settings: &CloudSettings) {}
}

// =============================================================================
// Remote Apply Outcome
// =============================================================================

/// What happened when a downloaded record met the local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApplyOutcome {
    /// Remote record written (new row or newer version).
    Applied,
    /// Local row has unsynced changes; remote copy not applied.
    SkippedDirty,
    /// Local row is already at an equal or newer version.
    SkippedStale,
}

// =============================================================================
// Offline Store
// =============================================================================

type RecordKey = (String, String);

struct StoreState {
    records: BTreeMap<RecordKey, OfflineRecord>,
    settings: CloudSettings,
}

/// In-memory record map with optional on-disk document persistence.
pub struct OfflineStore {
    device_id: String,
    state: RwLock<StoreState>,
    observers: RwLock<Vec<Arc<dyn StoreObserver>>>,
    file: Option<DocumentFile>,
}

impl OfflineStore {
    /// Store without persistence. State lives only in memory.
    pub fn in_memory(device_id: impl Into<String>, settings: CloudSettings) -> StoreResult<Self> {
        settings.validate()?;
        Ok(OfflineStore {
            device_id: device_id.into(),
            state: RwLock::new(StoreState {
                records: BTreeMap::new(),
                settings,
            }),
            observers: RwLock::new(Vec::new()),
            file: None,
        })
    }

    /// Opens (or creates) the persisted store at `path`.
    ///
    /// An existing document contributes its records and settings. The local
    /// `device_id` always wins over the one recorded in the document, so a
    /// document restored from another terminal keeps working here.
    pub async fn open(
        path: impl Into<PathBuf>,
        device_id: impl Into<String>,
        default_settings: CloudSettings,
    ) -> StoreResult<Self> {
        let device_id = device_id.into();
        let file = DocumentFile::new(path);

        let (records, settings) = match file.load().await? {
            Some(document) => {
                if document.device_id != device_id {
                    warn!(
                        document_device = %document.device_id,
                        local_device = %device_id,
                        "Store document was written by another device"
                    );
                }
                let records = document
                    .records
                    .into_iter()
                    .map(|r| ((r.entity_type.clone(), r.entity_id.clone()), r))
                    .collect();
                (records, document.settings)
            }
            None => {
                default_settings.validate()?;
                (BTreeMap::new(), default_settings)
            }
        };

        info!(device_id = %device_id, records = records.len(), "Offline store opened");

        Ok(OfflineStore {
            device_id,
            state: RwLock::new(StoreState { records, settings }),
            observers: RwLock::new(Vec::new()),
            file: Some(file),
        })
    }

    /// Registers a mutation observer.
    pub async fn register_observer(&self, observer: Arc<dyn StoreObserver>) {
        self.observers.write().await.push(observer);
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Upserts one record.
    ///
    /// With `is_dirty` the row goes on the upload path: version bump on
    /// content change, status pending, observers notified. Without it the
    /// write is treated as already in agreement with the remote (seeding,
    /// imports) and lands synced.
    pub async fn save(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: Value,
        is_dirty: bool,
    ) -> StoreResult<OfflineRecord> {
        validate_entity_type(entity_type)?;
        validate_entity_id(entity_id)?;

        let key = (entity_type.to_string(), entity_id.to_string());
        let now = Utc::now();

        let saved = {
            let mut state = self.state.write().await;
            let previous = state.records.get(&key).cloned();

            let record = match state.records.get_mut(&key) {
                Some(record) => {
                    let changed = record.apply_local_write(payload, now);
                    if !is_dirty {
                        record.is_dirty = false;
                        record.sync_status = RecordStatus::Synced;
                    }
                    debug!(
                        entity_type = %entity_type,
                        entity_id = %entity_id,
                        version = record.version,
                        changed,
                        dirty = is_dirty,
                        "Record updated"
                    );
                    record.clone()
                }
                None => {
                    let mut record = OfflineRecord::new(entity_type, entity_id, payload, now);
                    if !is_dirty {
                        record.is_dirty = false;
                        record.sync_status = RecordStatus::Synced;
                    }
                    debug!(
                        entity_type = %entity_type,
                        entity_id = %entity_id,
                        dirty = is_dirty,
                        "Record created"
                    );
                    state.records.insert(key.clone(), record.clone());
                    record
                }
            };

            self.persist_or_rollback(&mut state, key, previous).await?;
            record
        };

        if is_dirty {
            self.notify_dirty_write(&saved).await;
        }

        Ok(saved)
    }

    /// Applies one record pulled from the remote, unless the local row is
    /// dirty or already caught up.
    pub async fn apply_remote(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: Value,
        remote_version: i64,
    ) -> StoreResult<RemoteApplyOutcome> {
        let key = (entity_type.to_string(), entity_id.to_string());
        let now = Utc::now();

        let mut state = self.state.write().await;
        let previous = state.records.get(&key).cloned();

        match state.records.get_mut(&key) {
            Some(record) if record.is_dirty => {
                debug!(
                    entity_type = %entity_type,
                    entity_id = %entity_id,
                    "Remote record skipped: local row is dirty"
                );
                return Ok(RemoteApplyOutcome::SkippedDirty);
            }
            Some(record) if record.version >= remote_version => {
                debug!(
                    entity_type = %entity_type,
                    entity_id = %entity_id,
                    local_version = record.version,
                    remote_version,
                    "Remote record skipped: local row is current"
                );
                return Ok(RemoteApplyOutcome::SkippedStale);
            }
            Some(record) => {
                record.apply_remote(payload, remote_version, now);
            }
            None => {
                let record =
                    OfflineRecord::from_remote(entity_type, entity_id, payload, remote_version, now);
                state.records.insert(key.clone(), record);
            }
        }

        self.persist_or_rollback(&mut state, key, previous).await?;
        Ok(RemoteApplyOutcome::Applied)
    }

    /// Overwrites the local row with a remote snapshot even when it is dirty.
    ///
    /// `apply_remote` protects unsynced local edits; this method is the
    /// deliberate exception for a server-wins conflict resolution, where the
    /// operator chose to discard them. Creates the row when missing.
    pub async fn overwrite_with_remote(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: Value,
        remote_version: i64,
    ) -> StoreResult<OfflineRecord> {
        let key = (entity_type.to_string(), entity_id.to_string());
        let now = Utc::now();

        let mut state = self.state.write().await;
        let previous = state.records.get(&key).cloned();

        let record = match state.records.get_mut(&key) {
            Some(record) => {
                record.apply_remote(payload, remote_version, now);
                record.clone()
            }
            None => {
                let record =
                    OfflineRecord::from_remote(entity_type, entity_id, payload, remote_version, now);
                state.records.insert(key.clone(), record.clone());
                record
            }
        };

        debug!(
            entity_type = %entity_type,
            entity_id = %entity_id,
            version = remote_version,
            "Local row overwritten with remote snapshot"
        );

        self.persist_or_rollback(&mut state, key, previous).await?;
        Ok(record)
    }

    /// Upload acknowledged: adopt the server version, clear dirty.
    pub async fn mark_synced(
        &self,
        entity_type: &str,
        entity_id: &str,
        new_version: i64,
    ) -> StoreResult<OfflineRecord> {
        self.mutate_record(entity_type, entity_id, |record| {
            record.mark_synced(new_version);
        })
        .await
    }

    /// An unresolved conflict now blocks this record.
    pub async fn mark_conflict(&self, entity_type: &str, entity_id: &str) -> StoreResult<()> {
        self.mutate_record(entity_type, entity_id, OfflineRecord::mark_conflict)
            .await
            .map(|_| ())
    }

    /// Sync attempts exhausted; row stays dirty.
    pub async fn mark_error(&self, entity_type: &str, entity_id: &str) -> StoreResult<()> {
        self.mutate_record(entity_type, entity_id, OfflineRecord::mark_error)
            .await
            .map(|_| ())
    }

    /// Row goes back on the upload path.
    pub async fn mark_pending(&self, entity_type: &str, entity_id: &str) -> StoreResult<()> {
        self.mutate_record(entity_type, entity_id, OfflineRecord::mark_pending)
            .await
            .map(|_| ())
    }

    async fn mutate_record(
        &self,
        entity_type: &str,
        entity_id: &str,
        mutate: impl FnOnce(&mut OfflineRecord),
    ) -> StoreResult<OfflineRecord> {
        let key = (entity_type.to_string(), entity_id.to_string());

        let mut state = self.state.write().await;
        let previous = state.records.get(&key).cloned();

        let record = state
            .records
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(entity_type, entity_id))?;
        mutate(record);
        let record = record.clone();

        self.persist_or_rollback(&mut state, key, previous).await?;
        Ok(record)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetches one record. Pure read, no side effects.
    pub async fn get(&self, entity_type: &str, entity_id: &str) -> Option<OfflineRecord> {
        let key = (entity_type.to_string(), entity_id.to_string());
        self.state.read().await.records.get(&key).cloned()
    }

    /// All records, optionally restricted to one entity type. Ordered by
    /// (entity_type, entity_id).
    pub async fn get_all(&self, entity_type: Option<&str>) -> Vec<OfflineRecord> {
        let state = self.state.read().await;
        state
            .records
            .values()
            .filter(|r| entity_type.map_or(true, |t| r.entity_type == t))
            .cloned()
            .collect()
    }

    /// Records with unsynced local changes.
    pub async fn dirty_records(&self) -> Vec<OfflineRecord> {
        let state = self.state.read().await;
        state
            .records
            .values()
            .filter(|r| r.is_dirty)
            .cloned()
            .collect()
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Current settings snapshot.
    pub async fn settings(&self) -> CloudSettings {
        self.state.read().await.settings.clone()
    }

    /// Replaces the settings. Validated, persisted, observers notified.
    pub async fn update_settings(&self, settings: CloudSettings) -> StoreResult<()> {
        settings.validate()?;

        {
            let mut state = self.state.write().await;
            let previous = std::mem::replace(&mut state.settings, settings.clone());

            if let Err(err) = self.persist_state(&state).await {
                state.settings = previous;
                return Err(err);
            }
        }

        info!("Cloud settings updated");
        let observers = self.observers.read().await.clone();
        for observer in observers {
            observer.on_settings_updated(&settings).await;
        }
        Ok(())
    }

    // =========================================================================
    // Document Snapshot / Swap
    // =========================================================================

    /// Whole-store snapshot for the backup pipeline.
    pub async fn snapshot(&self) -> StoreDocument {
        let state = self.state.read().await;
        StoreDocument::new(
            self.device_id.clone(),
            state.settings.clone(),
            state.records.values().cloned().collect(),
        )
    }

    /// Atomically replaces every record and the settings with the document's
    /// contents. Used by restore; never merges. The local device id is kept.
    pub async fn replace_with(&self, document: StoreDocument) -> StoreResult<()> {
        document.validate()?;

        let records: BTreeMap<RecordKey, OfflineRecord> = document
            .records
            .into_iter()
            .map(|r| ((r.entity_type.clone(), r.entity_id.clone()), r))
            .collect();

        let mut state = self.state.write().await;
        let previous_records = std::mem::replace(&mut state.records, records);
        let previous_settings = std::mem::replace(&mut state.settings, document.settings);

        if let Err(err) = self.persist_state(&state).await {
            state.records = previous_records;
            state.settings = previous_settings;
            return Err(err);
        }

        info!(records = state.records.len(), "Store contents replaced");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn persist_state(&self, state: &StoreState) -> StoreResult<()> {
        if let Some(file) = &self.file {
            let document = StoreDocument::new(
                self.device_id.clone(),
                state.settings.clone(),
                state.records.values().cloned().collect(),
            );
            file.save(&document).await?;
        }
        Ok(())
    }

    /// Persists the state; on failure puts the touched row back the way it
    /// was so memory and disk stay in agreement.
    async fn persist_or_rollback(
        &self,
        state: &mut StoreState,
        key: RecordKey,
        previous: Option<OfflineRecord>,
    ) -> StoreResult<()> {
        if let Err(err) = self.persist_state(state).await {
            match previous {
                Some(record) => {
                    state.records.insert(key, record);
                }
                None => {
                    state.records.remove(&key);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    async fn notify_dirty_write(&self, record: &OfflineRecord) {
        let observers = self.observers.read().await.clone();
        for observer in observers {
            observer.on_dirty_write(record).await;
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;

    struct Recorder {
        dirty_writes: Mutex<Vec<String>>,
        settings_updates: Mutex<u32>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Recorder {
                dirty_writes: Mutex::new(Vec::new()),
                settings_updates: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl StoreObserver for Recorder {
        async fn on_dirty_write(&self, record: &OfflineRecord) {
            self.dirty_writes
                .lock()
                .await
                .push(format!("{}/{}@v{}", record.entity_type, record.entity_id, record.version));
        }

        async fn on_settings_updated(&self, _settings: &CloudSettings) {
            *self.settings_updates.lock().await += 1;
        }
    }

    fn store() -> OfflineStore {
        OfflineStore::in_memory("device-1", CloudSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_dirty_save_notifies_observer() {
        let store = store();
        let recorder = Recorder::new();
        store.register_observer(recorder.clone()).await;

        let record = store
            .save("customer", "c-1", json!({"name": "Ada"}), true)
            .await
            .unwrap();

        assert!(record.is_dirty);
        assert_eq!(record.sync_status, RecordStatus::Pending);
        assert_eq!(record.version, 1);
        assert_eq!(
            recorder.dirty_writes.lock().await.as_slice(),
            &["customer/c-1@v1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_clean_save_lands_synced_without_notification() {
        let store = store();
        let recorder = Recorder::new();
        store.register_observer(recorder.clone()).await;

        let record = store
            .save("product", "p-1", json!({"sku": "COKE-330"}), false)
            .await
            .unwrap();

        assert!(!record.is_dirty);
        assert_eq!(record.sync_status, RecordStatus::Synced);
        assert!(recorder.dirty_writes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_version_bumps_only_on_content_change() {
        let store = store();
        store
            .save("customer", "c-1", json!({"name": "Ada"}), true)
            .await
            .unwrap();

        let same = store
            .save("customer", "c-1", json!({"name": "Ada"}), true)
            .await
            .unwrap();
        assert_eq!(same.version, 1);

        let changed = store
            .save("customer", "c-1", json!({"name": "Grace"}), true)
            .await
            .unwrap();
        assert_eq!(changed.version, 2);
    }

    #[tokio::test]
    async fn test_save_rejects_bad_keys() {
        let store = store();
        assert!(store.save("", "c-1", json!({}), true).await.is_err());
        assert!(store.save("customer", "", json!({}), true).await.is_err());
        assert!(store
            .save("has space", "c-1", json!({}), true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_get_all_filters_by_entity_type() {
        let store = store();
        store.save("customer", "c-1", json!({}), true).await.unwrap();
        store.save("product", "p-1", json!({}), true).await.unwrap();
        store.save("product", "p-2", json!({}), true).await.unwrap();

        assert_eq!(store.get_all(None).await.len(), 3);
        assert_eq!(store.get_all(Some("product")).await.len(), 2);
        assert_eq!(store.get_all(Some("employee")).await.len(), 0);
        assert_eq!(store.dirty_records().await.len(), 3);
    }

    #[tokio::test]
    async fn test_apply_remote_skips_dirty_row() {
        let store = store();
        store
            .save("customer", "c-1", json!({"name": "local"}), true)
            .await
            .unwrap();

        let outcome = store
            .apply_remote("customer", "c-1", json!({"name": "remote"}), 9)
            .await
            .unwrap();

        assert_eq!(outcome, RemoteApplyOutcome::SkippedDirty);
        let record = store.get("customer", "c-1").await.unwrap();
        assert_eq!(record.payload, json!({"name": "local"}));
    }

    #[tokio::test]
    async fn test_apply_remote_skips_stale_version() {
        let store = store();
        store
            .save("customer", "c-1", json!({"name": "seeded"}), false)
            .await
            .unwrap();

        let outcome = store
            .apply_remote("customer", "c-1", json!({"name": "old"}), 1)
            .await
            .unwrap();

        assert_eq!(outcome, RemoteApplyOutcome::SkippedStale);
    }

    #[tokio::test]
    async fn test_apply_remote_applies_newer_and_creates_missing() {
        let store = store();
        store
            .save("customer", "c-1", json!({"name": "seeded"}), false)
            .await
            .unwrap();

        let outcome = store
            .apply_remote("customer", "c-1", json!({"name": "newer"}), 7)
            .await
            .unwrap();
        assert_eq!(outcome, RemoteApplyOutcome::Applied);

        let record = store.get("customer", "c-1").await.unwrap();
        assert_eq!(record.version, 7);
        assert_eq!(record.sync_status, RecordStatus::Synced);

        let outcome = store
            .apply_remote("employee", "e-1", json!({"name": "fresh"}), 3)
            .await
            .unwrap();
        assert_eq!(outcome, RemoteApplyOutcome::Applied);
        assert_eq!(store.get("employee", "e-1").await.unwrap().version, 3);
    }

    #[tokio::test]
    async fn test_overwrite_with_remote_discards_dirty_row() {
        let store = store();
        store
            .save("customer", "c-1", json!({"name": "local edit"}), true)
            .await
            .unwrap();

        let record = store
            .overwrite_with_remote("customer", "c-1", json!({"name": "server"}), 6)
            .await
            .unwrap();

        assert_eq!(record.payload, json!({"name": "server"}));
        assert_eq!(record.version, 6);
        assert!(!record.is_dirty);
        assert_eq!(record.sync_status, RecordStatus::Synced);
    }

    #[tokio::test]
    async fn test_mark_synced_adopts_server_version() {
        let store = store();
        store
            .save("customer", "c-1", json!({"name": "Ada"}), true)
            .await
            .unwrap();

        let record = store.mark_synced("customer", "c-1", 12).await.unwrap();
        assert_eq!(record.version, 12);
        assert!(!record.is_dirty);
        assert_eq!(record.sync_status, RecordStatus::Synced);
    }

    #[tokio::test]
    async fn test_mark_synced_missing_row_errors() {
        let store = store();
        assert!(store.mark_synced("customer", "missing", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_update_settings_validates_and_notifies() {
        let store = store();
        let recorder = Recorder::new();
        store.register_observer(recorder.clone()).await;

        let mut settings = CloudSettings::default();
        settings.batch_size = 0;
        assert!(store.update_settings(settings.clone()).await.is_err());

        settings.batch_size = 25;
        store.update_settings(settings).await.unwrap();
        assert_eq!(store.settings().await.batch_size, 25);
        assert_eq!(*recorder.settings_updates.lock().await, 1);
    }

    #[tokio::test]
    async fn test_replace_with_swaps_whole_document() {
        let store = store();
        store.save("customer", "c-1", json!({}), true).await.unwrap();
        store.save("product", "p-1", json!({}), true).await.unwrap();

        let mut settings = CloudSettings::default();
        settings.batch_size = 10;
        let replacement = StoreDocument::new(
            "other-device",
            settings,
            vec![OfflineRecord::from_remote(
                "employee",
                "e-1",
                json!({"name": "Joan"}),
                4,
                Utc::now(),
            )],
        );

        store.replace_with(replacement).await.unwrap();

        assert_eq!(store.record_count().await, 1);
        assert!(store.get("customer", "c-1").await.is_none());
        assert_eq!(store.get("employee", "e-1").await.unwrap().version, 4);
        assert_eq!(store.settings().await.batch_size, 10);
        // Device identity is runtime config, not restorable state.
        assert_eq!(store.device_id(), "device-1");
    }

    #[tokio::test]
    async fn test_open_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline-store.json");

        {
            let store = OfflineStore::open(&path, "device-1", CloudSettings::default())
                .await
                .unwrap();
            store
                .save("customer", "c-1", json!({"name": "Ada"}), true)
                .await
                .unwrap();

            let mut settings = CloudSettings::default();
            settings.sync_interval_minutes = 9;
            store.update_settings(settings).await.unwrap();
        }

        let reopened = OfflineStore::open(&path, "device-1", CloudSettings::default())
            .await
            .unwrap();
        let record = reopened.get("customer", "c-1").await.unwrap();
        assert_eq!(record.payload, json!({"name": "Ada"}));
        assert!(record.is_dirty);
        assert_eq!(reopened.settings().await.sync_interval_minutes, 9);
    }
}
