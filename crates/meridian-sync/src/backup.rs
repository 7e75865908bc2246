//! # Backup Pipeline
//!
//! Whole-store snapshots as encrypted artifacts on local disk.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Backup / Restore                               │
//! │                                                                         │
//! │  CREATE                                                                 │
//! │  ──────                                                                 │
//! │  store.snapshot() ─▶ JSON bytes ─▶ zstd ─▶ AES-256-GCM ─▶ SHA-256      │
//! │                                   (level 3) (nonce ‖ ct)   checksum     │
//! │                                                      │                  │
//! │                                                      ▼                  │
//! │                                      <id>.mbak + index entry            │
//! │                                                                         │
//! │  RESTORE (reverse, checksum verified before decryption)                 │
//! │  ─────────────────────────────────────────────────────                  │
//! │  read artifact ─▶ SHA-256 == recorded? ─▶ decrypt ─▶ decompress         │
//! │                       │ no                                              │
//! │                       ▼                          ─▶ parse document      │
//! │                  ChecksumMismatch                ─▶ replace_with (swap) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The index (`backup-index.json`) is the source of truth for what exists;
//! artifacts without an index entry are invisible. Index writes go through
//! a temp file and rename. Compression and encryption follow the store's
//! cloud settings at creation time; the flags recorded on each entry are
//! what restore trusts, not the settings at restore time.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use meridian_core::{BackupKind, BackupRecord, BackupStatus, CoreError};
use meridian_store::{OfflineStore, StoreDocument};

use crate::error::{SyncError, SyncResult};

/// AES-GCM nonce length; the artifact starts with the nonce in clear.
const NONCE_LEN: usize = 12;

/// zstd level for snapshot compression.
const COMPRESSION_LEVEL: i32 = 3;

/// File extension of backup artifacts.
pub const ARTIFACT_EXTENSION: &str = "mbak";

/// Index file name inside the backup directory.
pub const INDEX_FILE: &str = "backup-index.json";

// =============================================================================
// Backup Manager
// =============================================================================

/// Creates, restores, and prunes backup artifacts for one store.
pub struct BackupManager {
    store: Arc<OfflineStore>,
    dir: PathBuf,
    key: Option<[u8; 32]>,
    index: RwLock<Vec<BackupRecord>>,
}

impl BackupManager {
    /// Opens the backup directory, creating it and loading the index.
    pub async fn open(
        store: Arc<OfflineStore>,
        dir: impl Into<PathBuf>,
        key: Option<[u8; 32]>,
    ) -> SyncResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let index_path = dir.join(INDEX_FILE);
        let index: Vec<BackupRecord> = match tokio::fs::read(&index_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(?dir, entries = index.len(), "Backup index loaded");
        Ok(BackupManager {
            store,
            dir,
            key,
            index: RwLock::new(index),
        })
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Snapshots the store into a new artifact.
    ///
    /// A failed run still lands in the index as a failed entry with its
    /// error message, then the error is returned.
    pub async fn create_backup(
        &self,
        kind: BackupKind,
        name: Option<String>,
    ) -> SyncResult<BackupRecord> {
        let now = Utc::now();
        let settings = self.store.settings().await;
        let document = self.store.snapshot().await;

        let mut includes: Vec<String> = document
            .records
            .iter()
            .map(|r| r.entity_type.clone())
            .collect();
        includes.sort();
        includes.dedup();

        let name = name.unwrap_or_else(|| format!("{}-{}", kind, now.format("%Y%m%d-%H%M%S")));
        let mut record = BackupRecord::new(name, kind, includes, now);
        info!(backup_id = %record.id, name = %record.name, kind = %kind, "Backup started");

        match self
            .run_pipeline(
                &document,
                settings.compression_enabled,
                settings.encryption_enabled,
                &record.id,
            )
            .await
        {
            Ok(outcome) => {
                record.complete(
                    outcome.raw_size,
                    outcome.stored_size,
                    outcome.checksum,
                    outcome.location,
                    outcome.compressed,
                    outcome.encrypted,
                    Utc::now(),
                );
                info!(
                    backup_id = %record.id,
                    raw_bytes = record.raw_size_bytes,
                    stored_bytes = record.stored_size_bytes,
                    "Backup completed"
                );
                self.push_record(record.clone()).await?;
                Ok(record)
            }
            Err(e) => {
                warn!(backup_id = %record.id, error = %e, "Backup failed");
                record.fail(e.to_string(), Utc::now());
                self.push_record(record).await?;
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        document: &StoreDocument,
        compress: bool,
        encrypt: bool,
        backup_id: &str,
    ) -> SyncResult<PipelineOutcome> {
        let raw = document.to_bytes()?;
        let raw_size = raw.len() as u64;

        let staged = if compress {
            zstd::stream::encode_all(&raw[..], COMPRESSION_LEVEL)?
        } else {
            raw
        };

        let (artifact, encrypted) = if encrypt {
            let key = self.key.ok_or_else(|| {
                SyncError::InvalidBackupKey("encryption enabled but no key configured".into())
            })?;
            (encrypt_artifact(&key, &staged)?, true)
        } else {
            (staged, false)
        };

        let checksum = checksum_hex(&artifact);
        let stored_size = artifact.len() as u64;

        let path = self.artifact_path(backup_id);
        tokio::fs::write(&path, &artifact).await?;
        debug!(?path, bytes = stored_size, "Backup artifact written");

        Ok(PipelineOutcome {
            raw_size,
            stored_size,
            checksum,
            location: path.to_string_lossy().into_owned(),
            compressed: compress,
            encrypted,
        })
    }

    // =========================================================================
    // Restore
    // =========================================================================

    /// Replaces the whole store with the backup's contents.
    ///
    /// Returns the number of records the store holds afterwards. Nothing is
    /// touched until the artifact bytes hash to the recorded checksum and
    /// decode all the way back to a valid document.
    pub async fn restore_backup(&self, backup_id: &str) -> SyncResult<usize> {
        let record = self
            .get_backup(backup_id)
            .await
            .ok_or_else(|| CoreError::BackupNotFound(backup_id.to_string()))?;
        if record.status != BackupStatus::Completed {
            return Err(SyncError::BackupIncomplete {
                id: record.id.clone(),
                status: record.status.to_string(),
            });
        }

        let stored = tokio::fs::read(&record.location).await?;

        let actual = checksum_hex(&stored);
        if actual != record.checksum {
            return Err(SyncError::ChecksumMismatch {
                expected: record.checksum.clone(),
                actual,
            });
        }

        let staged = if record.encrypted {
            let key = self.key.ok_or_else(|| {
                SyncError::InvalidBackupKey("artifact is encrypted and no key is configured".into())
            })?;
            decrypt_artifact(&key, &stored)?
        } else {
            stored
        };

        let raw = if record.compressed {
            zstd::stream::decode_all(&staged[..])?
        } else {
            staged
        };

        let document = StoreDocument::from_bytes(&raw)?;
        let restored = document.records.len();
        self.store.replace_with(document).await?;

        info!(backup_id = %record.id, records = restored, "Store restored from backup");
        Ok(restored)
    }

    // =========================================================================
    // Index
    // =========================================================================

    /// All known backups, newest first.
    pub async fn list_backups(&self) -> Vec<BackupRecord> {
        let mut list = self.index.read().await.clone();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    pub async fn get_backup(&self, id: &str) -> Option<BackupRecord> {
        self.index.read().await.iter().find(|b| b.id == id).cloned()
    }

    /// Most recent completed backup, if any.
    pub async fn latest_completed(&self) -> Option<BackupRecord> {
        self.index
            .read()
            .await
            .iter()
            .filter(|b| b.status == BackupStatus::Completed)
            .max_by_key(|b| b.created_at)
            .cloned()
    }

    /// Removes one backup and its artifact.
    pub async fn delete_backup(&self, id: &str) -> SyncResult<()> {
        let removed = {
            let mut index = self.index.write().await;
            let Some(pos) = index.iter().position(|b| b.id == id) else {
                return Err(CoreError::BackupNotFound(id.to_string()).into());
            };
            let removed = index.remove(pos);
            self.persist_index(&index).await?;
            removed
        };
        remove_artifact(&removed).await;
        info!(backup_id = %id, "Backup deleted");
        Ok(())
    }

    /// Deletes backups older than the retention period from the store's
    /// settings. Returns how many were removed.
    pub async fn cleanup_old_backups(&self, now: DateTime<Utc>) -> SyncResult<usize> {
        let retention_days = i64::from(self.store.settings().await.retention_period_days);

        let expired = {
            let mut index = self.index.write().await;
            let expired: Vec<BackupRecord> = index
                .iter()
                .filter(|b| b.age_days(now) > retention_days)
                .cloned()
                .collect();
            if expired.is_empty() {
                return Ok(0);
            }
            let kept: Vec<BackupRecord> = index
                .iter()
                .filter(|b| b.age_days(now) <= retention_days)
                .cloned()
                .collect();
            self.persist_index(&kept).await?;
            *index = kept;
            expired
        };

        for record in &expired {
            remove_artifact(record).await;
        }
        info!(removed = expired.len(), retention_days, "Old backups swept");
        Ok(expired.len())
    }

    /// True when the configured backup period has elapsed since the last
    /// completed backup, or none exists yet.
    pub async fn is_backup_due(&self, now: DateTime<Utc>) -> bool {
        let frequency = self.store.settings().await.backup_frequency;
        match self.latest_completed().await {
            None => true,
            Some(record) => record.age_days(now) >= frequency.period_days(),
        }
    }

    async fn push_record(&self, record: BackupRecord) -> SyncResult<()> {
        let mut index = self.index.write().await;
        index.push(record);
        self.persist_index(&index).await
    }

    async fn persist_index(&self, index: &[BackupRecord]) -> SyncResult<()> {
        let path = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        let bytes = serde_json::to_vec_pretty(index)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn artifact_path(&self, backup_id: &str) -> PathBuf {
        self.dir.join(format!("{backup_id}.{ARTIFACT_EXTENSION}"))
    }
}

struct PipelineOutcome {
    raw_size: u64,
    stored_size: u64,
    checksum: String,
    location: String,
    compressed: bool,
    encrypted: bool,
}

async fn remove_artifact(record: &BackupRecord) {
    if record.location.is_empty() {
        return;
    }
    if let Err(e) = tokio::fs::remove_file(&record.location).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(backup_id = %record.id, error = %e, "Could not remove backup artifact");
        }
    }
}

// =============================================================================
// Codec Helpers
// =============================================================================

fn checksum_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn encrypt_artifact(key: &[u8; 32], plain: &[u8]) -> SyncResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plain)
        .map_err(|_| SyncError::EncryptionFailed("AES-GCM sealing failed".into()))?;

    let mut artifact = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    artifact.extend_from_slice(&nonce);
    artifact.extend_from_slice(&ciphertext);
    Ok(artifact)
}

fn decrypt_artifact(key: &[u8; 32], artifact: &[u8]) -> SyncResult<Vec<u8>> {
    if artifact.len() < NONCE_LEN {
        return Err(SyncError::DecryptionFailed(
            "artifact shorter than its nonce prefix".into(),
        ));
    }
    let (nonce_bytes, ciphertext) = artifact.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| SyncError::DecryptionFailed("wrong key or corrupted artifact".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use meridian_core::CloudSettings;
    use serde_json::json;

    fn test_key() -> [u8; 32] {
        [42u8; 32]
    }

    async fn seeded_store(settings: CloudSettings) -> Arc<OfflineStore> {
        let store = Arc::new(OfflineStore::in_memory("term-1", settings).unwrap());
        store
            .save("customer", "c-1", json!({"name": "Alice"}), true)
            .await
            .unwrap();
        store
            .save("product", "p-1", json!({"sku": "SKU-1", "price": 9.99}), false)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_backup_and_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(CloudSettings::default()).await;
        let manager = BackupManager::open(store.clone(), dir.path(), Some(test_key()))
            .await
            .unwrap();

        let record = manager.create_backup(BackupKind::Full, None).await.unwrap();
        assert_eq!(record.status, BackupStatus::Completed);
        assert!(record.compressed);
        assert!(record.encrypted);
        assert!(record.raw_size_bytes > 0);
        assert!(record.stored_size_bytes > 0);
        assert_eq!(record.checksum.len(), 64);
        assert_eq!(
            record.includes,
            vec!["customer".to_string(), "product".to_string()]
        );
        assert!(tokio::fs::try_exists(&record.location).await.unwrap());

        // Mutate the store after the snapshot, then restore over it
        store
            .save("customer", "c-2", json!({"name": "Bob"}), true)
            .await
            .unwrap();
        assert_eq!(store.record_count().await, 3);

        let restored = manager.restore_backup(&record.id).await.unwrap();
        assert_eq!(restored, 2);
        assert_eq!(store.record_count().await, 2);
        assert!(store.get("customer", "c-2").await.is_none());
        assert_eq!(
            store.get("customer", "c-1").await.unwrap().payload,
            json!({"name": "Alice"})
        );
    }

    #[tokio::test]
    async fn test_restore_rejects_tampered_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(CloudSettings::default()).await;
        let manager = BackupManager::open(store, dir.path(), Some(test_key()))
            .await
            .unwrap();

        let record = manager.create_backup(BackupKind::Full, None).await.unwrap();
        let mut bytes = tokio::fs::read(&record.location).await.unwrap();
        bytes[0] ^= 0xFF;
        tokio::fs::write(&record.location, &bytes).await.unwrap();

        // The corruption shows up as a checksum mismatch, not a decryption error
        let err = manager.restore_backup(&record.id).await.unwrap_err();
        assert!(matches!(err, SyncError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_restore_with_wrong_key_fails_decryption() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(CloudSettings::default()).await;
        let manager = BackupManager::open(store.clone(), dir.path(), Some(test_key()))
            .await
            .unwrap();
        let record = manager.create_backup(BackupKind::Full, None).await.unwrap();
        drop(manager);

        let reopened = BackupManager::open(store, dir.path(), Some([7u8; 32]))
            .await
            .unwrap();
        let err = reopened.restore_backup(&record.id).await.unwrap_err();
        assert!(matches!(err, SyncError::DecryptionFailed(_)));
    }

    #[tokio::test]
    async fn test_plain_pipeline_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CloudSettings {
            compression_enabled: false,
            encryption_enabled: false,
            ..CloudSettings::default()
        };
        let store = seeded_store(settings).await;
        let manager = BackupManager::open(store.clone(), dir.path(), None)
            .await
            .unwrap();

        let record = manager.create_backup(BackupKind::Full, Some("plain".into())).await.unwrap();
        assert_eq!(record.name, "plain");
        assert!(!record.compressed);
        assert!(!record.encrypted);
        assert_eq!(record.raw_size_bytes, record.stored_size_bytes);

        // The artifact is the document itself
        let bytes = tokio::fs::read(&record.location).await.unwrap();
        let document = StoreDocument::from_bytes(&bytes).unwrap();
        assert_eq!(document.records.len(), 2);

        assert_eq!(manager.restore_backup(&record.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_encryption_without_key_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(CloudSettings::default()).await;
        let manager = BackupManager::open(store, dir.path(), None).await.unwrap();

        let err = manager.create_backup(BackupKind::Full, None).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidBackupKey(_)));

        let list = manager.list_backups().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].status, BackupStatus::Failed);
        assert!(list[0].error_message.is_some());

        // A failed entry is not restorable
        let err = manager.restore_backup(&list[0].id).await.unwrap_err();
        assert!(matches!(err, SyncError::BackupIncomplete { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_expired_backups() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(CloudSettings::default()).await;
        let manager = BackupManager::open(store, dir.path(), Some(test_key()))
            .await
            .unwrap();

        let old = manager.create_backup(BackupKind::Full, Some("old".into())).await.unwrap();
        let fresh = manager.create_backup(BackupKind::Full, Some("fresh".into())).await.unwrap();

        let now = Utc::now();
        {
            let mut index = manager.index.write().await;
            let entry = index.iter_mut().find(|b| b.id == old.id).unwrap();
            entry.created_at = now - Duration::days(45);
        }

        // Default retention is 30 days
        let removed = manager.cleanup_old_backups(now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(manager.get_backup(&old.id).await.is_none());
        assert!(manager.get_backup(&fresh.id).await.is_some());
        assert!(!tokio::fs::try_exists(&old.location).await.unwrap());
        assert_eq!(manager.cleanup_old_backups(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_is_backup_due_follows_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(CloudSettings::default()).await;
        let manager = BackupManager::open(store, dir.path(), Some(test_key()))
            .await
            .unwrap();

        let now = Utc::now();
        assert!(manager.is_backup_due(now).await);

        let record = manager.create_backup(BackupKind::Full, None).await.unwrap();
        assert!(!manager.is_backup_due(now).await);

        // Age the completed backup past one daily period
        {
            let mut index = manager.index.write().await;
            let entry = index.iter_mut().find(|b| b.id == record.id).unwrap();
            entry.created_at = now - Duration::days(2);
        }
        assert!(manager.is_backup_due(now).await);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(CloudSettings::default()).await;
        let manager = BackupManager::open(store.clone(), dir.path(), Some(test_key()))
            .await
            .unwrap();
        let record = manager.create_backup(BackupKind::Full, None).await.unwrap();
        drop(manager);

        let reopened = BackupManager::open(store, dir.path(), Some(test_key()))
            .await
            .unwrap();
        let list = reopened.list_backups().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, record.id);
        assert_eq!(reopened.restore_backup(&record.id).await.unwrap(), 2);

        assert!(matches!(
            reopened.restore_backup("missing").await.unwrap_err(),
            SyncError::Core(CoreError::BackupNotFound(_))
        ));
    }
}
