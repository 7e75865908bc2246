//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Connectivity   │  │     Transport           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Offline        │  │  TransportFailed        │ │
//! │  │  MissingDeviceId│  │  MeteredLink    │  │  RemoteRejected         │ │
//! │  │  InvalidBackupKey  │  ProbeFailed    │  │  Timeout                │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │     Engine      │  │     Backup      │  │      Wrapped            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  MaxRetries-    │  │  ChecksumMismatch  │  Core / Store          │ │
//! │  │  Exceeded       │  │  EncryptionFailed  │  Io / Serialization    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use meridian_core::{ConnectionType, CoreError};
use meridian_store::StoreError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible engine failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid runtime or engine configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID (required for the persisted document key).
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Backup key is missing or not 32 bytes of hex.
    #[error("Invalid backup key: {0}")]
    InvalidBackupKey(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Connectivity Errors
    // =========================================================================
    /// Reachability check failed; the cycle aborted before touching the queue.
    #[error("Offline: {0}")]
    Offline(String),

    /// Wifi-only sync is enabled and the current link is metered.
    #[error("Sync blocked on metered link ({0})")]
    MeteredLink(ConnectionType),

    /// Probe completed but reported the endpoint unreachable.
    #[error("Reachability probe failed: {0}")]
    ProbeFailed(String),

    /// Operation timed out.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Remote call failed in a way the engine may retry.
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// Remote permanently rejected an operation.
    #[error("Remote rejected {entity_type}/{entity_id}: {reason}")]
    RemoteRejected {
        entity_type: String,
        entity_id: String,
        reason: String,
    },

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// Retry budget exhausted for an operation.
    #[error("Max retries exceeded for operation {id}: {last_error}")]
    MaxRetriesExceeded { id: String, last_error: String },

    // =========================================================================
    // Backup Errors
    // =========================================================================
    /// Stored artifact bytes do not hash to the recorded checksum.
    ///
    /// ## When This Occurs
    /// - Artifact file corrupted or truncated at rest
    /// - Artifact swapped for one belonging to a different record
    #[error("Backup checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Backup record exists but is not restorable.
    #[error("Backup {id} is {status}, not restorable")]
    BackupIncomplete { id: String, status: String },

    /// Encryption step failed during backup.
    #[error("Backup encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption step failed during restore.
    ///
    /// ## When This Occurs
    /// - Wrong backup key configured on this terminal
    /// - Artifact shorter than the nonce prefix
    #[error("Backup decryption failed: {0}")]
    DecryptionFailed(String),

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// Domain rule violation from meridian-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Offline store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// File I/O failure (backup artifacts, index files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<meridian_core::ValidationError> for SyncError {
    fn from(err: meridian_core::ValidationError) -> Self {
        SyncError::Core(CoreError::Validation(err))
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if this error is recoverable and the operation can be
    /// retried on a later cycle.
    ///
    /// ## Retryable Errors
    /// - Connectivity losses and probe failures
    /// - Timeouts
    /// - Transient transport failures
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Permanent remote rejections
    /// - Domain rule violations
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Offline(_)
                | SyncError::ProbeFailed(_)
                | SyncError::Timeout(_)
                | SyncError::TransportFailed(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidBackupKey(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this error aborts a cycle before any operation runs.
    pub fn is_connectivity_error(&self) -> bool {
        matches!(self, SyncError::Offline(_) | SyncError::MeteredLink(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Offline("no route".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
        assert!(SyncError::TransportFailed("connection reset".into()).is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::MissingDeviceId.is_retryable());
        assert!(!SyncError::RemoteRejected {
            entity_type: "customer".into(),
            entity_id: "c-1".into(),
            reason: "schema".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(SyncError::Offline("probe".into()).is_connectivity_error());
        assert!(SyncError::MeteredLink(ConnectionType::Cellular).is_connectivity_error());
        assert!(!SyncError::Timeout(5).is_connectivity_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::ChecksumMismatch {
            expected: "abc".into(),
            actual: "def".into(),
        };
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains("def"));

        let err = SyncError::MeteredLink(ConnectionType::Cellular);
        assert!(err.to_string().contains("cellular"));
    }
}
