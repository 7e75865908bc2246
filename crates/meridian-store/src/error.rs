//! # Store Error Types
//!
//! Error types for offline store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  std::io::Error / serde_json::Error                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError (this module) ← Adds context and categorization            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError (meridian-sync) ← Engine-level wrapping                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Caller displays user-friendly message                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use meridian_core::CoreError;

/// Offline store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Domain rule violation (missing record, bad key, settings range).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Document file could not be read or written.
    ///
    /// ## When This Occurs
    /// - Data directory missing or not writable
    /// - Disk full during the tmp-file write
    #[error("Document I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Document contents are not valid JSON for the expected shape.
    ///
    /// ## When This Occurs
    /// - Hand-edited or truncated document file
    /// - Restore payload produced by an incompatible build
    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Document was written by an unsupported schema version.
    #[error("Unsupported document schema version {found} (supported: {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },
}

impl StoreError {
    /// Convenience constructor for a missing record.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        StoreError::Core(CoreError::RecordNotFound {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        })
    }
}

impl From<meridian_core::ValidationError> for StoreError {
    fn from(err: meridian_core::ValidationError) -> Self {
        StoreError::Core(CoreError::Validation(err))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
