//! # Error Types
//!
//! Domain-specific error types for meridian-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  meridian-core errors (this file)                                      │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  meridian-store errors (separate crate)                                │
//! │  └── StoreError       - Document persistence failures                  │
//! │                                                                         │
//! │  meridian-sync errors (separate crate)                                 │
//! │  └── SyncError        - Cycle, transport, and backup failures          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → StoreError/SyncError → caller     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (entity type, operation id, etc.)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing message

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule errors.
///
/// These errors represent violations of the sync domain rules. They should be
/// caught and translated to user-friendly messages.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No offline record exists for the given key.
    ///
    /// ## When This Occurs
    /// - An operation references an entity that was never saved locally
    /// - A conflict resolution targets a record removed by a restore
    #[error("No offline record for {entity_type}/{entity_id}")]
    RecordNotFound {
        entity_type: String,
        entity_id: String,
    },

    /// Sync operation id is unknown to the queue and the archive.
    #[error("Sync operation not found: {0}")]
    OperationNotFound(String),

    /// Operation is not in a state that allows the requested transition.
    ///
    /// ## When This Occurs
    /// - Cancelling an operation that already started
    /// - Retrying an operation that is not failed
    #[error("Operation {operation_id} is {current_status}, cannot {action}")]
    InvalidOperationState {
        operation_id: String,
        current_status: String,
        action: String,
    },

    /// Conflict id is unknown.
    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    /// Conflict was already resolved; resolutions apply exactly once.
    #[error("Conflict {0} is already resolved")]
    ConflictAlreadyResolved(String),

    /// Backup record id is unknown.
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller-supplied values don't meet requirements.
/// Used for early validation before any state changes.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid enum literal).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
