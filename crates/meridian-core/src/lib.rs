//! # meridian-core: Pure Domain Model for the Meridian Sync Engine
//!
//! This crate is the **heart** of the Meridian offline-first sync engine. It
//! contains every domain type and state transition as pure code with zero
//! I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Meridian POS Sync Architecture                      │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Entity CRUD Services (external)                 │   │
//! │  │    products ──► customers ──► employees ──► inventory          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ save(entity, payload, dirty)           │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                meridian-store (Offline Store)                   │   │
//! │  │        versioned records • dirty flags • JSON document          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ meridian-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ settings  │  │   error   │  │ validation│  │   │
//! │  │   │ Operation │  │  Cloud    │  │   Core    │  │   rules   │  │   │
//! │  │   │ Conflict  │  │ Settings  │  │ Validation│  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO CLOCK • NO NETWORK • PURE TRANSITIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                meridian-sync (Engine Layer)                     │   │
//! │  │       queue, cycles, conflicts, backups, scheduler              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (OfflineRecord, SyncOperation, ConflictRecord, ...)
//! - [`settings`] - CloudSettings with defaults and validation
//! - [`error`] - Domain error types
//! - [`validation`] - Field-level validation rules
//!
//! ## Design Principles
//!
//! 1. **Pure Transitions**: state changes are methods that take timestamps as
//!    arguments; this crate never reads the clock
//! 2. **No I/O**: file system, network, and async runtimes are FORBIDDEN here
//! 3. **Explicit Errors**: all errors are typed, never strings or panics
//! 4. **Observable Types**: everything the UI can see derives `TS` for
//!    generated TypeScript bindings
//!
//! ## Example Usage
//!
//! ```rust
//! use meridian_core::types::{SyncPriority, OperationStatus};
//!
//! // Priorities order critical-first for queue draining
//! let mut batch = vec![SyncPriority::Low, SyncPriority::Critical, SyncPriority::Normal];
//! batch.sort_by(|a, b| b.cmp(a));
//! assert_eq!(batch[0], SyncPriority::Critical);
//!
//! // Terminal states never leave the archive
//! assert!(OperationStatus::Completed.is_terminal());
//! assert!(!OperationStatus::Pending.is_terminal());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod settings;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use meridian_core::SyncOperation` instead of
// `use meridian_core::types::SyncOperation`

pub use error::{CoreError, CoreResult, ValidationError};
pub use settings::CloudSettings;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Entity id marker for a download operation that covers a whole entity type
/// rather than a single record.
pub const ENTITY_ID_WILDCARD: &str = "*";

/// Maximum operations a single sync cycle may process per phase.
///
/// Settings validation rejects batch sizes above this. Keeps one cycle from
/// monopolizing the timeline on a backlogged queue.
pub const MAX_BATCH_SIZE: usize = 500;

/// Maximum automatic sync interval (24 hours, in minutes).
pub const MAX_SYNC_INTERVAL_MINUTES: u32 = 1_440;

/// Maximum retry budget a single operation may be configured with.
pub const MAX_RETRY_LIMIT: u32 = 10;

/// Maximum retention window for completed backups, in days (10 years).
pub const MAX_RETENTION_DAYS: u32 = 3_650;
