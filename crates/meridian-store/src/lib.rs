//! # meridian-store: Offline Store for Meridian POS
//!
//! This crate owns the authoritative local record of entity snapshots, their
//! version numbers, and their dirty flags, plus the single JSON document that
//! persists all of it.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Meridian POS Data Flow                            │
//! │                                                                         │
//! │  CRUD service (update_customer)                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  meridian-store (THIS CRATE)                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ OfflineStore  │    │ StoreDocument │    │ DocumentFile │  │   │
//! │  │   │  (store.rs)   │    │ (document.rs) │    │ (persist.rs) │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ versioned     │───►│ canonical     │───►│ tmp + rename │  │   │
//! │  │   │ record map    │    │ JSON snapshot │    │ atomic swap  │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │ on_dirty_write                                     │   │
//! │  └───────────┼─────────────────────────────────────────────────────┘   │
//! │              ▼                                                          │
//! │  meridian-sync registers a StoreObserver and turns dirty writes        │
//! │  into queued upload operations                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - The offline store and its observer hook
//! - [`document`] - Whole-store snapshot format
//! - [`persist`] - Atomic document file handling
//! - [`error`] - Store error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian_core::CloudSettings;
//! use meridian_store::OfflineStore;
//!
//! let store = OfflineStore::open(path, "device-1", CloudSettings::default()).await?;
//! store.save("customer", "c-1", payload, true).await?;
//! let dirty = store.dirty_records().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod document;
pub mod error;
pub mod persist;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use document::{StoreDocument, DOCUMENT_SCHEMA_VERSION};
pub use error::{StoreError, StoreResult};
pub use persist::DocumentFile;
pub use store::{OfflineStore, RemoteApplyOutcome, StoreObserver};
