//! # meridian-sync: Sync Engine for Meridian POS
//!
//! This crate is the synchronization layer for Meridian POS terminals:
//! offline-first writes against the local store, with background upload,
//! download, conflict resolution, and encrypted backups when a link is up.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Engine Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    SyncEngine (Orchestrator)                     │  │
//! │  │                                                                  │  │
//! │  │  Owns the queue, runs single-flight sync cycles, and fronts      │  │
//! │  │  conflicts, backups, devices, and notifications                  │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   SyncQueue    │  │ Connectivity   │  │   RemoteTransport      │    │
//! │  │                │  │ Monitor        │  │   (trait)              │    │
//! │  │ Priority order │  │                │  │                        │    │
//! │  │ Retry holdoffs │  │ Interface +    │  │ upload / download      │    │
//! │  │ Settled archive│  │ active probe   │  │ against the cloud API  │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ConflictResolver│  │ BackupManager  │  │   SyncScheduler        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ client/server/ │  │ zstd + AES-GCM │  │ Periodic cycles and    │    │
//! │  │ merge, exactly │  │ artifacts with │  │ scheduled backups on   │    │
//! │  │ once           │  │ SHA-256 index  │  │ one ticker             │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  The engine observes the offline store: every dirty write lands in     │
//! │  the queue without the store knowing the queue exists.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - Main `SyncEngine` orchestrator and its builder
//! - [`queue`] - Priority queue with retry holdoffs and a settled archive
//! - [`transport`] - `RemoteTransport` trait plus a scripted test double
//! - [`connectivity`] - Link monitoring with active reachability probes
//! - [`conflict`] - Conflict resolution and merge strategies
//! - [`backup`] - Encrypted, compressed store snapshots with an index
//! - [`scheduler`] - Background cadence for cycles and backups
//! - [`config`] - Runtime configuration (device identity, paths, key)
//! - [`notify`] - Notification retention and event sinks
//! - [`devices`] - Fleet registry with staleness-based presence
//! - [`analytics`] - Sync activity reports over a time window
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian_store::OfflineStore;
//! use meridian_sync::{SyncEngineBuilder, SyncScheduler};
//!
//! let store = Arc::new(OfflineStore::open(path, device_id, settings).await?);
//! let engine = SyncEngineBuilder::new(store, transport, probe)
//!     .backups(backup_dir, Some(key))
//!     .build()
//!     .await?;
//!
//! // Local writes queue themselves; cycles drain the queue
//! engine.store().save("sale", "s-1", payload, true).await?;
//! let report = engine.start_sync().await?;
//! println!("uploaded {}", report.uploads_completed);
//!
//! // Or let the scheduler drive it
//! let handle = SyncScheduler::spawn(engine.clone(), Duration::from_secs(30));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod analytics;
pub mod backup;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod devices;
pub mod engine;
pub mod error;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

// Engine
pub use engine::{CycleReport, SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use scheduler::{SchedulerHandle, SyncScheduler};

// Queue and transport
pub use queue::SyncQueue;
pub use transport::{
    RemoteRecord, RemoteTransport, ScriptedOutcome, ScriptedTransport, UploadRequest,
    UploadResponse,
};

// Connectivity
pub use connectivity::{
    ConnectivityMonitor, LinkSnapshot, ReachabilityProbe, StaticProbe, WatcherHandle,
};

// Conflicts and backups
pub use backup::BackupManager;
pub use conflict::{ConflictResolver, LastWriterWins, MergeStrategy, ResolutionOutcome};

// Configuration and surround
pub use config::RuntimeConfig;
pub use devices::DeviceRegistry;
pub use notify::{NoOpSink, NotificationCenter, SyncEventSink};
