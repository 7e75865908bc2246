//! # Remote Transport
//!
//! The wire contract between a terminal and the cloud backend.
//!
//! ## Protocol Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Transport Contract                              │
//! │                                                                         │
//! │  UPLOAD (one record per call)                                          │
//! │  ────────────────────────────                                          │
//! │  Terminal ──UploadRequest{base_version, payload}──▶ Server             │
//! │                                                                         │
//! │  Server checks base_version against its copy:                          │
//! │    • match    → apply, respond Accepted{new_version}                   │
//! │    • mismatch → respond Conflict{server_snapshot, server_version}      │
//! │    • force    → apply regardless, respond Accepted{new_version}        │
//! │                                                                         │
//! │  DOWNLOAD (per entity type)                                            │
//! │  ──────────────────────────                                            │
//! │  Terminal ──(entity_type, since)──▶ Server                             │
//! │  Server  ──Vec<RemoteRecord>──▶ Terminal                               │
//! │    rows changed after `since` (everything when `since` is None)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Production backends implement [`RemoteTransport`] in the embedding
//! application (HTTP, gRPC, whatever the deployment uses). This crate ships
//! the trait plus [`ScriptedTransport`], an in-memory remote with scriptable
//! outcomes, used by the test suite and the demo binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Wire Types
// =============================================================================

/// A single record pushed to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Entity type of the record (e.g., "customer", "sale").
    pub entity_type: String,

    /// Entity ID of the record.
    pub entity_id: String,

    /// Version the terminal last saw for this record. The server compares
    /// this against its own copy to detect concurrent edits.
    pub base_version: i64,

    /// Skip the version check and apply unconditionally. Set only by
    /// client-wins conflict resolution.
    pub force: bool,

    /// Full record payload.
    pub payload: Value,
}

/// Server verdict for an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadResponse {
    /// Record applied. The terminal adopts `new_version`.
    Accepted { new_version: i64 },

    /// The server copy moved past `base_version`. Nothing was applied;
    /// the terminal gets the server's current state for conflict handling.
    Conflict {
        server_snapshot: Value,
        server_version: i64,
    },
}

/// A record pulled from the server during the download phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Entity ID within the requested entity type.
    pub entity_id: String,

    /// Full record payload.
    pub payload: Value,

    /// Server version of the record.
    pub version: i64,
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Abstraction over the cloud backend.
///
/// Implementations must be safe to call concurrently. The engine makes one
/// `upload` call per queued operation and one `download` call per entity
/// type with pending pull work.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Pushes one record. See [`UploadResponse`] for the verdict semantics.
    async fn upload(&self, request: UploadRequest) -> SyncResult<UploadResponse>;

    /// Pulls records of one entity type changed after `since`.
    /// `None` asks for everything the server has.
    async fn download(
        &self,
        entity_type: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteRecord>>;
}

// =============================================================================
// Scripted Transport (simulator)
// =============================================================================

/// Next scripted verdict for an upload of a specific record.
#[derive(Debug, Clone, Default)]
pub enum ScriptedOutcome {
    /// Accept and bump the remote version.
    #[default]
    Accept,

    /// Fail with a retryable transport error.
    Fail(String),

    /// Report a version conflict with this server state. Ignored when the
    /// request carries `force`.
    Conflict {
        server_snapshot: Value,
        server_version: i64,
    },
}

#[derive(Debug, Default)]
struct ScriptState {
    /// Pending verdicts per (entity_type, entity_id), consumed front first.
    /// An empty queue means Accept.
    upload_scripts: HashMap<(String, String), VecDeque<ScriptedOutcome>>,

    /// Pending download failures per entity type, consumed front first.
    download_failures: HashMap<String, VecDeque<String>>,

    /// Rows served by download, per entity type.
    download_rows: HashMap<String, Vec<RemoteRecord>>,

    /// Simulated server-side versions for accepted uploads.
    remote_versions: HashMap<(String, String), i64>,

    /// Every upload request seen, in call order.
    upload_log: Vec<UploadRequest>,

    /// Every download call seen, in call order.
    download_log: Vec<(String, Option<DateTime<Utc>>)>,
}

/// In-memory remote with scriptable outcomes.
///
/// Unscripted uploads are accepted with `new_version` one past the larger
/// of the request's base version and the simulated server version. The
/// download side returns whatever rows were installed for the entity type;
/// the `since` argument is recorded but not used to filter, so tests control
/// exactly what comes back.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Mutex<ScriptState>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues the next verdict for uploads of one record.
    pub fn push_upload_outcome(
        &self,
        entity_type: &str,
        entity_id: &str,
        outcome: ScriptedOutcome,
    ) {
        self.state()
            .upload_scripts
            .entry((entity_type.to_string(), entity_id.to_string()))
            .or_default()
            .push_back(outcome);
    }

    /// Queues a failure for the next download of one entity type.
    pub fn push_download_failure(&self, entity_type: &str, message: &str) {
        self.state()
            .download_failures
            .entry(entity_type.to_string())
            .or_default()
            .push_back(message.to_string());
    }

    /// Installs the rows served for one entity type.
    pub fn set_download_rows(&self, entity_type: &str, rows: Vec<RemoteRecord>) {
        self.state()
            .download_rows
            .insert(entity_type.to_string(), rows);
    }

    /// Pre-seeds the simulated server version of a record.
    pub fn set_remote_version(&self, entity_type: &str, entity_id: &str, version: i64) {
        self.state()
            .remote_versions
            .insert((entity_type.to_string(), entity_id.to_string()), version);
    }

    /// Server version of a record, if any upload was accepted for it.
    pub fn remote_version(&self, entity_type: &str, entity_id: &str) -> Option<i64> {
        self.state()
            .remote_versions
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .copied()
    }

    /// All upload requests seen so far, in call order.
    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.state().upload_log.clone()
    }

    /// Number of upload calls seen so far.
    pub fn upload_calls(&self) -> usize {
        self.state().upload_log.len()
    }

    /// All download calls seen so far, in call order.
    pub fn downloads(&self) -> Vec<(String, Option<DateTime<Utc>>)> {
        self.state().download_log.clone()
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn upload(&self, request: UploadRequest) -> SyncResult<UploadResponse> {
        let mut state = self.state();
        state.upload_log.push(request.clone());

        let key = (request.entity_type.clone(), request.entity_id.clone());
        let outcome = state
            .upload_scripts
            .get_mut(&key)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default();

        match outcome {
            ScriptedOutcome::Fail(message) => Err(SyncError::TransportFailed(message)),
            ScriptedOutcome::Conflict {
                server_snapshot,
                server_version,
            } if !request.force => Ok(UploadResponse::Conflict {
                server_snapshot,
                server_version,
            }),
            _ => {
                let current = state.remote_versions.get(&key).copied().unwrap_or(0);
                let new_version = current.max(request.base_version) + 1;
                state.remote_versions.insert(key, new_version);
                Ok(UploadResponse::Accepted { new_version })
            }
        }
    }

    async fn download(
        &self,
        entity_type: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteRecord>> {
        let mut state = self.state();
        state.download_log.push((entity_type.to_string(), since));

        if let Some(message) = state
            .download_failures
            .get_mut(entity_type)
            .and_then(|queue| queue.pop_front())
        {
            return Err(SyncError::TransportFailed(message));
        }

        Ok(state
            .download_rows
            .get(entity_type)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(entity_id: &str, base_version: i64, force: bool) -> UploadRequest {
        UploadRequest {
            entity_type: "customer".to_string(),
            entity_id: entity_id.to_string(),
            base_version,
            force,
            payload: json!({"name": "Alice"}),
        }
    }

    #[tokio::test]
    async fn test_unscripted_upload_accepts_and_bumps_version() {
        let transport = ScriptedTransport::new();

        let response = transport.upload(request("c-1", 0, false)).await.unwrap();
        assert!(matches!(
            response,
            UploadResponse::Accepted { new_version: 1 }
        ));

        let response = transport.upload(request("c-1", 1, false)).await.unwrap();
        assert!(matches!(
            response,
            UploadResponse::Accepted { new_version: 2 }
        ));
        assert_eq!(transport.remote_version("customer", "c-1"), Some(2));
        assert_eq!(transport.upload_calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures_consumed_in_order() {
        let transport = ScriptedTransport::new();
        transport.push_upload_outcome("customer", "c-1", ScriptedOutcome::Fail("reset".into()));

        let err = transport.upload(request("c-1", 0, false)).await.unwrap_err();
        assert!(err.is_retryable());

        // Script exhausted, next call accepts
        let response = transport.upload(request("c-1", 0, false)).await.unwrap();
        assert!(matches!(response, UploadResponse::Accepted { .. }));
    }

    #[tokio::test]
    async fn test_conflict_outcome_and_force_bypass() {
        let transport = ScriptedTransport::new();
        let server = json!({"name": "Bob"});
        transport.push_upload_outcome(
            "customer",
            "c-1",
            ScriptedOutcome::Conflict {
                server_snapshot: server.clone(),
                server_version: 5,
            },
        );
        transport.push_upload_outcome(
            "customer",
            "c-1",
            ScriptedOutcome::Conflict {
                server_snapshot: server.clone(),
                server_version: 5,
            },
        );

        let response = transport.upload(request("c-1", 2, false)).await.unwrap();
        match response {
            UploadResponse::Conflict {
                server_snapshot,
                server_version,
            } => {
                assert_eq!(server_snapshot, server);
                assert_eq!(server_version, 5);
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        // Same script entry with force applies anyway
        let response = transport.upload(request("c-1", 2, true)).await.unwrap();
        assert!(matches!(
            response,
            UploadResponse::Accepted { new_version: 3 }
        ));
    }

    #[tokio::test]
    async fn test_download_rows_and_failures() {
        let transport = ScriptedTransport::new();
        transport.set_download_rows(
            "sale",
            vec![RemoteRecord {
                entity_id: "s-1".to_string(),
                payload: json!({"total": 12.5}),
                version: 3,
            }],
        );
        transport.push_download_failure("sale", "gateway timeout");

        let err = transport.download("sale", None).await.unwrap_err();
        assert!(err.is_retryable());

        let rows = transport.download("sale", Some(Utc::now())).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entity_id, "s-1");

        let calls = transport.downloads();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "sale");
        assert!(calls[0].1.is_none());
        assert!(calls[1].1.is_some());

        // Unknown entity type downloads empty
        assert!(transport.download("product", None).await.unwrap().is_empty());
    }
}
