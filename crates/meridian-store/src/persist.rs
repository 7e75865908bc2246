//! # Document Persistence
//!
//! Atomic load/save for the store document.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Atomic Document Swap                              │
//! │                                                                         │
//! │  serialize document                                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  write  offline-store.json.tmp      (full contents)                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  rename offline-store.json.tmp → offline-store.json                    │
//! │                                                                         │
//! │  The rename happens within one directory, so readers observe either    │
//! │  the old document or the new one, never a partial write.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::document::StoreDocument;
use crate::error::StoreResult;

// =============================================================================
// Document File
// =============================================================================

/// Handle to the on-disk document location.
#[derive(Debug, Clone)]
pub struct DocumentFile {
    path: PathBuf,
}

impl DocumentFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DocumentFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and validates the document, or None when no file exists yet.
    pub async fn load(&self) -> StoreResult<Option<StoreDocument>> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                let document = StoreDocument::from_bytes(&bytes)?;
                info!(
                    path = %self.path.display(),
                    records = document.records.len(),
                    "Loaded store document"
                );
                Ok(Some(document))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No store document yet");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes the document via a tmp file and an atomic rename.
    pub async fn save(&self, document: &StoreDocument) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let bytes = document.to_bytes()?;
        let tmp_path = self.tmp_path();

        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &self.path).await?;

        debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            records = document.records.len(),
            "Store document saved"
        );
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "offline-store.json".to_string());
        self.path.with_file_name(format!("{file_name}.tmp"))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
