//! # Store Document
//!
//! The serialized form of the whole offline store: every record plus the
//! current settings, keyed by the owning device. This is the unit the
//! persistence layer writes and the backup pipeline snapshots.
//!
//! Records serialize in key order, so the same store state always produces
//! the same bytes. Restores and backup checksums depend on that.

use serde::{Deserialize, Serialize};

use meridian_core::{CloudSettings, OfflineRecord};

use crate::error::{StoreError, StoreResult};

/// Current document layout version.
pub const DOCUMENT_SCHEMA_VERSION: u32 = 1;

// =============================================================================
// Store Document
// =============================================================================

/// Whole-store snapshot: records, settings, owning device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Layout version for forward-compatibility checks on load.
    pub schema_version: u32,

    /// Stable identifier of the device that wrote this document.
    pub device_id: String,

    /// Sync behavior settings active when the snapshot was taken.
    pub settings: CloudSettings,

    /// Every offline record, sorted by (entity_type, entity_id).
    pub records: Vec<OfflineRecord>,
}

impl StoreDocument {
    /// Builds a document from live store state. Sorts records for
    /// deterministic serialization.
    pub fn new(
        device_id: impl Into<String>,
        settings: CloudSettings,
        mut records: Vec<OfflineRecord>,
    ) -> Self {
        records.sort_by(|a, b| {
            (a.entity_type.as_str(), a.entity_id.as_str())
                .cmp(&(b.entity_type.as_str(), b.entity_id.as_str()))
        });

        StoreDocument {
            schema_version: DOCUMENT_SCHEMA_VERSION,
            device_id: device_id.into(),
            settings,
            records,
        }
    }

    /// Empty document for a fresh device.
    pub fn empty(device_id: impl Into<String>, settings: CloudSettings) -> Self {
        Self::new(device_id, settings, Vec::new())
    }

    /// Checks the schema version and settings ranges.
    pub fn validate(&self) -> StoreResult<()> {
        if self.schema_version != DOCUMENT_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                found: self.schema_version,
                supported: DOCUMENT_SCHEMA_VERSION,
            });
        }
        self.settings.validate()?;
        Ok(())
    }

    /// Serializes to the canonical on-disk byte form.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parses the on-disk byte form and validates it.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let document: StoreDocument = serde_json::from_slice(bytes)?;
        document.validate()?;
        Ok(document)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(entity_type: &str, entity_id: &str) -> OfflineRecord {
        OfflineRecord::new(entity_type, entity_id, json!({"k": entity_id}), Utc::now())
    }

    #[test]
    fn test_records_sorted_on_build() {
        let document = StoreDocument::new(
            "device-1",
            CloudSettings::default(),
            vec![
                record("product", "p-2"),
                record("customer", "c-1"),
                record("product", "p-1"),
            ],
        );

        let keys: Vec<(&str, &str)> = document
            .records
            .iter()
            .map(|r| (r.entity_type.as_str(), r.entity_id.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![("customer", "c-1"), ("product", "p-1"), ("product", "p-2")]
        );
    }

    #[test]
    fn test_byte_round_trip() {
        let document = StoreDocument::new(
            "device-1",
            CloudSettings::default(),
            vec![record("customer", "c-1")],
        );

        let bytes = document.to_bytes().unwrap();
        let parsed = StoreDocument::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, document);
    }

    #[test]
    fn test_same_state_same_bytes() {
        let build = || {
            StoreDocument::new(
                "device-1",
                CloudSettings::default(),
                vec![record("product", "p-1"), record("customer", "c-1")],
            )
        };

        // Timestamps differ between the two builds, so compare with the
        // records normalized to one clock.
        let mut a = build();
        let mut b = build();
        let stamp = Utc::now();
        for r in a.records.iter_mut().chain(b.records.iter_mut()) {
            r.last_modified = stamp;
        }
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn test_rejects_unknown_schema() {
        let mut document = StoreDocument::empty("device-1", CloudSettings::default());
        document.schema_version = 99;
        let bytes = serde_json::to_vec(&document).unwrap();
        assert!(matches!(
            StoreDocument::from_bytes(&bytes),
            Err(StoreError::UnsupportedSchema { found: 99, .. })
        ));
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let mut document = StoreDocument::empty("device-1", CloudSettings::default());
        document.settings.batch_size = 0;
        let bytes = serde_json::to_vec(&document).unwrap();
        assert!(StoreDocument::from_bytes(&bytes).is_err());
    }
}
