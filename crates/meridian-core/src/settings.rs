//! # Cloud Settings
//!
//! Process-wide sync behavior settings.
//!
//! ## Settings vs Runtime Config
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Two Kinds of Configuration                           │
//! │                                                                         │
//! │  CloudSettings (THIS FILE)            RuntimeConfig (meridian-sync)    │
//! │  ──────────────────────────           ─────────────────────────────    │
//! │  • Lives inside the store document    • Lives in runtime.toml          │
//! │  • Travels with backups/restores      • Stays on this machine          │
//! │  • Operator-tunable at runtime        • Read once at startup           │
//! │  • auto_sync, batch_size, retries     • device id, data paths          │
//! │                                                                         │
//! │  Every settings update rewrites the persisted store document.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::types::{BackupFrequency, ConflictPolicy};
use crate::validation::{
    validate_batch_size, validate_max_retries, validate_retention_days, validate_retry_delay,
    validate_sync_interval,
};

// =============================================================================
// Cloud Settings
// =============================================================================

/// Operator-tunable sync behavior. Part of the persisted store document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CloudSettings {
    /// Dirty writes enqueue uploads and the scheduler triggers cycles.
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,

    /// Minutes between automatic sync cycles.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_minutes: u32,

    /// Only sync on unmetered links (wifi or ethernet).
    #[serde(default)]
    pub sync_on_wifi_only: bool,

    /// Retry budget per operation. 0 disables retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base hold-off between retry attempts (seconds). Doubles per attempt.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Operations processed per phase per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Compress backup snapshots with zstd.
    #[serde(default = "default_true")]
    pub compression_enabled: bool,

    /// Encrypt backup artifacts with AES-256-GCM.
    #[serde(default = "default_true")]
    pub encryption_enabled: bool,

    /// Default stance when a conflict is detected.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// How often the scheduler takes an automatic backup.
    #[serde(default)]
    pub backup_frequency: BackupFrequency,

    /// Completed backups older than this are swept (days).
    #[serde(default = "default_retention_days")]
    pub retention_period_days: u32,
}

fn default_auto_sync() -> bool {
    true
}

fn default_sync_interval() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    30
}

fn default_batch_size() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            auto_sync: default_auto_sync(),
            sync_interval_minutes: default_sync_interval(),
            sync_on_wifi_only: false,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            batch_size: default_batch_size(),
            compression_enabled: true,
            encryption_enabled: true,
            conflict_policy: ConflictPolicy::default(),
            backup_frequency: BackupFrequency::default(),
            retention_period_days: default_retention_days(),
        }
    }
}

impl CloudSettings {
    /// Validates every field against its allowed range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_sync_interval(self.sync_interval_minutes)?;
        validate_max_retries(self.max_retries)?;
        validate_retry_delay(self.retry_delay_secs)?;
        validate_batch_size(self.batch_size)?;
        validate_retention_days(self.retention_period_days)?;
        Ok(())
    }

    /// Interval between automatic sync cycles.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.sync_interval_minutes) * 60)
    }

    /// Hold-off before the attempt after `retry_count` failures.
    ///
    /// Doubles per failure: 30s, 60s, 120s with the default delay. The
    /// exponent is capped so pathological retry counts cannot overflow.
    pub fn retry_holdoff(&self, retry_count: u32) -> Duration {
        if self.retry_delay_secs == 0 || retry_count == 0 {
            return Duration::from_secs(0);
        }
        let exponent = (retry_count - 1).min(10);
        let secs = self.retry_delay_secs.saturating_mul(1u64 << exponent);
        Duration::from_secs(secs)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
