//! # Runtime Configuration
//!
//! Device-local configuration for the sync engine.
//!
//! Sync *behavior* (intervals, retry budgets, conflict policy) lives in
//! [`CloudSettings`](meridian_core::CloudSettings) inside the offline store
//! document, because it syncs across terminals like any other record. This
//! module covers what must exist *before* the store opens: device identity,
//! storage paths, probe cadence, and the backup encryption key.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MERIDIAN_DEVICE_ID=abc-123                                         │
//! │     MERIDIAN_DATA_DIR=/var/lib/meridian                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/meridian-pos/runtime.toml (Linux)                        │
//! │     ~/Library/Application Support/com.meridian.pos/runtime.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     device id and backup key generated on first run                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # runtime.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [storage]
//! data_dir = "/var/lib/meridian"
//!
//! [connectivity]
//! poll_interval_secs = 30
//! probe_timeout_secs = 5
//!
//! [backup]
//! key_hex = "9f86d081884c7d659a2feaa0c55ad015..."
//! ```

use aes_gcm::aead::{KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

/// File name of the persisted offline store document under the data dir.
pub const STORE_DOCUMENT_FILE: &str = "offline-store.json";

/// Directory name for backup artifacts under the data dir.
pub const BACKUP_DIR_NAME: &str = "backups";

// =============================================================================
// Device Identity
// =============================================================================

/// Identity of this terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    /// Unique device identifier (UUID v4).
    /// Generated on first run if not provided.
    #[serde(default)]
    pub id: String,

    /// Human-readable device name (e.g., "Register 1", "Back Office").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Meridian Terminal".to_string()
}

impl Default for DeviceSection {
    fn default() -> Self {
        DeviceSection {
            id: String::new(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Storage Paths
// =============================================================================

/// Where the store document and backup artifacts live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// Base data directory. Defaults to the platform data dir
    /// (e.g., `~/.local/share/meridian-pos` on Linux).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

// =============================================================================
// Connectivity Settings
// =============================================================================

/// Reachability probe cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySection {
    /// Interval between background reachability probes (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Timeout for a single probe (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for ConnectivitySection {
    fn default() -> Self {
        ConnectivitySection {
            poll_interval_secs: default_poll_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

// =============================================================================
// Backup Key
// =============================================================================

/// Backup encryption key material.
///
/// The key never leaves this terminal. Losing it makes encrypted backups
/// unrestorable, which is why `ensure_identity` persists a generated key
/// back to disk immediately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupSection {
    /// AES-256 key as 64 hex characters. Generated on first run if absent.
    #[serde(default)]
    pub key_hex: Option<String>,
}

// =============================================================================
// Main Runtime Configuration
// =============================================================================

/// Complete device-local configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Device identity.
    #[serde(default)]
    pub device: DeviceSection,

    /// Storage paths.
    #[serde(default)]
    pub storage: StorageSection,

    /// Probe cadence.
    #[serde(default)]
    pub connectivity: ConnectivitySection,

    /// Backup key material.
    #[serde(default)]
    pub backup: BackupSection,
}

impl RuntimeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (runtime.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading runtime config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or falls back to defaults, then fills in any missing
    /// identity material and persists it best-effort.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        let path = config_path.or_else(Self::default_config_path);
        let mut config = Self::load(path.clone()).unwrap_or_else(|e| {
            warn!("Failed to load runtime config: {}. Using defaults.", e);
            Self::default()
        });

        if config.ensure_identity() {
            if let Err(e) = config.save(path) {
                warn!("Could not persist generated identity: {}", e);
            }
        }

        config
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Runtime config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.connectivity.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "connectivity.poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.connectivity.probe_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "connectivity.probe_timeout_secs must be greater than 0".into(),
            ));
        }

        // A present key must at least decode before the engine starts.
        if let Some(ref key) = self.backup.key_hex {
            parse_key(key)?;
        }

        Ok(())
    }

    /// Fills in a generated device ID and backup key where missing.
    ///
    /// Returns true if anything changed and the config should be saved.
    pub fn ensure_identity(&mut self) -> bool {
        let mut changed = false;

        if self.device.id.is_empty() {
            self.device.id = Uuid::new_v4().to_string();
            info!(device_id = %self.device.id, "Generated new device ID");
            changed = true;
        }

        if self.backup.key_hex.is_none() {
            let key = Aes256Gcm::generate_key(OsRng);
            self.backup.key_hex = Some(hex::encode(key));
            info!("Generated new backup encryption key");
            changed = true;
        }

        changed
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("MERIDIAN_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("MERIDIAN_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(dir) = std::env::var("MERIDIAN_DATA_DIR") {
            debug!(data_dir = %dir, "Overriding data dir from environment");
            self.storage.data_dir = Some(PathBuf::from(dir));
        }

        if let Ok(key) = std::env::var("MERIDIAN_BACKUP_KEY") {
            self.backup.key_hex = Some(key);
        }

        if let Ok(interval) = std::env::var("MERIDIAN_POLL_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.connectivity.poll_interval_secs = secs;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "meridian", "pos")
            .map(|dirs| dirs.config_dir().join("runtime.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the device name.
    pub fn device_name(&self) -> &str {
        &self.device.name
    }

    /// Resolves the base data directory.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.storage.data_dir.clone().or_else(|| {
            directories::ProjectDirs::from("com", "meridian", "pos")
                .map(|dirs| dirs.data_dir().to_path_buf())
        })
    }

    /// Path of the persisted store document.
    pub fn store_document_path(&self) -> Option<PathBuf> {
        self.data_dir().map(|dir| dir.join(STORE_DOCUMENT_FILE))
    }

    /// Directory for backup artifacts.
    pub fn backup_dir(&self) -> Option<PathBuf> {
        self.data_dir().map(|dir| dir.join(BACKUP_DIR_NAME))
    }

    /// Decodes the backup key, if one is configured.
    pub fn key_bytes(&self) -> SyncResult<Option<[u8; 32]>> {
        match &self.backup.key_hex {
            Some(key) => Ok(Some(parse_key(key)?)),
            None => Ok(None),
        }
    }
}

fn parse_key(hex_key: &str) -> SyncResult<[u8; 32]> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| SyncError::InvalidBackupKey(format!("not valid hex: {}", e)))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| SyncError::InvalidBackupKey(format!("expected 32 bytes, got {}", len)))
}
