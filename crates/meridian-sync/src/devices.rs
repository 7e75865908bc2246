//! # Device Registry
//!
//! Tracks the terminals participating in this store's sync scope.
//!
//! Registration is idempotent on device id; re-registering updates the
//! descriptive fields and counts as a heartbeat. A device that has not
//! touched the registry recently still stays listed, only its online flag
//! goes stale, so the back office can see which registers exist even when
//! they are powered off.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use meridian_core::DeviceRecord;

/// A device silent for longer than this is shown offline.
pub const DEVICE_ONLINE_WINDOW_SECS: i64 = 300;

/// In-memory registry of known terminals.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or updates a device. The stored record keeps its original
    /// capabilities unless the new registration carries some.
    pub async fn register(&self, mut record: DeviceRecord) -> DeviceRecord {
        let mut devices = self.devices.write().await;
        match devices.get(&record.id) {
            Some(existing) => {
                if record.capabilities.is_empty() {
                    record.capabilities = existing.capabilities.clone();
                }
                info!(device_id = %record.id, name = %record.name, "Device re-registered");
            }
            None => {
                info!(device_id = %record.id, name = %record.name, "Device registered");
            }
        }
        devices.insert(record.id.clone(), record.clone());
        record
    }

    /// Heartbeat. False when the device is unknown.
    pub async fn touch(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut devices = self.devices.write().await;
        match devices.get_mut(id) {
            Some(device) => {
                device.touch(now);
                true
            }
            None => false,
        }
    }

    /// Explicitly flips the online flag. False when the device is unknown.
    pub async fn set_online(&self, id: &str, online: bool, now: DateTime<Utc>) -> bool {
        let mut devices = self.devices.write().await;
        match devices.get_mut(id) {
            Some(device) => {
                device.is_online = online;
                if online {
                    device.last_seen = now;
                }
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.devices.read().await.get(id).cloned()
    }

    /// All known devices with staleness applied, sorted by name.
    pub async fn list(&self, now: DateTime<Utc>) -> Vec<DeviceRecord> {
        let devices = self.devices.read().await;
        let mut list: Vec<DeviceRecord> = devices
            .values()
            .map(|device| {
                let mut device = device.clone();
                if device.is_online && is_stale(&device, now) {
                    device.is_online = false;
                }
                device
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn online_count(&self, now: DateTime<Utc>) -> usize {
        self.devices
            .read()
            .await
            .values()
            .filter(|device| device.is_online && !is_stale(device, now))
            .count()
    }
}

fn is_stale(device: &DeviceRecord, now: DateTime<Utc>) -> bool {
    now - device.last_seen > Duration::seconds(DEVICE_ONLINE_WINDOW_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::DeviceKind;

    fn device(id: &str, name: &str, now: DateTime<Utc>) -> DeviceRecord {
        DeviceRecord::new(id, name, DeviceKind::Desktop, "linux", "1.0.0", now)
    }

    #[tokio::test]
    async fn test_register_is_idempotent_on_id() {
        let registry = DeviceRegistry::new();
        let now = Utc::now();

        let mut first = device("d-1", "Register 1", now);
        first.capabilities = vec!["barcode_scanner".to_string()];
        registry.register(first).await;

        // Re-register without capabilities keeps the stored ones
        let renamed = device("d-1", "Front Register", now);
        let stored = registry.register(renamed).await;
        assert_eq!(stored.capabilities, vec!["barcode_scanner".to_string()]);

        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.get("d-1").await.unwrap().name, "Front Register");
    }

    #[tokio::test]
    async fn test_touch_and_unknown_device() {
        let registry = DeviceRegistry::new();
        let now = Utc::now();
        registry.register(device("d-1", "Register 1", now)).await;

        let later = now + Duration::seconds(60);
        assert!(registry.touch("d-1", later).await);
        assert_eq!(registry.get("d-1").await.unwrap().last_seen, later);
        assert!(!registry.touch("ghost", later).await);
    }

    #[tokio::test]
    async fn test_staleness_window() {
        let registry = DeviceRegistry::new();
        let now = Utc::now();
        registry.register(device("d-1", "Register 1", now)).await;
        registry.register(device("d-2", "Register 2", now)).await;

        let fresh = now + Duration::seconds(30);
        assert_eq!(registry.online_count(fresh).await, 2);

        registry.touch("d-1", fresh).await;
        let later = now + Duration::seconds(DEVICE_ONLINE_WINDOW_SECS + 60);
        assert_eq!(registry.online_count(later).await, 0);

        let list = registry.list(later).await;
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|d| !d.is_online));
    }

    #[tokio::test]
    async fn test_set_online_flag() {
        let registry = DeviceRegistry::new();
        let now = Utc::now();
        registry.register(device("d-1", "Register 1", now)).await;

        assert!(registry.set_online("d-1", false, now).await);
        assert_eq!(registry.online_count(now).await, 0);

        assert!(registry.set_online("d-1", true, now).await);
        assert_eq!(registry.online_count(now).await, 1);
        assert!(!registry.set_online("ghost", true, now).await);
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let registry = DeviceRegistry::new();
        let now = Utc::now();
        registry.register(device("d-2", "Zebra", now)).await;
        registry.register(device("d-1", "Alpha", now)).await;

        let list = registry.list(now).await;
        assert_eq!(list[0].name, "Alpha");
        assert_eq!(list[1].name, "Zebra");
    }
}
