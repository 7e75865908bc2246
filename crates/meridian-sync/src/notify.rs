//! # Notifications
//!
//! Operator-facing notifications and the event fan-out seam.
//!
//! The engine raises a notification when something needs a human: a conflict
//! waiting for resolution, an upload that spent its retry budget, a finished
//! or failed backup. UI layers subscribe through [`SyncEventSink`] and also
//! pull the retained list for a notification panel.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use meridian_core::{NotificationKind, SyncNotification, SyncPriority, SyncStatus};

/// How many notifications the center retains, newest first.
pub const NOTIFICATION_RETENTION: usize = 100;

// =============================================================================
// Event Sink Trait
// =============================================================================

/// Push-style subscriber for engine events (implemented by the UI shell).
///
/// Callbacks run inline on engine tasks and must not block.
pub trait SyncEventSink: Send + Sync {
    /// Called after each status recomputation.
    fn on_status(&self, status: &SyncStatus);

    /// Called for every raised notification.
    fn on_notification(&self, notification: &SyncNotification);
}

/// No-op sink for testing and headless deployments.
pub struct NoOpSink;

impl SyncEventSink for NoOpSink {
    fn on_status(&self, _status: &SyncStatus) {}
    fn on_notification(&self, _notification: &SyncNotification) {}
}

// =============================================================================
// Notification Center
// =============================================================================

/// Retains recent notifications and fans events out to registered sinks.
pub struct NotificationCenter {
    notifications: RwLock<VecDeque<SyncNotification>>,
    sinks: RwLock<Vec<Arc<dyn SyncEventSink>>>,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        NotificationCenter {
            notifications: RwLock::new(VecDeque::new()),
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub async fn register_sink(&self, sink: Arc<dyn SyncEventSink>) {
        self.sinks.write().await.push(sink);
    }

    /// Raises a notification: retains it and pushes it to every sink.
    pub async fn publish(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        priority: SyncPriority,
        now: DateTime<Utc>,
    ) -> SyncNotification {
        let notification = SyncNotification::new(kind, title, body, priority, now);
        debug!(
            notification_id = %notification.id,
            kind = ?kind,
            priority = %priority,
            title = %notification.title,
            "Notification raised"
        );

        {
            let mut notifications = self.notifications.write().await;
            notifications.push_front(notification.clone());
            notifications.truncate(NOTIFICATION_RETENTION);
        }

        let sinks = self.sinks.read().await;
        for sink in sinks.iter() {
            sink.on_notification(&notification);
        }

        notification
    }

    /// Pushes a status snapshot to every sink.
    pub async fn emit_status(&self, status: &SyncStatus) {
        let sinks = self.sinks.read().await;
        for sink in sinks.iter() {
            sink.on_status(status);
        }
    }

    /// Retained notifications, newest first.
    pub async fn notifications(&self) -> Vec<SyncNotification> {
        self.notifications.read().await.iter().cloned().collect()
    }

    pub async fn unread_count(&self) -> usize {
        self.notifications
            .read()
            .await
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    /// Marks one notification read. False if unknown or already read.
    pub async fn mark_read(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut notifications = self.notifications.write().await;
        notifications
            .iter_mut()
            .find(|n| n.id == id)
            .map(|n| n.mark_read(now))
            .unwrap_or(false)
    }

    /// Marks everything read. Returns how many changed.
    pub async fn mark_all_read(&self, now: DateTime<Utc>) -> usize {
        let mut notifications = self.notifications.write().await;
        notifications
            .iter_mut()
            .filter(|n| !n.is_read)
            .map(|n| {
                n.mark_read(now);
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        statuses: AtomicUsize,
        notifications: AtomicUsize,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(CountingSink {
                statuses: AtomicUsize::new(0),
                notifications: AtomicUsize::new(0),
            })
        }
    }

    impl SyncEventSink for CountingSink {
        fn on_status(&self, _status: &SyncStatus) {
            self.statuses.fetch_add(1, Ordering::SeqCst);
        }
        fn on_notification(&self, _notification: &SyncNotification) {
            self.notifications.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_publish_retains_and_fans_out() {
        let center = NotificationCenter::new();
        let sink = CountingSink::new();
        center.register_sink(sink.clone()).await;

        center
            .publish(
                NotificationKind::Conflict,
                "Conflict detected",
                "customer/c-1 needs resolution",
                SyncPriority::High,
                Utc::now(),
            )
            .await;
        center
            .publish(
                NotificationKind::Sync,
                "Sync complete",
                "3 records uploaded",
                SyncPriority::Normal,
                Utc::now(),
            )
            .await;

        assert_eq!(sink.notifications.load(Ordering::SeqCst), 2);
        let list = center.notifications().await;
        assert_eq!(list.len(), 2);
        // Newest first
        assert_eq!(list[0].kind, NotificationKind::Sync);
        assert_eq!(center.unread_count().await, 2);

        center.emit_status(&SyncStatus::default()).await;
        assert_eq!(sink.statuses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mark_read_applies_once() {
        let center = NotificationCenter::new();
        let note = center
            .publish(
                NotificationKind::Backup,
                "Backup failed",
                "disk full",
                SyncPriority::High,
                Utc::now(),
            )
            .await;

        assert!(center.mark_read(&note.id, Utc::now()).await);
        assert!(!center.mark_read(&note.id, Utc::now()).await);
        assert!(!center.mark_read("missing", Utc::now()).await);
        assert_eq!(center.unread_count().await, 0);
    }

    #[tokio::test]
    async fn test_retention_cap() {
        let center = NotificationCenter::new();
        for i in 0..NOTIFICATION_RETENTION + 5 {
            center
                .publish(
                    NotificationKind::System,
                    format!("note {i}"),
                    "",
                    SyncPriority::Low,
                    Utc::now(),
                )
                .await;
        }
        assert_eq!(center.notifications().await.len(), NOTIFICATION_RETENTION);
        // The newest survives the trim
        assert_eq!(
            center.notifications().await[0].title,
            format!("note {}", NOTIFICATION_RETENTION + 4)
        );
    }

    #[tokio::test]
    async fn test_mark_all_read_counts_changes() {
        let center = NotificationCenter::new();
        for _ in 0..3 {
            center
                .publish(
                    NotificationKind::Sync,
                    "note",
                    "",
                    SyncPriority::Normal,
                    Utc::now(),
                )
                .await;
        }
        assert_eq!(center.mark_all_read(Utc::now()).await, 3);
        assert_eq!(center.mark_all_read(Utc::now()).await, 0);
    }
}
