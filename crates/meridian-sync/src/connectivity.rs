//! # Connectivity Monitor
//!
//! Tracks whether the cloud backend is actually reachable.
//!
//! ## Online Verdict
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      How "online" is decided                            │
//! │                                                                         │
//! │   host network stack          reachability probe                        │
//! │   ──────────────────          ──────────────────                        │
//! │   set_connection(Wifi)   ──▶  interface up?  ──▶  probe endpoint        │
//! │                                    │                   │                │
//! │                                    ▼                   ▼                │
//! │                               None → offline      Ok(rtt) → online,     │
//! │                               (probe skipped)     speed from rtt        │
//! │                                                   Err/timeout → offline │
//! │                                                                         │
//! │   A captive portal or dead uplink looks "connected" to the OS but       │
//! │   fails the probe, so the interface type alone is never trusted.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The background watcher re-probes on a fixed interval while online and
//! with exponential backoff while offline, so recovery is noticed quickly
//! without hammering a dead endpoint.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use meridian_core::{ConnectionSpeed, ConnectionType};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Reachability Probe
// =============================================================================

/// A single reachability check against the cloud backend.
///
/// `Ok(rtt)` means the endpoint answered within `rtt`. Any error means
/// unreachable; the monitor does not distinguish failure causes.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> SyncResult<Duration>;
}

/// Probe with externally controlled results.
///
/// Used by the demo binary to simulate outages and by tests to drive the
/// monitor through state transitions.
#[derive(Debug)]
pub struct StaticProbe {
    online: AtomicBool,
    rtt_ms: AtomicU64,
}

impl StaticProbe {
    /// A probe that reports reachable with the given round-trip time.
    pub fn online(rtt_ms: u64) -> Self {
        StaticProbe {
            online: AtomicBool::new(true),
            rtt_ms: AtomicU64::new(rtt_ms),
        }
    }

    /// A probe that reports unreachable.
    pub fn offline() -> Self {
        StaticProbe {
            online: AtomicBool::new(false),
            rtt_ms: AtomicU64::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_rtt_ms(&self, rtt_ms: u64) {
        self.rtt_ms.store(rtt_ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn probe(&self) -> SyncResult<Duration> {
        if self.online.load(Ordering::SeqCst) {
            Ok(Duration::from_millis(self.rtt_ms.load(Ordering::SeqCst)))
        } else {
            Err(SyncError::ProbeFailed("endpoint unreachable".into()))
        }
    }
}

// =============================================================================
// Link State
// =============================================================================

/// Point-in-time view of the link.
#[derive(Debug, Clone, Copy)]
pub struct LinkSnapshot {
    pub connection_type: ConnectionType,
    pub speed: ConnectionSpeed,
    pub is_online: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_rtt_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct LinkState {
    connection_type: ConnectionType,
    speed: ConnectionSpeed,
    is_online: bool,
    last_checked: Option<DateTime<Utc>>,
    last_rtt_ms: Option<u64>,
}

impl LinkState {
    fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            connection_type: self.connection_type,
            speed: self.speed,
            is_online: self.is_online,
            last_checked: self.last_checked,
            last_rtt_ms: self.last_rtt_ms,
        }
    }
}

// =============================================================================
// Connectivity Monitor
// =============================================================================

/// Combines host interface state with active reachability probing.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    probe_timeout: Duration,
    state: RwLock<LinkState>,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, probe_timeout: Duration) -> Self {
        ConnectivityMonitor {
            probe,
            probe_timeout,
            state: RwLock::new(LinkState::default()),
        }
    }

    /// Records what the host reports about the link.
    ///
    /// `ConnectionType::None` forces offline immediately. Any connected type
    /// only makes the terminal online once a probe succeeds.
    pub async fn set_connection(&self, kind: ConnectionType) {
        let mut state = self.state.write().await;
        if state.connection_type != kind {
            info!(from = %state.connection_type, to = %kind, "Connection type changed");
        }
        state.connection_type = kind;
        if !kind.is_connected() {
            state.is_online = false;
            state.speed = ConnectionSpeed::Unknown;
            state.last_rtt_ms = None;
        }
    }

    /// Runs one reachability check and returns the updated snapshot.
    pub async fn check_now(&self) -> LinkSnapshot {
        let now = Utc::now();

        {
            let state = self.state.read().await;
            if !state.connection_type.is_connected() {
                drop(state);
                let mut state = self.state.write().await;
                state.is_online = false;
                state.speed = ConnectionSpeed::Unknown;
                state.last_rtt_ms = None;
                state.last_checked = Some(now);
                return state.snapshot();
            }
        }

        let result = tokio::time::timeout(self.probe_timeout, self.probe.probe()).await;

        let mut state = self.state.write().await;
        state.last_checked = Some(now);
        match result {
            Ok(Ok(rtt)) => {
                let rtt_ms = rtt.as_millis() as u64;
                let was_online = state.is_online;
                state.is_online = true;
                state.last_rtt_ms = Some(rtt_ms);
                state.speed = ConnectionSpeed::classify_rtt(rtt_ms);
                if !was_online {
                    info!(rtt_ms, speed = %state.speed, "Connection restored");
                }
            }
            Ok(Err(e)) => {
                if state.is_online {
                    warn!(error = %e, "Connection lost");
                }
                state.is_online = false;
                state.speed = ConnectionSpeed::Unknown;
                state.last_rtt_ms = None;
            }
            Err(_) => {
                if state.is_online {
                    warn!(
                        timeout_secs = self.probe_timeout.as_secs(),
                        "Reachability probe timed out"
                    );
                }
                state.is_online = false;
                state.speed = ConnectionSpeed::Unknown;
                state.last_rtt_ms = None;
            }
        }
        state.snapshot()
    }

    /// Current state without probing.
    pub async fn snapshot(&self) -> LinkSnapshot {
        self.state.read().await.snapshot()
    }

    /// Current online flag without probing.
    pub async fn is_online(&self) -> bool {
        self.state.read().await.is_online
    }

    /// Starts the background watcher.
    pub fn spawn_watcher(self: &Arc<Self>, poll_interval: Duration) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let monitor = Arc::clone(self);
        let task = tokio::spawn(watch_loop(monitor, poll_interval, shutdown_rx));
        WatcherHandle { shutdown_tx, task }
    }
}

/// Handle for stopping the background watcher.
pub struct WatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Signals the watcher to stop and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

async fn watch_loop(
    monitor: Arc<ConnectivityMonitor>,
    poll_interval: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    // While offline, re-probe faster than the steady-state interval,
    // doubling up to it. backoff::ExponentialBackoff never returns None
    // here because max_elapsed_time is disabled.
    let mut offline_backoff = ExponentialBackoff {
        initial_interval: poll_interval.min(Duration::from_secs(1)),
        max_interval: poll_interval,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    };

    debug!(poll_secs = poll_interval.as_secs(), "Connectivity watcher started");

    loop {
        let snapshot = monitor.check_now().await;

        let wait = if snapshot.is_online {
            offline_backoff.reset();
            poll_interval
        } else {
            offline_backoff.next_backoff().unwrap_or(poll_interval)
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown_rx.recv() => {
                debug!("Connectivity watcher shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with(probe: Arc<StaticProbe>) -> Arc<ConnectivityMonitor> {
        Arc::new(ConnectivityMonitor::new(probe, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_probe_success_classifies_speed() {
        let probe = Arc::new(StaticProbe::online(80));
        let monitor = monitor_with(probe.clone());
        monitor.set_connection(ConnectionType::Wifi).await;

        let snapshot = monitor.check_now().await;
        assert!(snapshot.is_online);
        assert_eq!(snapshot.speed, ConnectionSpeed::Fast);
        assert_eq!(snapshot.last_rtt_ms, Some(80));

        probe.set_rtt_ms(300);
        assert_eq!(monitor.check_now().await.speed, ConnectionSpeed::Medium);

        probe.set_rtt_ms(900);
        assert_eq!(monitor.check_now().await.speed, ConnectionSpeed::Slow);
    }

    #[tokio::test]
    async fn test_interface_down_skips_probe() {
        let probe = Arc::new(StaticProbe::online(10));
        let monitor = monitor_with(probe);
        monitor.set_connection(ConnectionType::None).await;

        let snapshot = monitor.check_now().await;
        assert!(!snapshot.is_online);
        assert_eq!(snapshot.connection_type, ConnectionType::None);
        assert_eq!(snapshot.speed, ConnectionSpeed::Unknown);
    }

    #[tokio::test]
    async fn test_probe_failure_and_recovery() {
        let probe = Arc::new(StaticProbe::online(50));
        let monitor = monitor_with(probe.clone());
        monitor.set_connection(ConnectionType::Cellular).await;

        assert!(monitor.check_now().await.is_online);

        probe.set_online(false);
        let snapshot = monitor.check_now().await;
        assert!(!snapshot.is_online);
        assert_eq!(snapshot.speed, ConnectionSpeed::Unknown);
        assert!(snapshot.last_rtt_ms.is_none());

        probe.set_online(true);
        assert!(monitor.check_now().await.is_online);
    }

    #[tokio::test]
    async fn test_switching_to_disconnected_type_goes_offline() {
        let probe = Arc::new(StaticProbe::online(50));
        let monitor = monitor_with(probe);
        monitor.set_connection(ConnectionType::Wifi).await;
        assert!(monitor.check_now().await.is_online);

        monitor.set_connection(ConnectionType::None).await;
        assert!(!monitor.is_online().await);
    }

    #[tokio::test]
    async fn test_watcher_tracks_probe_state() {
        let probe = Arc::new(StaticProbe::online(40));
        let monitor = monitor_with(probe.clone());
        monitor.set_connection(ConnectionType::Wifi).await;

        let handle = monitor.spawn_watcher(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(monitor.is_online().await);

        probe.set_online(false);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!monitor.is_online().await);

        probe.set_online(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(monitor.is_online().await);

        handle.shutdown().await;
    }
}
