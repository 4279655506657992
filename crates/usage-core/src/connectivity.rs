//! Network reachability tracking.
//!
//! Provides:
//! - [`NetworkWatcher`]: turns a stream of reachability readings into
//!   recovery events (unavailable -> available)
//! - [`ReachabilityProbe`]: optional background producer that HEADs the API
//!   host and reports transitions on a channel

use crate::config::ConnectivityConfig;
use crate::error::{Result, UsageError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
    /// Initial state before the first reading.
    Unknown,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "online"),
            ConnectivityState::Offline => write!(f, "offline"),
            ConnectivityState::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<bool> for ConnectivityState {
    fn from(available: bool) -> Self {
        if available {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }
}

/// Detects recovery transitions from reachability readings.
#[derive(Debug, Clone)]
pub struct NetworkWatcher {
    state: ConnectivityState,
}

impl NetworkWatcher {
    pub fn new() -> Self {
        Self {
            state: ConnectivityState::Unknown,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Record a reading. Returns true only for an offline -> online transition.
    pub fn observe(&mut self, available: bool) -> bool {
        let next = ConnectivityState::from(available);
        let previous = std::mem::replace(&mut self.state, next);

        match (previous, next) {
            (ConnectivityState::Offline, ConnectivityState::Online) => {
                info!("Network connectivity restored");
                true
            }
            (ConnectivityState::Online | ConnectivityState::Unknown, ConnectivityState::Offline) => {
                warn!("Network connectivity lost");
                false
            }
            (prev, next) => {
                debug!("Connectivity reading {} (was {})", next, prev);
                false
            }
        }
    }
}

impl Default for NetworkWatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task probing the API host for reachability.
pub struct ReachabilityProbe {
    shutdown_tx: watch::Sender<bool>,
    task_handle: Option<JoinHandle<()>>,
}

impl ReachabilityProbe {
    /// Start probing `url` every `interval`, sending each transition to `tx`.
    pub fn start(url: &str, interval: Duration, tx: mpsc::Sender<bool>) -> Result<Self> {
        url::Url::parse(url).map_err(|e| UsageError::Config {
            message: format!("Invalid probe URL {}: {}", url, e),
        })?;

        let client = reqwest::Client::builder()
            .timeout(ConnectivityConfig::PROBE_TIMEOUT)
            .build()
            .map_err(|e| UsageError::Http {
                message: format!("Failed to create probe client: {}", e),
                source: Some(e),
            })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let url = url.to_string();
        let task_handle = tokio::spawn(Self::probe_loop(client, url, interval, tx, shutdown_rx));

        Ok(Self {
            shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    /// Start probing the default API host.
    pub fn start_default(tx: mpsc::Sender<bool>) -> Result<Self> {
        Self::start(
            ConnectivityConfig::PROBE_URL,
            ConnectivityConfig::PROBE_INTERVAL,
            tx,
        )
    }

    /// Stop the probe and wait for its task to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
        debug!("Reachability probe stopped");
    }

    async fn probe_loop(
        client: reqwest::Client,
        url: String,
        interval: Duration,
        tx: mpsc::Sender<bool>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut last: Option<bool> = None;
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    let available = probe_url(&client, &url).await;
                    if last != Some(available) {
                        last = Some(available);
                        if tx.send(available).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl Drop for ReachabilityProbe {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// HEAD the URL. Any HTTP response, even an error status, means the network works.
async fn probe_url(client: &reqwest::Client, url: &str) -> bool {
    match client.head(url).send().await {
        Ok(resp) => {
            debug!("Probe {} answered {}", url, resp.status());
            true
        }
        Err(e) => {
            debug!("Probe request failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_only_from_offline() {
        let mut watcher = NetworkWatcher::new();
        assert_eq!(watcher.state(), ConnectivityState::Unknown);

        // Unknown -> online is the startup reading, not a recovery.
        assert!(!watcher.observe(true));
        assert!(!watcher.observe(true));
        assert!(!watcher.observe(false));
        assert!(!watcher.observe(false));
        assert!(watcher.observe(true));
        assert!(!watcher.observe(true));
        assert_eq!(watcher.state(), ConnectivityState::Online);
    }

    #[test]
    fn test_unknown_to_offline_then_online_recovers() {
        let mut watcher = NetworkWatcher::new();
        assert!(!watcher.observe(false));
        assert!(watcher.observe(true));
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectivityState::Online.to_string(), "online");
        assert_eq!(ConnectivityState::Offline.to_string(), "offline");
        assert_eq!(ConnectivityState::Unknown.to_string(), "unknown");
    }

    #[tokio::test]
    async fn test_probe_rejects_invalid_url() {
        let (tx, _rx) = mpsc::channel(1);
        let result = ReachabilityProbe::start("::nope::", Duration::from_secs(1), tx);
        assert!(matches!(result, Err(UsageError::Config { .. })));
    }

    #[tokio::test]
    async fn test_probe_reports_unreachable_host() {
        // Port 9 on localhost (discard) is expected to refuse connections.
        let (tx, mut rx) = mpsc::channel(4);
        let probe = ReachabilityProbe::start("http://127.0.0.1:9", Duration::from_secs(60), tx).unwrap();

        let reading = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert_eq!(reading.ok().flatten(), Some(false));
        probe.stop().await;
    }
}
