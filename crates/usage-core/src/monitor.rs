//! Public handle to a running usage monitor.
//!
//! [`UsageMonitor`] is a cheap front for the controller task: every method
//! sends a message and, for queries, awaits the reply. State changes are also
//! published on a watch channel for hosts that render continuously.

use crate::client::{DynUsageSource, UsageClient};
use crate::config::{MonitorSettings, SchedulerConfig};
use crate::connectivity::ReachabilityProbe;
use crate::controller::{
    Command, ControllerInbox, ControllerParts, FetchController, MonitorState, RefreshTrigger,
};
use crate::credentials::{CredentialCache, DynCredentialStore, FileCredentialStore};
use crate::error::Result;
use crate::metrics::{DerivedMetricsCache, DisplayMetric, StatusThresholds};
use crate::notification::{DynAlertSink, LogAlertSink, NotificationPolicy};
use crate::retry::{RetryPolicy, RetryScheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for configuring a [`UsageMonitor`].
///
/// # Example
///
/// ```rust,ignore
/// use usage_core::{MonitorSettings, UsageMonitor};
///
/// let monitor = UsageMonitor::builder()
///     .settings(MonitorSettings::load(MonitorSettings::default_path()?)?)
///     .with_reachability_probe(true)
///     .start()?;
///
/// monitor.refresh().await?;
/// let max = monitor.max_metric().await?;
/// println!("{} at {}%", max.name, max.percentage);
/// ```
pub struct UsageMonitorBuilder {
    settings: MonitorSettings,
    source: Option<DynUsageSource>,
    credential_store: Option<DynCredentialStore>,
    alert_sink: Option<DynAlertSink>,
    retry_policy: RetryPolicy,
    probe: bool,
    start_active: bool,
}

impl UsageMonitorBuilder {
    pub fn new() -> Self {
        Self {
            settings: MonitorSettings::default(),
            source: None,
            credential_store: None,
            alert_sink: None,
            retry_policy: RetryPolicy::default(),
            probe: false,
            start_active: true,
        }
    }

    /// Interval, thresholds and notification toggle.
    pub fn settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings.normalized();
        self
    }

    /// Usage source to fetch from.
    ///
    /// Default: [`UsageClient`] against the production endpoint.
    pub fn source(mut self, source: DynUsageSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Default: [`FileCredentialStore`].
    pub fn credential_store(mut self, store: DynCredentialStore) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Default: [`LogAlertSink`].
    pub fn alert_sink(mut self, sink: DynAlertSink) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Probe the API host in the background and feed reachability readings
    /// to the controller.
    ///
    /// Default: `false` (the host reports reachability itself)
    pub fn with_reachability_probe(mut self, enable: bool) -> Self {
        self.probe = enable;
        self
    }

    /// Whether the monitor starts active, with an immediate fetch and the
    /// periodic timer running.
    ///
    /// Default: `true`
    pub fn start_active(mut self, active: bool) -> Self {
        self.start_active = active;
        self
    }

    /// Spawn the controller task. Must be called within a tokio runtime.
    pub fn start(self) -> Result<UsageMonitor> {
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(UsageClient::new()?),
        };
        let store = self
            .credential_store
            .unwrap_or_else(|| Arc::new(FileCredentialStore::new()));
        let alert_sink = self.alert_sink.unwrap_or_else(|| Arc::new(LogAlertSink));

        let (command_tx, command_rx) = mpsc::channel(SchedulerConfig::COMMAND_BUFFER);
        let (reachability_tx, reachability_rx) = mpsc::channel(SchedulerConfig::COMMAND_BUFFER);
        let (fired_tx, fired_rx) = mpsc::channel(4);
        let (state_tx, state_rx) = watch::channel(MonitorState::default());

        let probe = if self.probe {
            Some(ReachabilityProbe::start_default(reachability_tx)?)
        } else {
            None
        };

        let parts = ControllerParts {
            source,
            credentials: CredentialCache::new(store),
            alert_sink,
            metrics: DerivedMetricsCache::new(StatusThresholds {
                warning: self.settings.warning_threshold,
                critical: self.settings.critical_threshold,
            }),
            notifications: NotificationPolicy::new(self.settings.critical_threshold),
            notifications_enabled: self.settings.notifications_enabled,
            refresh_interval: self.settings.refresh_interval(),
            active: self.start_active,
        };
        let inbox = ControllerInbox {
            commands: command_rx,
            reachability: reachability_rx,
            retry_fired: fired_rx,
        };

        let controller = FetchController::new(
            parts,
            RetryScheduler::new(self.retry_policy, fired_tx),
            inbox,
            state_tx,
        );
        let task = tokio::spawn(controller.run());

        Ok(UsageMonitor {
            commands: command_tx,
            state_rx,
            probe,
            task: Some(task),
        })
    }
}

impl Default for UsageMonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running usage monitor.
///
/// Dropping the handle aborts the controller; call [`UsageMonitor::shutdown`]
/// for an orderly stop.
pub struct UsageMonitor {
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<MonitorState>,
    probe: Option<ReachabilityProbe>,
    task: Option<JoinHandle<()>>,
}

impl UsageMonitor {
    pub fn builder() -> UsageMonitorBuilder {
        UsageMonitorBuilder::new()
    }

    // === Triggers ===

    /// User-initiated refresh. Resets the retry chain.
    pub async fn refresh(&self) -> Result<()> {
        self.send(Command::Refresh(RefreshTrigger::Manual)).await
    }

    /// Host lifecycle signal. Inactive pauses the periodic timer; becoming
    /// active again resumes it with an immediate refresh.
    pub async fn set_active(&self, active: bool) -> Result<()> {
        self.send(Command::SetActive(active)).await
    }

    /// Report a reachability reading. An unavailable -> available transition
    /// triggers one refresh.
    pub async fn set_network_available(&self, available: bool) -> Result<()> {
        self.send(Command::NetworkReading(available)).await
    }

    /// Change the periodic interval (clamped to the supported range). Takes
    /// effect from now; no refresh is triggered.
    pub async fn set_refresh_interval(&self, interval: Duration) -> Result<()> {
        self.send(Command::SetInterval(interval)).await
    }

    /// Enable or disable alert delivery. Hysteresis keeps tracking either way.
    pub async fn set_notifications_enabled(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetNotificationsEnabled(enabled)).await
    }

    // === Queries ===

    pub async fn state(&self) -> Result<MonitorState> {
        self.query(Command::GetState).await
    }

    /// Display metrics for the current snapshot, memoized per commit.
    pub async fn all_metrics(&self) -> Result<Arc<Vec<DisplayMetric>>> {
        self.query(Command::GetMetrics).await
    }

    /// Highest-percentage metric, or the "Unknown" placeholder.
    pub async fn max_metric(&self) -> Result<DisplayMetric> {
        self.query(Command::GetMaxMetric).await
    }

    /// Receiver that observes every published state change.
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state_rx.clone()
    }

    /// Last published state without a round trip to the controller.
    pub fn current(&self) -> MonitorState {
        self.state_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the probe, the timer and any pending retry, then wait for the
    /// controller to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down usage monitor");

        if let Some(probe) = self.probe.take() {
            probe.stop().await;
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack_tx)).await.is_ok() {
            if ack_rx.await.is_err() {
                warn!("Controller exited before acknowledging shutdown");
            }
        } else {
            debug!("Controller already stopped");
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Controller task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await?;
        Ok(())
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        Ok(reply_rx.await?)
    }
}

impl Drop for UsageMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
