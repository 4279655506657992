//! The fetch controller: single owner of all mutable monitor state.
//!
//! Every signal source (periodic timer, manual trigger, network recovery,
//! activation changes) sends a message into one serialized loop. Nothing
//! outside the loop touches [`FetchState`], the retry scheduler, the
//! notification policy or the derived metrics cache.
//!
//! # In-flight requests
//!
//! At most one request chain (first attempt plus the optional re-attempt
//! after a 401) is in flight. A refresh requested while loading never
//! cancels the in-flight request. Manual and network-recovery requests still
//! reset the retry chain immediately and queue exactly one follow-up fetch;
//! timer, activation and retry requests that arrive while loading are
//! dropped because the in-flight fetch supersedes them.

use crate::client::DynUsageSource;
use crate::config::clamp_interval;
use crate::connectivity::{ConnectivityState, NetworkWatcher};
use crate::credentials::CredentialCache;
use crate::error::FetchError;
use crate::metrics::{DerivedMetricsCache, DisplayMetric};
use crate::models::UsageSnapshot;
use crate::notification::{Alert, DynAlertSink, NotificationPolicy, NotificationState};
use crate::retry::{RetryDecision, RetryFired, RetryScheduler};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    /// User-initiated.
    Manual,
    Timer,
    /// Deferred backoff retry.
    Retry,
    /// Network came back after being unavailable.
    NetworkRecovery,
    /// Host became active again.
    Activation,
    /// First fetch after the controller starts.
    Startup,
}

impl RefreshTrigger {
    /// Manual and recovery refreshes cancel the pending retry and restart the chain.
    pub fn resets_retry_chain(&self) -> bool {
        matches!(self, RefreshTrigger::Manual | RefreshTrigger::NetworkRecovery)
    }
}

impl std::fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RefreshTrigger::Manual => "manual",
            RefreshTrigger::Timer => "timer",
            RefreshTrigger::Retry => "retry",
            RefreshTrigger::NetworkRecovery => "network recovery",
            RefreshTrigger::Activation => "activation",
            RefreshTrigger::Startup => "startup",
        };
        write!(f, "{}", label)
    }
}

/// The single mutable record of fetch results.
#[derive(Debug, Clone, Default)]
pub struct FetchState {
    pub snapshot: Option<Arc<UsageSnapshot>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<FetchError>,
    pub is_loading: bool,
}

/// Read-only view published after every state change.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorState {
    pub snapshot: Option<Arc<UsageSnapshot>>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_error")]
    pub last_error: Option<FetchError>,
    pub is_loading: bool,
    pub retry_count: u32,
    pub retry_pending: bool,
    pub active: bool,
    pub refresh_interval_secs: u64,
    #[serde(serialize_with = "serialize_connectivity")]
    pub connectivity: ConnectivityState,
    pub notification: NotificationState,
    pub metrics: Arc<Vec<DisplayMetric>>,
    pub max_metric: DisplayMetric,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            snapshot: None,
            last_updated: None,
            last_error: None,
            is_loading: false,
            retry_count: 0,
            retry_pending: false,
            active: false,
            refresh_interval_secs: 0,
            connectivity: ConnectivityState::Unknown,
            notification: NotificationState::default(),
            metrics: Arc::new(Vec::new()),
            max_metric: DisplayMetric::unknown(),
        }
    }
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<FetchError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

fn serialize_connectivity<S: serde::Serializer>(
    state: &ConnectivityState,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&state.to_string())
}

/// Messages accepted by the controller loop.
#[derive(Debug)]
pub(crate) enum Command {
    Refresh(RefreshTrigger),
    SetActive(bool),
    SetInterval(Duration),
    SetNotificationsEnabled(bool),
    /// Reachability reading reported by the host.
    NetworkReading(bool),
    GetState(oneshot::Sender<MonitorState>),
    GetMetrics(oneshot::Sender<Arc<Vec<DisplayMetric>>>),
    GetMaxMetric(oneshot::Sender<DisplayMetric>),
    Shutdown(oneshot::Sender<()>),
}

/// Which request of a chain just finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    /// Re-attempt with a freshly loaded credential after a 401.
    CredentialRetry,
}

#[derive(Debug)]
struct FetchCompleted {
    attempt: Attempt,
    result: std::result::Result<UsageSnapshot, FetchError>,
}

/// Collaborators and initial settings for a controller.
pub(crate) struct ControllerParts {
    pub source: DynUsageSource,
    pub credentials: CredentialCache,
    pub alert_sink: DynAlertSink,
    pub metrics: DerivedMetricsCache,
    pub notifications: NotificationPolicy,
    pub notifications_enabled: bool,
    pub refresh_interval: Duration,
    pub active: bool,
}

/// Channels the controller reads from.
pub(crate) struct ControllerInbox {
    pub commands: mpsc::Receiver<Command>,
    pub reachability: mpsc::Receiver<bool>,
    pub retry_fired: mpsc::Receiver<RetryFired>,
}

pub(crate) struct FetchController {
    source: DynUsageSource,
    credentials: CredentialCache,
    alert_sink: DynAlertSink,
    metrics: DerivedMetricsCache,
    notifications: NotificationPolicy,
    notifications_enabled: bool,
    retry: RetryScheduler,
    network: NetworkWatcher,

    state: FetchState,
    in_flight: Option<JoinHandle<()>>,
    follow_up: bool,
    active: bool,
    refresh_interval: Duration,
    timer: Option<Interval>,

    inbox: ControllerInbox,
    fetch_tx: mpsc::Sender<FetchCompleted>,
    fetch_rx: mpsc::Receiver<FetchCompleted>,
    state_tx: watch::Sender<MonitorState>,
}

impl FetchController {
    pub(crate) fn new(
        parts: ControllerParts,
        retry: RetryScheduler,
        inbox: ControllerInbox,
        state_tx: watch::Sender<MonitorState>,
    ) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::channel(4);
        Self {
            source: parts.source,
            credentials: parts.credentials,
            alert_sink: parts.alert_sink,
            metrics: parts.metrics,
            notifications: parts.notifications,
            notifications_enabled: parts.notifications_enabled,
            retry,
            network: NetworkWatcher::new(),
            state: FetchState::default(),
            in_flight: None,
            follow_up: false,
            active: parts.active,
            refresh_interval: clamp_interval(parts.refresh_interval),
            timer: None,
            inbox,
            fetch_tx,
            fetch_rx,
            state_tx,
        }
    }

    /// Run until a shutdown command arrives or every handle is dropped.
    pub(crate) async fn run(mut self) {
        info!(
            "Usage controller started (interval {:?}, active: {})",
            self.refresh_interval, self.active
        );

        if self.active {
            self.timer = Some(self.new_timer());
            self.refresh(RefreshTrigger::Startup);
        } else {
            self.publish();
        }

        let shutdown_ack = loop {
            tokio::select! {
                command = self.inbox.commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => break Some(ack),
                    Some(command) => self.handle_command(command),
                    None => break None,
                },
                Some(done) = self.fetch_rx.recv() => self.on_fetch_completed(done),
                Some(fired) = self.inbox.retry_fired.recv() => self.on_retry_fired(fired),
                Some(available) = self.inbox.reachability.recv() => self.on_reachability(available),
                _ = next_tick(&mut self.timer) => self.refresh(RefreshTrigger::Timer),
            }
        };

        self.stop();
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Refresh(trigger) => self.refresh(trigger),
            Command::SetActive(active) => self.set_active(active),
            Command::SetInterval(interval) => self.set_interval(interval),
            Command::SetNotificationsEnabled(enabled) => {
                info!("Notifications {}", if enabled { "enabled" } else { "disabled" });
                self.notifications_enabled = enabled;
            }
            Command::NetworkReading(available) => self.on_reachability(available),
            Command::GetState(reply) => {
                let _ = reply.send(self.snapshot_state());
            }
            Command::GetMetrics(reply) => {
                let metrics = self
                    .metrics
                    .all_metrics(self.state.snapshot.as_deref(), Utc::now());
                let _ = reply.send(metrics);
            }
            Command::GetMaxMetric(reply) => {
                let max = self
                    .metrics
                    .max_metric(self.state.snapshot.as_deref(), Utc::now());
                let _ = reply.send(max);
            }
            Command::Shutdown(_) => debug!("Shutdown is handled by the run loop"),
        }
    }

    // === Refresh ===

    fn refresh(&mut self, trigger: RefreshTrigger) {
        if trigger.resets_retry_chain() {
            self.retry.reset();
        }

        if self.state.is_loading {
            if trigger.resets_retry_chain() {
                debug!("Refresh ({}) queued behind in-flight request", trigger);
                self.follow_up = true;
            } else {
                debug!("Refresh ({}) dropped, request already in flight", trigger);
            }
            self.publish();
            return;
        }

        info!("Refreshing usage ({})", trigger);
        self.state.is_loading = true;
        self.publish();

        match self.credentials.token() {
            Some(token) => self.spawn_fetch(token, Attempt::First),
            None => {
                self.fail(FetchError::Unauthorized);
                self.finish_flight();
            }
        }
    }

    fn spawn_fetch(&mut self, token: String, attempt: Attempt) {
        let source = Arc::clone(&self.source);
        let tx = self.fetch_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = source.fetch_usage(&token).await;
            let _ = tx.send(FetchCompleted { attempt, result }).await;
        }));
    }

    fn on_fetch_completed(&mut self, done: FetchCompleted) {
        self.in_flight = None;
        match (done.attempt, done.result) {
            (_, Ok(snapshot)) => self.commit(snapshot),
            (Attempt::First, Err(FetchError::Unauthorized)) => {
                warn!("Credential rejected, reloading and retrying once");
                self.credentials.invalidate();
                match self.credentials.reload() {
                    Some(token) => {
                        self.spawn_fetch(token, Attempt::CredentialRetry);
                        return;
                    }
                    None => self.fail(FetchError::Unauthorized),
                }
            }
            (Attempt::CredentialRetry, Err(FetchError::Unauthorized)) => {
                // The reloaded credential was rejected too; never send it again.
                self.credentials.invalidate();
                self.fail(FetchError::Unauthorized);
            }
            (_, Err(e)) => self.fail(e),
        }
        self.finish_flight();
    }

    fn finish_flight(&mut self) {
        self.state.is_loading = false;
        self.publish();

        if std::mem::take(&mut self.follow_up) {
            self.refresh(RefreshTrigger::Manual);
        }
    }

    fn commit(&mut self, snapshot: UsageSnapshot) {
        let now = Utc::now();
        self.state.snapshot = Some(Arc::new(snapshot));
        self.state.last_updated = Some(now);
        self.state.last_error = None;
        self.retry.reset();
        self.metrics.invalidate();

        let max = self.metrics.max_metric(self.state.snapshot.as_deref(), now);
        info!("Usage updated: max {} at {}% ({})", max.name, max.percentage, max.status);

        if let Some(event) = self.notifications.on_snapshot_committed(&max) {
            if self.notifications_enabled {
                let alert = Alert::from_event(&event);
                info!("Raising alert {}: {}", alert.id, alert.title);
                self.alert_sink.display(&alert);
            } else {
                debug!("Alert for {}% suppressed, notifications disabled", event.percentage);
            }
        }
    }

    fn fail(&mut self, error: FetchError) {
        match self.retry.maybe_schedule(&error) {
            RetryDecision::Scheduled { attempt, delay } => {
                debug!("Retry {} scheduled in {:?}", attempt, delay);
            }
            RetryDecision::Exhausted => {
                error!("Usage refresh failed after retries: {}", error);
            }
            RetryDecision::NotRetryable => {
                error!("Usage refresh failed: {}", error);
            }
        }
        self.state.last_error = Some(error);
    }

    // === Signals ===

    fn on_retry_fired(&mut self, fired: RetryFired) {
        if self.retry.accept(fired) {
            self.refresh(RefreshTrigger::Retry);
        } else {
            self.publish();
        }
    }

    fn on_reachability(&mut self, available: bool) {
        if self.network.observe(available) {
            self.refresh(RefreshTrigger::NetworkRecovery);
        } else {
            self.publish();
        }
    }

    fn set_active(&mut self, active: bool) {
        if active == self.active {
            return;
        }
        self.active = active;

        if active {
            info!("Host active, resuming periodic refresh");
            self.timer = Some(self.new_timer());
            self.refresh(RefreshTrigger::Activation);
        } else {
            info!("Host inactive, pausing periodic refresh");
            self.timer = None;
            self.publish();
        }
    }

    fn set_interval(&mut self, interval: Duration) {
        let interval = clamp_interval(interval);
        if interval == self.refresh_interval {
            return;
        }
        info!("Refresh interval changed to {:?}", interval);
        self.refresh_interval = interval;
        if self.active {
            self.timer = Some(self.new_timer());
        }
        self.publish();
    }

    fn new_timer(&self) -> Interval {
        let mut timer =
            tokio::time::interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    fn stop(&mut self) {
        info!("Usage controller stopping");
        self.timer = None;
        self.retry.reset();
        if let Some(fetch) = self.in_flight.take() {
            fetch.abort();
            debug!("Aborted in-flight usage request");
        }
        self.state.is_loading = false;
        self.follow_up = false;
        self.active = false;
        self.publish();
    }

    // === State publication ===

    fn snapshot_state(&mut self) -> MonitorState {
        let now = Utc::now();
        let snapshot = self.state.snapshot.clone();
        let metrics = self.metrics.all_metrics(snapshot.as_deref(), now);
        let max_metric = self.metrics.max_metric(snapshot.as_deref(), now);

        MonitorState {
            snapshot,
            last_updated: self.state.last_updated,
            last_error: self.state.last_error.clone(),
            is_loading: self.state.is_loading,
            retry_count: self.retry.count(),
            retry_pending: self.retry.has_pending(),
            active: self.active,
            refresh_interval_secs: self.refresh_interval.as_secs(),
            connectivity: self.network.state(),
            notification: self.notifications.state(),
            metrics,
            max_metric,
        }
    }

    fn publish(&mut self) {
        let state = self.snapshot_state();
        self.state_tx.send_replace(state);
    }
}

impl Drop for FetchController {
    fn drop(&mut self) {
        if let Some(fetch) = self.in_flight.take() {
            fetch.abort();
        }
    }
}

/// Resolve on the next timer tick, or never while the timer is paused.
async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
