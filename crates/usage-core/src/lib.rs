//! Usage Core - Headless engine for polling account usage quotas.
//!
//! This crate keeps a fresh view of how much of each rolling usage window has
//! been consumed. It fetches the usage endpoint periodically and on demand,
//! retries transient failures with exponential backoff, re-reads credentials
//! once when they are rejected, derives display metrics and raises threshold
//! alerts with hysteresis. Rendering is left to the host.
//!
//! # Example
//!
//! ```rust,ignore
//! use usage_core::UsageMonitor;
//!
//! #[tokio::main]
//! async fn main() -> usage_core::Result<()> {
//!     let monitor = UsageMonitor::builder().start()?;
//!
//!     let mut updates = monitor.subscribe();
//!     while updates.changed().await.is_ok() {
//!         let state = updates.borrow().clone();
//!         println!("{} at {}%", state.max_metric.name, state.max_metric.percentage);
//!     }
//!
//!     monitor.shutdown().await
//! }
//! ```

pub mod cancel;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod notification;
pub mod retry;

// Re-export commonly used types
pub use client::{DynUsageSource, UsageClient, UsageSource};
pub use config::MonitorSettings;
pub use connectivity::{ConnectivityState, NetworkWatcher, ReachabilityProbe};
pub use controller::{FetchState, MonitorState, RefreshTrigger};
pub use credentials::{
    CredentialCache, CredentialStore, DynCredentialStore, FileCredentialStore,
    MemoryCredentialStore,
};
pub use error::{FetchError, Result, UsageError};
pub use metrics::{DerivedMetricsCache, DisplayMetric, MetricStatus, StatusThresholds};
pub use models::{UsageLimit, UsageSnapshot, UsageWindow};
pub use monitor::{UsageMonitor, UsageMonitorBuilder};
pub use notification::{
    Alert, AlertEvent, AlertSink, DynAlertSink, InterruptionLevel, LogAlertSink,
    NotificationPolicy, NotificationState,
};
pub use retry::{RetryDecision, RetryPolicy, RetryScheduler};
