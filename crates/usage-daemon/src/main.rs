//! Usage Daemon - headless usage quota monitor.
//!
//! Polls the usage endpoint through usage-core, logs every update and writes
//! threshold alerts to the log. Unix signals drive the monitor:
//! `SIGUSR1` refreshes now, `SIGUSR2` toggles between active and paused.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use signals::{SignalAction, Signals};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use usage_core::{FileCredentialStore, LogAlertSink, MonitorSettings, MonitorState, UsageMonitor};

#[derive(Parser, Debug)]
#[command(name = "usage-daemon")]
#[command(about = "Poll account usage quotas and log threshold alerts")]
struct Args {
    /// Seconds between refreshes (clamped to 30-600)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Disable alert delivery
    #[arg(long)]
    no_notify: bool,

    /// Alert when any window reaches this percentage
    #[arg(long)]
    critical_threshold: Option<u8>,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Don't probe the API host for reachability
    #[arg(long)]
    no_probe: bool,
}

impl Args {
    /// Apply command-line overrides on top of file settings.
    fn apply(&self, mut settings: MonitorSettings) -> MonitorSettings {
        if let Some(secs) = self.interval {
            settings.refresh_interval_secs = secs;
        }
        if let Some(threshold) = self.critical_threshold {
            settings.critical_threshold = threshold;
        }
        if self.no_notify {
            settings.notifications_enabled = false;
        }
        settings.normalized()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG overrides --debug
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting usage daemon v{}", env!("CARGO_PKG_VERSION"));

    let settings_path = match &args.settings {
        Some(path) => path.clone(),
        None => MonitorSettings::default_path()?,
    };
    let settings = MonitorSettings::load(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    let settings = args.apply(settings);

    info!(
        "Refreshing every {}s, critical at {}%, notifications {}",
        settings.refresh_interval_secs,
        settings.critical_threshold,
        if settings.notifications_enabled { "on" } else { "off" }
    );

    let monitor = UsageMonitor::builder()
        .settings(settings)
        .credential_store(Arc::new(FileCredentialStore::new()))
        .alert_sink(Arc::new(LogAlertSink))
        .with_reachability_probe(!args.no_probe)
        .start()?;

    let mut updates = monitor.subscribe();
    let mut signals = Signals::new()?;
    let mut active = true;
    let mut last_logged: Option<String> = None;

    loop {
        tokio::select! {
            action = signals.next() => match action {
                SignalAction::Shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                SignalAction::Refresh => {
                    info!("Manual refresh requested");
                    monitor.refresh().await?;
                }
                SignalAction::ToggleActive => {
                    active = !active;
                    monitor.set_active(active).await?;
                }
            },
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Usage controller stopped unexpectedly");
                    break;
                }
                let line = describe(&updates.borrow_and_update());
                if last_logged.as_deref() != Some(line.as_str()) {
                    info!("{}", line);
                    last_logged = Some(line);
                }
            }
        }
    }

    monitor.shutdown().await?;
    info!("Usage daemon stopped");
    Ok(())
}

/// One-line summary of the published state.
fn describe(state: &MonitorState) -> String {
    if state.is_loading {
        return "Refreshing...".to_string();
    }

    let mut line = match &state.snapshot {
        None => "No usage data yet".to_string(),
        Some(_) => state
            .metrics
            .iter()
            .map(|m| format!("{} {}% ({}, resets in {})", m.name, m.percentage, m.status, m.remaining_time))
            .collect::<Vec<_>>()
            .join(" | "),
    };

    if let Some(error) = &state.last_error {
        line.push_str(&format!(" | last error: {}", error));
    }
    if state.retry_pending {
        line.push_str(&format!(" | retry {} pending", state.retry_count));
    }
    if !state.active {
        line.push_str(" | paused");
    }
    line
}
