//! Centralized configuration for the usage monitor.
//!
//! Compile-time constants are grouped by concern in unit structs. Runtime
//! preferences that the host application owns (refresh cadence, alert toggle,
//! thresholds) live in [`MonitorSettings`].

use crate::error::{Result, UsageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "usage-monitor";
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
    pub const CONFIG_DIR_NAME: &'static str = "usage-monitor";
    pub const SETTINGS_FILENAME: &'static str = "settings.json";

    /// `User-Agent` header value, `<app-name>/<version>`.
    pub fn user_agent() -> String {
        format!("{}/{}", Self::APP_NAME, Self::VERSION)
    }
}

/// Usage API endpoint and request shape.
pub struct ApiConfig;

impl ApiConfig {
    pub const USAGE_ENDPOINT: &'static str = "https://api.anthropic.com/api/oauth/usage";
    pub const BETA_HEADER_NAME: &'static str = "anthropic-beta";
    pub const BETA_HEADER_VALUE: &'static str = "oauth-2025-04-20";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Alert and status thresholds, in whole percent.
pub struct ThresholdConfig;

impl ThresholdConfig {
    pub const CRITICAL: u8 = 90;
    pub const WARNING: u8 = 70;
    /// Additional increase that re-raises a critical alert.
    pub const REALERT_STEP: u8 = 5;
}

/// Periodic refresh bounds.
pub struct SchedulerConfig;

impl SchedulerConfig {
    pub const MIN_INTERVAL: Duration = Duration::from_secs(30);
    pub const MAX_INTERVAL: Duration = Duration::from_secs(600);
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
    /// Capacity of the controller command channel.
    pub const COMMAND_BUFFER: usize = 64;
}

/// Reachability probing.
pub struct ConnectivityConfig;

impl ConnectivityConfig {
    pub const PROBE_URL: &'static str = "https://api.anthropic.com";
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const PROBE_INTERVAL: Duration = Duration::from_secs(15);
}

/// Runtime settings supplied by the host application.
///
/// All values are clamped by [`MonitorSettings::normalized`] so the
/// controller never sees an interval outside the scheduler bounds or a
/// warning threshold above the critical one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MonitorSettings {
    /// Seconds between scheduled refreshes.
    pub refresh_interval_secs: u64,
    /// Whether alert events are delivered to the alert sink.
    pub notifications_enabled: bool,
    pub critical_threshold: u8,
    pub warning_threshold: u8,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: SchedulerConfig::DEFAULT_INTERVAL.as_secs(),
            notifications_enabled: true,
            critical_threshold: ThresholdConfig::CRITICAL,
            warning_threshold: ThresholdConfig::WARNING,
        }
    }
}

impl MonitorSettings {
    /// Default settings file: `<config dir>/usage-monitor/settings.json`.
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| UsageError::Config {
            message: "Could not determine user config directory".to_string(),
        })?;
        Ok(base
            .join(AppConfig::CONFIG_DIR_NAME)
            .join(AppConfig::SETTINGS_FILENAME))
    }

    /// Load settings from a JSON file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(UsageError::io_with_path(e, path)),
        };

        let settings: Self = serde_json::from_str(&content)?;
        Ok(settings.normalized())
    }

    /// Clamp every value into its supported range.
    pub fn normalized(mut self) -> Self {
        let secs = self.refresh_interval_secs.clamp(
            SchedulerConfig::MIN_INTERVAL.as_secs(),
            SchedulerConfig::MAX_INTERVAL.as_secs(),
        );
        if secs != self.refresh_interval_secs {
            warn!(
                "Refresh interval {}s out of range, clamped to {}s",
                self.refresh_interval_secs, secs
            );
            self.refresh_interval_secs = secs;
        }

        self.critical_threshold = self.critical_threshold.clamp(1, 100);
        if self.warning_threshold >= self.critical_threshold {
            self.warning_threshold = self.critical_threshold.saturating_sub(1);
        }
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        clamp_interval(Duration::from_secs(self.refresh_interval_secs))
    }
}

/// Clamp a refresh interval into the scheduler bounds.
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(SchedulerConfig::MIN_INTERVAL, SchedulerConfig::MAX_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_user_agent_format() {
        let ua = AppConfig::user_agent();
        assert!(ua.starts_with("usage-monitor/"));
        assert_eq!(ua, format!("usage-monitor/{}", env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_defaults() {
        let settings = MonitorSettings::default();
        assert_eq!(settings.refresh_interval_secs, 60);
        assert!(settings.notifications_enabled);
        assert_eq!(settings.critical_threshold, 90);
        assert_eq!(settings.warning_threshold, 70);
    }

    #[test]
    fn test_interval_clamped() {
        let settings = MonitorSettings {
            refresh_interval_secs: 5,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.refresh_interval_secs, 30);

        let settings = MonitorSettings {
            refresh_interval_secs: 3600,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.refresh_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_warning_kept_below_critical() {
        let settings = MonitorSettings {
            critical_threshold: 80,
            warning_threshold: 85,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.critical_threshold, 80);
        assert_eq!(settings.warning_threshold, 79);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = MonitorSettings::load(temp.path().join("nope.json")).unwrap();
        assert_eq!(settings, MonitorSettings::default());
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"refresh_interval_secs": 120, "notifications_enabled": false}"#,
        )
        .unwrap();

        let settings = MonitorSettings::load(&path).unwrap();
        assert_eq!(settings.refresh_interval_secs, 120);
        assert!(!settings.notifications_enabled);
        assert_eq!(settings.critical_threshold, ThresholdConfig::CRITICAL);
    }

    #[test]
    fn test_load_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = MonitorSettings::load(&path);
        assert!(matches!(result, Err(UsageError::Json { .. })));
    }
}
