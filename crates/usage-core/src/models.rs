//! Usage data types decoded from the usage endpoint.
//!
//! The endpoint reports one optional limit per quota window. Field names are
//! accepted in camelCase (`fiveHour`, `resetsAt`) and snake_case
//! (`five_hour`, `resets_at`); unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Utilization of a single quota window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLimit {
    /// Percentage of the window's quota consumed (0-100, may be fractional).
    pub utilization: f64,
    /// When the window resets, if the server reported it.
    #[serde(default, alias = "resets_at")]
    pub resets_at: Option<DateTime<Utc>>,
}

impl UsageLimit {
    pub fn new(utilization: f64, resets_at: Option<DateTime<Utc>>) -> Self {
        Self {
            utilization,
            resets_at,
        }
    }
}

/// One complete usage payload from a single successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    #[serde(default, alias = "five_hour")]
    pub five_hour: Option<UsageLimit>,
    #[serde(default, alias = "seven_day")]
    pub seven_day: Option<UsageLimit>,
    #[serde(default, alias = "seven_day_opus")]
    pub seven_day_opus: Option<UsageLimit>,
    #[serde(default, alias = "seven_day_sonnet")]
    pub seven_day_sonnet: Option<UsageLimit>,
}

impl UsageSnapshot {
    /// Decode a snapshot from a response body.
    pub fn from_json(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    /// Present limits in display order: five-hour, seven-day, Opus, Sonnet.
    pub fn limits(&self) -> Vec<(UsageWindow, &UsageLimit)> {
        UsageWindow::ALL
            .iter()
            .filter_map(|window| self.limit(*window).map(|limit| (*window, limit)))
            .collect()
    }

    pub fn limit(&self, window: UsageWindow) -> Option<&UsageLimit> {
        match window {
            UsageWindow::FiveHour => self.five_hour.as_ref(),
            UsageWindow::SevenDay => self.seven_day.as_ref(),
            UsageWindow::SevenDayOpus => self.seven_day_opus.as_ref(),
            UsageWindow::SevenDaySonnet => self.seven_day_sonnet.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.limits().is_empty()
    }
}

/// The quota windows reported by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageWindow {
    FiveHour,
    SevenDay,
    SevenDayOpus,
    SevenDaySonnet,
}

impl UsageWindow {
    /// Fixed display order.
    pub const ALL: [UsageWindow; 4] = [
        UsageWindow::FiveHour,
        UsageWindow::SevenDay,
        UsageWindow::SevenDayOpus,
        UsageWindow::SevenDaySonnet,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            UsageWindow::FiveHour => "5-Hour",
            UsageWindow::SevenDay => "7-Day",
            UsageWindow::SevenDayOpus => "7-Day Opus",
            UsageWindow::SevenDaySonnet => "7-Day Sonnet",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            UsageWindow::FiveHour => "clock",
            UsageWindow::SevenDay => "calendar",
            UsageWindow::SevenDayOpus => "sparkles",
            UsageWindow::SevenDaySonnet => "music.note",
        }
    }

    /// Nominal window length; the window start is `resets_at - length`.
    pub fn length(&self) -> Duration {
        match self {
            UsageWindow::FiveHour => Duration::from_secs(5 * 3600),
            UsageWindow::SevenDay | UsageWindow::SevenDayOpus | UsageWindow::SevenDaySonnet => {
                Duration::from_secs(7 * 24 * 3600)
            }
        }
    }
}

impl std::fmt::Display for UsageWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
