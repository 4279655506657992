//! Display-ready metrics derived from a usage snapshot.
//!
//! Every value here is a pure function of one [`UsageLimit`] and the wall
//! clock. [`DerivedMetricsCache`] memoizes the derived list for the
//! currently committed snapshot and is invalidated only by a new commit.

use crate::config::ThresholdConfig;
use crate::models::{UsageLimit, UsageSnapshot, UsageWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Severity bucket of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Normal,
    Warning,
    Critical,
    Exhausted,
}

impl std::fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricStatus::Normal => write!(f, "normal"),
            MetricStatus::Warning => write!(f, "warning"),
            MetricStatus::Critical => write!(f, "critical"),
            MetricStatus::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Percent thresholds for status derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusThresholds {
    pub warning: u8,
    pub critical: u8,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            warning: ThresholdConfig::WARNING,
            critical: ThresholdConfig::CRITICAL,
        }
    }
}

impl StatusThresholds {
    pub fn status_for(&self, percentage: u8) -> MetricStatus {
        if percentage >= 100 {
            MetricStatus::Exhausted
        } else if percentage >= self.critical {
            MetricStatus::Critical
        } else if percentage >= self.warning {
            MetricStatus::Warning
        } else {
            MetricStatus::Normal
        }
    }
}

/// A display-ready view of one quota window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayMetric {
    pub name: String,
    pub icon: String,
    /// `None` only for the "no data" placeholder.
    pub window: Option<UsageWindow>,
    pub limit: UsageLimit,
    /// Rounded utilization, 0-100.
    pub percentage: u8,
    pub status: MetricStatus,
    /// Humanized countdown to the reset time.
    pub remaining_time: String,
    /// Elapsed fraction of the window, 0.0-1.0.
    pub time_progress: f64,
}

impl DisplayMetric {
    /// Placeholder returned when no snapshot has been committed.
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            icon: "questionmark".to_string(),
            window: None,
            limit: UsageLimit::new(0.0, None),
            percentage: 0,
            status: MetricStatus::Normal,
            remaining_time: String::new(),
            time_progress: 0.0,
        }
    }

    /// Derive the metric for one window at time `now`.
    pub fn derive(
        window: UsageWindow,
        limit: &UsageLimit,
        thresholds: &StatusThresholds,
        now: DateTime<Utc>,
    ) -> Self {
        let percentage = percentage_of(limit.utilization);
        Self {
            name: window.display_name().to_string(),
            icon: window.icon().to_string(),
            window: Some(window),
            limit: limit.clone(),
            percentage,
            status: thresholds.status_for(percentage),
            remaining_time: remaining_time(limit.resets_at, now),
            time_progress: time_progress(window, limit.resets_at, now),
        }
    }
}

/// Round and clamp a raw utilization into a whole percentage.
pub fn percentage_of(utilization: f64) -> u8 {
    if !utilization.is_finite() {
        return if utilization == f64::INFINITY { 100 } else { 0 };
    }
    utilization.round().clamp(0.0, 100.0) as u8
}

/// Fraction of the window elapsed at `now`; 0 when the reset time is unknown.
pub fn time_progress(window: UsageWindow, resets_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(resets_at) = resets_at else {
        return 0.0;
    };
    let length = window.length().as_secs_f64();
    let remaining = (resets_at - now).num_milliseconds() as f64 / 1000.0;
    ((length - remaining) / length).clamp(0.0, 1.0)
}

/// Human countdown such as `"2h 15m"` or `"3d 4h"`.
pub fn remaining_time(resets_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(resets_at) = resets_at else {
        return "Unknown".to_string();
    };
    let secs = (resets_at - now).num_seconds();
    if secs <= 0 {
        return "Resetting now".to_string();
    }

    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        "<1m".to_string()
    }
}

/// Derive all present windows of a snapshot, in display order.
pub fn derive_all(
    snapshot: &UsageSnapshot,
    thresholds: &StatusThresholds,
    now: DateTime<Utc>,
) -> Vec<DisplayMetric> {
    snapshot
        .limits()
        .into_iter()
        .map(|(window, limit)| DisplayMetric::derive(window, limit, thresholds, now))
        .collect()
}

/// Highest percentage; the first entry wins ties.
pub fn max_of(metrics: &[DisplayMetric]) -> DisplayMetric {
    metrics
        .iter()
        .fold(None::<&DisplayMetric>, |best, m| match best {
            Some(b) if b.percentage >= m.percentage => Some(b),
            _ => Some(m),
        })
        .cloned()
        .unwrap_or_else(DisplayMetric::unknown)
}

/// Memoized metrics for the committed snapshot.
#[derive(Debug, Default)]
pub struct DerivedMetricsCache {
    thresholds: StatusThresholds,
    all: Option<Arc<Vec<DisplayMetric>>>,
    max: Option<DisplayMetric>,
    computations: u64,
}

impl DerivedMetricsCache {
    pub fn new(thresholds: StatusThresholds) -> Self {
        Self {
            thresholds,
            ..Default::default()
        }
    }

    pub fn thresholds(&self) -> &StatusThresholds {
        &self.thresholds
    }

    /// Drop memoized values; the next access recomputes.
    pub fn invalidate(&mut self) {
        self.all = None;
        self.max = None;
    }

    pub fn is_cached(&self) -> bool {
        self.all.is_some()
    }

    /// How many times the metric list has been derived.
    pub fn computations(&self) -> u64 {
        self.computations
    }

    /// All present windows for `snapshot`, computed at most once per commit.
    pub fn all_metrics(
        &mut self,
        snapshot: Option<&UsageSnapshot>,
        now: DateTime<Utc>,
    ) -> Arc<Vec<DisplayMetric>> {
        if let Some(all) = &self.all {
            return Arc::clone(all);
        }

        let metrics = snapshot
            .map(|s| derive_all(s, &self.thresholds, now))
            .unwrap_or_default();
        self.computations += 1;
        debug!("Derived {} display metrics", metrics.len());

        let all = Arc::new(metrics);
        self.all = Some(Arc::clone(&all));
        all
    }

    /// The metric with the highest percentage, or the "Unknown" placeholder.
    pub fn max_metric(&mut self, snapshot: Option<&UsageSnapshot>, now: DateTime<Utc>) -> DisplayMetric {
        if let Some(max) = &self.max {
            return max.clone();
        }
        let all = self.all_metrics(snapshot, now);
        let max = max_of(&all);
        self.max = Some(max.clone());
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    fn snapshot(five: Option<f64>, seven: Option<f64>, opus: Option<f64>, sonnet: Option<f64>) -> UsageSnapshot {
        let limit = |u: Option<f64>| u.map(|u| UsageLimit::new(u, None));
        UsageSnapshot {
            five_hour: limit(five),
            seven_day: limit(seven),
            seven_day_opus: limit(opus),
            seven_day_sonnet: limit(sonnet),
        }
    }

    #[test]
    fn test_percentage_rounding_and_clamp() {
        assert_eq!(percentage_of(0.0), 0);
        assert_eq!(percentage_of(49.5), 50);
        assert_eq!(percentage_of(49.4), 49);
        assert_eq!(percentage_of(-3.0), 0);
        assert_eq!(percentage_of(120.0), 100);
        assert_eq!(percentage_of(f64::NAN), 0);
    }

    #[test]
    fn test_status_buckets() {
        let t = StatusThresholds::default();
        assert_eq!(t.status_for(0), MetricStatus::Normal);
        assert_eq!(t.status_for(69), MetricStatus::Normal);
        assert_eq!(t.status_for(70), MetricStatus::Warning);
        assert_eq!(t.status_for(89), MetricStatus::Warning);
        assert_eq!(t.status_for(90), MetricStatus::Critical);
        assert_eq!(t.status_for(99), MetricStatus::Critical);
        assert_eq!(t.status_for(100), MetricStatus::Exhausted);
    }

    #[test]
    fn test_time_progress() {
        let now = now();
        assert_eq!(time_progress(UsageWindow::FiveHour, None, now), 0.0);

        // 1h left of a 5h window: 80% elapsed.
        let resets = now + ChronoDuration::hours(1);
        let progress = time_progress(UsageWindow::FiveHour, Some(resets), now);
        assert!((progress - 0.8).abs() < 1e-9);

        // Reset already passed, and reset further away than the window.
        let past = now - ChronoDuration::minutes(5);
        assert_eq!(time_progress(UsageWindow::FiveHour, Some(past), now), 1.0);
        let far = now + ChronoDuration::days(30);
        assert_eq!(time_progress(UsageWindow::SevenDay, Some(far), now), 0.0);
    }

    #[test]
    fn test_remaining_time_formatting() {
        let now = now();
        assert_eq!(remaining_time(None, now), "Unknown");
        assert_eq!(remaining_time(Some(now), now), "Resetting now");
        assert_eq!(
            remaining_time(Some(now + ChronoDuration::seconds(30)), now),
            "<1m"
        );
        assert_eq!(
            remaining_time(Some(now + ChronoDuration::minutes(42)), now),
            "42m"
        );
        assert_eq!(
            remaining_time(Some(now + ChronoDuration::minutes(135)), now),
            "2h 15m"
        );
        assert_eq!(
            remaining_time(Some(now + ChronoDuration::hours(76)), now),
            "3d 4h"
        );
    }

    #[test]
    fn test_derive_all_order_and_presence() {
        let s = snapshot(None, Some(10.0), Some(20.0), Some(30.0));
        let metrics = derive_all(&s, &StatusThresholds::default(), now());
        let names: Vec<_> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["7-Day", "7-Day Opus", "7-Day Sonnet"]);

        let s = snapshot(Some(1.0), Some(2.0), Some(3.0), Some(4.0));
        let windows: Vec<_> = derive_all(&s, &StatusThresholds::default(), now())
            .into_iter()
            .map(|m| m.window)
            .collect();
        assert_eq!(
            windows,
            UsageWindow::ALL.iter().copied().map(Some).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_max_ties_prefer_first() {
        let s = snapshot(Some(50.0), Some(80.0), Some(80.0), Some(10.0));
        let metrics = derive_all(&s, &StatusThresholds::default(), now());
        let max = max_of(&metrics);
        assert_eq!(max.window, Some(UsageWindow::SevenDay));
        assert_eq!(max.percentage, 80);
        assert_eq!(max.status, MetricStatus::Warning);
    }

    #[test]
    fn test_empty_cache_returns_placeholder() {
        let mut cache = DerivedMetricsCache::new(StatusThresholds::default());
        assert!(cache.all_metrics(None, now()).is_empty());

        let max = cache.max_metric(None, now());
        assert_eq!(max.name, "Unknown");
        assert_eq!(max.percentage, 0);
        assert_eq!(max.status, MetricStatus::Normal);
    }

    #[test]
    fn test_cache_memoizes_until_invalidated() {
        let mut cache = DerivedMetricsCache::new(StatusThresholds::default());
        let s = snapshot(Some(92.0), None, None, None);

        let first = cache.all_metrics(Some(&s), now());
        let second = cache.all_metrics(Some(&s), now());
        assert!(Arc::ptr_eq(&first, &second));
        cache.max_metric(Some(&s), now());
        assert_eq!(cache.computations(), 1);

        // Identical values still recompute after a commit.
        cache.invalidate();
        let third = cache.all_metrics(Some(&s), now());
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(first, third);
        assert_eq!(cache.computations(), 2);
    }
}
