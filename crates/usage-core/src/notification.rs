//! Threshold alerts with hysteresis.
//!
//! [`NotificationPolicy`] decides, after each committed snapshot, whether the
//! highest metric warrants an alert. The first crossing of the critical
//! threshold alerts once; further alerts need another
//! [`ThresholdConfig::REALERT_STEP`] points, or a drop below the threshold
//! followed by a fresh crossing.
//!
//! Delivery is a collaborator: [`AlertSink::display`] is fire-and-forget.

use crate::config::ThresholdConfig;
use crate::metrics::{DisplayMetric, MetricStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A threshold crossing worth telling the user about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub metric_name: String,
    pub percentage: u8,
    pub status: MetricStatus,
    pub remaining_time: String,
}

impl AlertEvent {
    fn from_metric(metric: &DisplayMetric) -> Self {
        Self {
            metric_name: metric.name.clone(),
            percentage: metric.percentage,
            status: metric.status,
            remaining_time: metric.remaining_time.clone(),
        }
    }

    pub fn title(&self) -> String {
        match self.status {
            MetricStatus::Exhausted => format!("{} limit reached", self.metric_name),
            _ => format!("{} usage at {}%", self.metric_name, self.percentage),
        }
    }

    pub fn body(&self) -> String {
        if self.remaining_time.is_empty() || self.remaining_time == "Unknown" {
            format!("You have used {}% of your {} quota.", self.percentage, self.metric_name)
        } else {
            format!(
                "You have used {}% of your {} quota. Resets in {}.",
                self.percentage, self.metric_name, self.remaining_time
            )
        }
    }
}

/// How urgently the host should present an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionLevel {
    Passive,
    Active,
    TimeSensitive,
}

/// A formatted alert handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub body: String,
    pub sound: Option<String>,
    pub interruption_level: InterruptionLevel,
}

impl Alert {
    /// Format an event; every call gets a fresh id.
    pub fn from_event(event: &AlertEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: event.title(),
            body: event.body(),
            sound: Some("default".to_string()),
            interruption_level: InterruptionLevel::TimeSensitive,
        }
    }
}

/// OS-level alert delivery. Best effort, never acknowledged.
pub trait AlertSink: Send + Sync {
    fn display(&self, alert: &Alert);
}

/// Shared handle to an alert sink.
pub type DynAlertSink = Arc<dyn AlertSink>;

/// Sink that writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn display(&self, alert: &Alert) {
        warn!(id = %alert.id, "{}: {}", alert.title, alert.body);
    }
}

/// Hysteresis state carried across fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NotificationState {
    pub has_notified_critical: bool,
    pub last_notified_percentage: u8,
}

/// Decides when a critical crossing raises an alert.
#[derive(Debug, Clone)]
pub struct NotificationPolicy {
    critical_threshold: u8,
    realert_step: u8,
    state: NotificationState,
}

impl NotificationPolicy {
    pub fn new(critical_threshold: u8) -> Self {
        Self {
            critical_threshold,
            realert_step: ThresholdConfig::REALERT_STEP,
            state: NotificationState::default(),
        }
    }

    pub fn state(&self) -> NotificationState {
        self.state
    }

    pub fn critical_threshold(&self) -> u8 {
        self.critical_threshold
    }

    /// Evaluate the current maximum metric after a successful commit.
    pub fn on_snapshot_committed(&mut self, max: &DisplayMetric) -> Option<AlertEvent> {
        let percentage = max.percentage;

        if percentage < self.critical_threshold {
            if self.state.has_notified_critical {
                info!(
                    "{} back below critical ({}% < {}%), alerts re-armed",
                    max.name, percentage, self.critical_threshold
                );
            }
            self.state = NotificationState {
                has_notified_critical: false,
                last_notified_percentage: percentage,
            };
            return None;
        }

        let first_crossing = !self.state.has_notified_critical;
        let further_increase = u16::from(percentage)
            >= u16::from(self.state.last_notified_percentage) + u16::from(self.realert_step);

        if !(first_crossing || further_increase) {
            debug!(
                "{}% suppressed (last alerted at {}%)",
                percentage, self.state.last_notified_percentage
            );
            return None;
        }

        self.state = NotificationState {
            has_notified_critical: true,
            last_notified_percentage: percentage,
        };
        Some(AlertEvent::from_metric(max))
    }
}
