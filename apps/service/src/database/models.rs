use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::monitoring::transition::Transition;

/// Shortest interval any monitor is polled at, whatever was requested.
pub const MIN_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
/// Number of recent checks an uptime summary covers.
pub const SUMMARY_WINDOW: usize = 200;

/// Apply the interval floor
pub fn clamp_interval(requested_seconds: u64) -> u64 {
    requested_seconds.max(MIN_INTERVAL_SECONDS)
}

/// Scheduler job id for a monitor
pub fn job_id(monitor_id: i64) -> String {
    format!("monitor-{monitor_id}")
}

/// Monitor model - a target polled on an interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub target: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub is_paused: bool,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<u16>,
    /// `None` until the first check completes
    pub last_is_up: Option<bool>,
    pub last_latency_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Interval the scheduler actually uses
    pub fn effective_interval(&self) -> Duration {
        Duration::from_secs(clamp_interval(self.interval_seconds))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    /// Convert a timestamp to the stored unix milliseconds
    pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    /// Convert stored unix milliseconds back to a timestamp
    pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
    }
}

/// Fields supplied when registering a monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMonitor {
    pub owner_id: i64,
    pub name: String,
    pub target: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub is_paused: bool,
}

impl NewMonitor {
    pub fn new(owner_id: i64, name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            owner_id,
            name: name.into(),
            target: target.into(),
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            is_paused: false,
        }
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.interval_seconds = seconds;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.is_paused = paused;
        self
    }
}

/// Partial update of a monitor's configuration; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorUpdate {
    pub name: Option<String>,
    pub target: Option<String>,
    pub interval_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
    pub is_paused: Option<bool>,
}

impl MonitorUpdate {
    /// Apply the changes onto a loaded monitor
    pub fn apply_to(&self, monitor: &mut Monitor) {
        if let Some(name) = &self.name {
            monitor.name = name.clone();
        }
        if let Some(target) = &self.target {
            monitor.target = target.clone();
        }
        if let Some(interval) = self.interval_seconds {
            monitor.interval_seconds = clamp_interval(interval);
        }
        if let Some(timeout) = self.timeout_seconds {
            monitor.timeout_seconds = timeout;
        }
        if let Some(paused) = self.is_paused {
            monitor.is_paused = paused;
        }
    }
}

/// One stored probe outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: i64,
    pub monitor_id: i64,
    pub status_code: Option<u16>,
    pub is_up: bool,
    pub latency_ms: Option<f64>,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

/// Cached state before and after a recorded check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedState {
    pub previous: Option<bool>,
    pub current: bool,
}

impl RecordedState {
    pub fn transition(&self) -> Transition {
        Transition::classify(self.previous, self.current)
    }
}

/// Delivery channel of a notification preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Telegram,
    Webhook,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Telegram => "telegram",
            NotificationChannel::Webhook => "webhook",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(NotificationChannel::Email),
            "telegram" => Ok(NotificationChannel::Telegram),
            "webhook" => Ok(NotificationChannel::Webhook),
            other => Err(format!("unknown notification channel '{other}'")),
        }
    }
}

/// Where an owner wants to hear about transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub id: Option<i64>,
    pub owner_id: i64,
    pub channel: NotificationChannel,
    pub destination: String,
    pub is_enabled: bool,
}

impl NotificationPreference {
    pub fn new(owner_id: i64, channel: NotificationChannel, destination: impl Into<String>) -> Self {
        Self {
            id: None,
            owner_id,
            channel,
            destination: destination.into(),
            is_enabled: true,
        }
    }
}

/// Rollup over a window of recent checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeSummary {
    pub total_checks: usize,
    pub up_checks: usize,
    /// Percentage rounded to two decimals, `None` without any checks
    pub uptime_pct: Option<f64>,
    /// Unrounded mean of the non-zero latencies
    pub avg_latency_ms: Option<f64>,
    pub downtime_events: usize,
}

impl UptimeSummary {
    pub fn from_records(records: &[CheckRecord]) -> Self {
        let total_checks = records.len();
        let up_checks = records.iter().filter(|r| r.is_up).count();

        let uptime_pct = (total_checks > 0)
            .then(|| round2(up_checks as f64 / total_checks as f64 * 100.0));

        // Zero latencies carry no timing and stay out of the mean.
        let latencies: Vec<f64> = records
            .iter()
            .filter_map(|r| r.latency_ms)
            .filter(|ms| *ms > 0.0)
            .collect();
        let avg_latency_ms = (!latencies.is_empty())
            .then(|| latencies.iter().sum::<f64>() / latencies.len() as f64);

        Self {
            total_checks,
            up_checks,
            uptime_pct,
            avg_latency_ms,
            downtime_events: total_checks - up_checks,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
