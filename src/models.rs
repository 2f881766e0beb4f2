// Domain models: jobs, raw timing samples, aggregate buckets, top-N entries.

use serde::{Deserialize, Serialize};

use crate::error::StatsError;

/// Width of one aggregation bucket, in milliseconds.
pub const MINUTE_MS: i64 = 60_000;

/// Granularity stored with per-minute buckets, in seconds.
pub const GRANULARITY_MINUTE: i32 = 60;

/// Executor kind for a scheduled job; closed set, dispatched by match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ProcessRawTimes,
    AggregateByMinute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
}

impl IntervalUnit {
    pub fn to_millis(self, interval: u64) -> i64 {
        match self {
            IntervalUnit::Seconds => (interval as i64) * 1000,
            IntervalUnit::Minutes => (interval as i64) * MINUTE_MS,
        }
    }
}

/// A scheduled job definition. Built from configuration at startup;
/// `last_run_ms` is advanced by the scheduler, never by executors.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub kind: JobKind,
    pub interval: u64,
    pub unit: IntervalUnit,
    pub enabled: bool,
    pub last_run_ms: i64,
}

impl Job {
    pub fn interval_ms(&self) -> i64 {
        self.unit.to_millis(self.interval)
    }

    /// Due when the interval has elapsed since the last run. A job that has
    /// never run (last_run_ms = 0) is due on the first tick.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.enabled && self.last_run_ms + self.interval_ms() <= now_ms
    }
}

/// One raw timing sample recorded by a request-serving component.
/// Each sample counts as a single usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTimingSample {
    pub service_name: String,
    /// Milliseconds since the Unix epoch, UTC.
    pub timestamp: i64,
    pub duration_ms: f64,
}

/// Per-minute aggregate for one service. Unique per
/// (service_name, bucket_start, granularity_seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub service_name: String,
    /// Bucket start, milliseconds since the Unix epoch, minute-aligned.
    pub bucket_start: i64,
    pub granularity_seconds: i32,
    pub usage_count: i64,
    pub total_ms: f64,
    pub mean_ms: f64,
}

/// Per-service totals over a query window (grouped across buckets).
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceTotals {
    pub service_name: String,
    pub usage_count: i64,
    pub total_ms: f64,
    pub mean_ms: f64,
}

/// Which statistic a top-N query ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatType {
    HighestMean,
    HighestUsage,
}

impl StatType {
    /// Parse from the wire form used by the invoke boundary.
    pub fn parse(s: &str) -> Result<Self, StatsError> {
        match s {
            "highest_mean" => Ok(StatType::HighestMean),
            "highest_usage" => Ok(StatType::HighestUsage),
            other => Err(StatsError::InputValidation(format!(
                "stat_type:[{}] is not one of:[highest_mean, highest_usage]",
                other
            ))),
        }
    }
}

/// Direction of a metric relative to its baseline window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    /// Sign of (current - baseline).
    pub fn from_delta(current: f64, baseline: f64) -> Self {
        if current > baseline {
            Trend::Up
        } else if current < baseline {
            Trend::Down
        } else {
            Trend::Flat
        }
    }
}

/// One ranked item returned by a top-N query.
/// `value` is the ranked statistic (mean duration or usage count), rounded
/// to a whole number the way the admin UI consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopNEntry {
    pub position: u32,
    pub service_name: String,
    pub value: i64,
    pub trend: Trend,
    pub avg: i64,
    pub total: i64,
}
