// Named time windows and the top-N query service. All window math is UTC.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use tracing::warn;

use crate::config::AttentionConfig;
use crate::error::StatsError;
use crate::models::{MINUTE_MS, ServiceTotals, StatType, TopNEntry, Trend};
use crate::stats_repo::StatsRepo;

/// A named query window. Closed set; unknown keywords are rejected at parse
/// time, never dispatched dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    LastHour,
    Today,
    Yesterday,
    Last24h,
    ThisWeek,
    ThisMonth,
    ThisYear,
}

pub const WINDOW_KEYWORDS: [&str; 7] = [
    "last_hour",
    "today",
    "yesterday",
    "last_24h",
    "this_week",
    "this_month",
    "this_year",
];

/// Concrete [start, stop) bounds for a window, plus the bucket granularity
/// and how many trend elements a UI would plot over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub start_ms: i64,
    pub stop_ms: i64,
    pub granularity_seconds: i32,
    pub trend_elems: u32,
}

impl WindowBounds {
    pub fn window_seconds(&self) -> i64 {
        (self.stop_ms - self.start_ms) / 1000
    }
}

/// One comparison window for trend computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub label: &'static str,
    pub start_ms: i64,
    pub stop_ms: i64,
}

impl TimeWindow {
    pub fn parse(s: &str) -> Result<Self, StatsError> {
        match s {
            "last_hour" => Ok(TimeWindow::LastHour),
            "today" => Ok(TimeWindow::Today),
            "yesterday" => Ok(TimeWindow::Yesterday),
            "last_24h" => Ok(TimeWindow::Last24h),
            "this_week" => Ok(TimeWindow::ThisWeek),
            "this_month" => Ok(TimeWindow::ThisMonth),
            "this_year" => Ok(TimeWindow::ThisYear),
            other => Err(StatsError::InputValidation(format!(
                "choice:[{}] is not one of:[{}]",
                other,
                WINDOW_KEYWORDS.join(", ")
            ))),
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            TimeWindow::LastHour => "last_hour",
            TimeWindow::Today => "today",
            TimeWindow::Yesterday => "yesterday",
            TimeWindow::Last24h => "last_24h",
            TimeWindow::ThisWeek => "this_week",
            TimeWindow::ThisMonth => "this_month",
            TimeWindow::ThisYear => "this_year",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeWindow::LastHour => "Last hour",
            TimeWindow::Today => "Today",
            TimeWindow::Yesterday => "Yesterday",
            TimeWindow::Last24h => "Last 24h",
            TimeWindow::ThisWeek => "This week",
            TimeWindow::ThisMonth => "This month",
            TimeWindow::ThisYear => "This year",
        }
    }

    /// Compute [start, stop) in UTC relative to `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> WindowBounds {
        let midnight = |d: DateTime<Utc>| {
            d.date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|n| Utc.from_utc_datetime(&n))
                .unwrap_or(d)
        };
        let (start, stop) = match self {
            TimeWindow::LastHour => (now - Duration::hours(1), now),
            TimeWindow::Today => (midnight(now), now),
            TimeWindow::Yesterday => (midnight(now) - Duration::days(1), midnight(now)),
            TimeWindow::Last24h => (now - Duration::hours(24), now),
            TimeWindow::ThisWeek => {
                let days_from_monday = now.weekday().num_days_from_monday() as i64;
                (midnight(now) - Duration::days(days_from_monday), now)
            }
            TimeWindow::ThisMonth => {
                let first = now.with_day(1).unwrap_or(now);
                (midnight(first), now)
            }
            TimeWindow::ThisYear => {
                let first = now.with_month(1).and_then(|d| d.with_day(1)).unwrap_or(now);
                (midnight(first), now)
            }
        };
        let start_ms = start.timestamp_millis();
        let stop_ms = stop.timestamp_millis();
        let trend_elems = ((stop_ms - start_ms) / MINUTE_MS).max(1) as u32;
        WindowBounds {
            start_ms,
            stop_ms,
            granularity_seconds: crate::models::GRANULARITY_MINUTE,
            trend_elems,
        }
    }

    /// Comparison windows for this window. The first baseline is the one
    /// trends are computed against.
    pub fn baselines(&self, now: DateTime<Utc>) -> Vec<Baseline> {
        let b = self.bounds(now);
        match self {
            TimeWindow::LastHour => {
                let hour = Duration::hours(1).num_milliseconds();
                let day = Duration::days(1).num_milliseconds();
                let week = Duration::weeks(1).num_milliseconds();
                vec![
                    Baseline {
                        label: "The previous hour",
                        start_ms: b.start_ms - hour,
                        stop_ms: b.stop_ms - hour,
                    },
                    Baseline {
                        label: "Same hour the previous day",
                        start_ms: b.start_ms - day,
                        stop_ms: b.stop_ms - day,
                    },
                    Baseline {
                        label: "Same hour and day the previous week",
                        start_ms: b.start_ms - week,
                        stop_ms: b.stop_ms - week,
                    },
                ]
            }
            _ => {
                let len = b.stop_ms - b.start_ms;
                vec![Baseline {
                    label: "The previous period",
                    start_ms: b.start_ms - len,
                    stop_ms: b.start_ms,
                }]
            }
        }
    }
}

/// Parse an admin-supplied timestamp: RFC 3339, or a naive ISO datetime
/// taken as UTC. Returns milliseconds since the epoch.
pub fn parse_utc_ms(s: &str) -> Result<i64, StatsError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|n| Utc.from_utc_datetime(&n).timestamp_millis())
        .map_err(|e| StatsError::InputValidation(format!("malformed timestamp:[{}]: {}", s, e)))
}

/// Invocation rate over a window, rendered for the UI: two decimals, with a
/// floor marker when a positive rate would round below 0.01. A value of 0
/// is "0.00", never a division fault.
pub fn format_rate(value: i64, window_seconds: i64) -> String {
    if value <= 0 || window_seconds <= 0 {
        return "0.00".to_string();
    }
    let rate = value as f64 / window_seconds as f64;
    if rate < 0.005 {
        "<0.01".to_string()
    } else {
        format!("{:.2}", rate)
    }
}

/// A most-used entry, enriched with rate and percent-of-total.
#[derive(Debug, Clone, Serialize)]
pub struct UsageEntry {
    #[serde(flatten)]
    pub entry: TopNEntry,
    pub rate: String,
    pub percent: f64,
}

/// What the admin UI renders for a named window: both rankings plus the
/// resolved bounds and comparison options.
#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    pub window: &'static str,
    pub label: &'static str,
    pub start: String,
    pub stop: String,
    pub compare_to: Vec<String>,
    pub slowest: Vec<TopNEntry>,
    pub most_used: Vec<UsageEntry>,
}

/// Read side of the statistics core: top-N rankings with trends, and named
/// window reports. Reads run concurrently with aggregation writes.
pub struct StatsQuery {
    repo: Arc<StatsRepo>,
    attention: AttentionConfig,
}

impl StatsQuery {
    pub fn new(repo: Arc<StatsRepo>, attention: AttentionConfig) -> Self {
        Self { repo, attention }
    }

    /// Top N over an explicit [start, stop) window. Trend compares each
    /// service against the previous period of equal length; a service absent
    /// from the baseline compares against 0.
    pub async fn top_n(
        &self,
        start_ms: i64,
        stop_ms: i64,
        n: u32,
        stat_type: StatType,
    ) -> Result<Vec<TopNEntry>, StatsError> {
        if stop_ms <= start_ms {
            return Err(StatsError::InputValidation(format!(
                "stop:[{}] must be after start:[{}]",
                stop_ms, start_ms
            )));
        }
        let baseline = Baseline {
            label: "The previous period",
            start_ms: start_ms - (stop_ms - start_ms),
            stop_ms: start_ms,
        };
        self.top_n_against(start_ms, stop_ms, n, stat_type, baseline)
            .await
    }

    async fn top_n_against(
        &self,
        start_ms: i64,
        stop_ms: i64,
        n: u32,
        stat_type: StatType,
        baseline: Baseline,
    ) -> Result<Vec<TopNEntry>, StatsError> {
        let rows = self.repo.top_n(start_ms, stop_ms, n, stat_type).await?;
        if rows.is_empty() {
            return Ok(vec![]);
        }

        let base: HashMap<String, ServiceTotals> = self
            .repo
            .totals_by_service(baseline.start_ms, baseline.stop_ms)
            .await?
            .into_iter()
            .map(|t| (t.service_name.clone(), t))
            .collect();

        let grand_total = match stat_type {
            StatType::HighestUsage => self.repo.window_usage_total(start_ms, stop_ms).await?,
            StatType::HighestMean => 0,
        };

        let mut out = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            let current = stat_value(&row, stat_type);
            let baseline_value = base
                .get(&row.service_name)
                .map(|t| stat_value(t, stat_type))
                .unwrap_or(0.0);
            let total = match stat_type {
                StatType::HighestMean => row.total_ms.round() as i64,
                StatType::HighestUsage => grand_total,
            };
            out.push(TopNEntry {
                position: (i + 1) as u32,
                service_name: row.service_name,
                value: current.round() as i64,
                trend: Trend::from_delta(current, baseline_value),
                avg: row.mean_ms.round() as i64,
                total,
            });
        }
        Ok(out)
    }

    /// Resolve a named window and produce both rankings, with rate and
    /// percent-of-total on the most-used side.
    pub async fn window_report(
        &self,
        window: TimeWindow,
        n: u32,
        now: DateTime<Utc>,
    ) -> Result<WindowReport, StatsError> {
        let bounds = window.bounds(now);
        let baselines = window.baselines(now);
        // baselines() always yields at least one entry per window kind
        let trend_baseline = baselines[0];

        let slowest = self
            .top_n_against(
                bounds.start_ms,
                bounds.stop_ms,
                n,
                StatType::HighestMean,
                trend_baseline,
            )
            .await?;
        let most_used_entries = self
            .top_n_against(
                bounds.start_ms,
                bounds.stop_ms,
                n,
                StatType::HighestUsage,
                trend_baseline,
            )
            .await?;

        let window_seconds = bounds.window_seconds();
        let most_used = most_used_entries
            .into_iter()
            .map(|entry| {
                let rate = format_rate(entry.value, window_seconds);
                let percent = if entry.total > 0 {
                    entry.value as f64 / entry.total as f64 * 100.0
                } else {
                    0.0
                };
                UsageEntry {
                    entry,
                    rate,
                    percent,
                }
            })
            .collect();

        self.log_attention(&slowest);

        Ok(WindowReport {
            window: window.keyword(),
            label: window.label(),
            start: format_utc_ms(bounds.start_ms),
            stop: format_utc_ms(bounds.stop_ms),
            compare_to: baselines.iter().map(|b| b.label.to_string()).collect(),
            slowest,
            most_used,
        })
    }

    /// Warn about services whose mean duration crosses the slow threshold
    /// among the configured number of slowest entries.
    fn log_attention(&self, slowest: &[TopNEntry]) {
        let offenders: Vec<&str> = slowest
            .iter()
            .take(self.attention.top_threshold)
            .filter(|e| e.avg as f64 >= self.attention.slow_threshold_ms)
            .map(|e| e.service_name.as_str())
            .collect();
        if !offenders.is_empty() {
            warn!(
                services = ?offenders,
                threshold_ms = self.attention.slow_threshold_ms,
                "services need attention"
            );
        }
    }
}

fn stat_value(t: &ServiceTotals, stat_type: StatType) -> f64 {
    match stat_type {
        StatType::HighestMean => t.mean_ms,
        StatType::HighestUsage => t.usage_count as f64,
    }
}

fn format_utc_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default()
}
