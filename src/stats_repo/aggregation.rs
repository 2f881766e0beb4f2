// Per-minute aggregation: schema for the bucket table + pure bucketing logic.
// DB access (range query, upsert, delete) stays in stats_repo::mod.

use std::collections::BTreeMap;

use crate::models::{MINUTE_MS, RawTimingSample};
use sqlx::SqlitePool;

/// Partial per-minute sums for one service, produced by ProcessRawTimes and
/// merged into the bucket table by AggregateByMinute.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialBucket {
    pub service_name: String,
    pub bucket_start: i64,
    pub usage_count: i64,
    pub total_ms: f64,
}

/// Creates the minute_buckets table and index if not present.
/// The primary key makes aggregation a keyed upsert, never a duplicate row.
pub async fn init_bucket_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS minute_buckets (
            service_name TEXT NOT NULL,
            bucket_start INTEGER NOT NULL,
            granularity_seconds INTEGER NOT NULL,
            usage_count INTEGER NOT NULL,
            total_ms REAL NOT NULL,
            mean_ms REAL NOT NULL,
            PRIMARY KEY (service_name, bucket_start, granularity_seconds)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_buckets_start ON minute_buckets(bucket_start)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Floor a timestamp to the start of its minute bucket.
pub fn bucket_start_for(ts_ms: i64) -> i64 {
    (ts_ms.div_euclid(MINUTE_MS)) * MINUTE_MS
}

/// Group raw samples into per-(service, minute) partial sums.
/// Output is sorted by (service_name, bucket_start); empty input yields empty output.
pub fn partial_sums(samples: &[RawTimingSample]) -> Vec<PartialBucket> {
    let mut by_key: BTreeMap<(&str, i64), (i64, f64)> = BTreeMap::new();
    for s in samples {
        let key = (s.service_name.as_str(), bucket_start_for(s.timestamp));
        let entry = by_key.entry(key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += s.duration_ms;
    }
    by_key
        .into_iter()
        .map(|((service, bucket_start), (usage_count, total_ms))| PartialBucket {
            service_name: service.to_string(),
            bucket_start,
            usage_count,
            total_ms,
        })
        .collect()
}

/// Mean duration with the zero-count guard (empty bucket means 0, not NaN).
pub fn mean_ms(total_ms: f64, usage_count: i64) -> f64 {
    if usage_count > 0 {
        total_ms / usage_count as f64
    } else {
        0.0
    }
}
