// SQLite statistics store. raw_times holds unaggregated samples; minute_buckets
// holds per-minute aggregates keyed by (service_name, bucket_start, granularity_seconds).

pub mod aggregation;

use std::path::Path;
use std::str::FromStr;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::StatsError;
use crate::models::{AggregateBucket, GRANULARITY_MINUTE, RawTimingSample, ServiceTotals, StatType};
use aggregation::PartialBucket;

pub struct StatsRepo {
    pool: SqlitePool,
    /// Maintenance gate: bucket writes take it shared, range deletes exclusive,
    /// so a delete never races an aggregation write into the same range.
    maintenance: RwLock<()>,
}

impl StatsRepo {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self {
            pool,
            maintenance: RwLock::new(()),
        })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_times (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                service_name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                duration_ms REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_raw_created_at ON raw_times(created_at)")
            .execute(&self.pool)
            .await?;

        aggregation::init_bucket_table(&self.pool).await?;

        Ok(())
    }

    /// Append raw timing samples (ingestion path for request-serving components).
    #[instrument(skip(self, samples), fields(repo = "stats", operation = "record_raw_times", samples_count = samples.len()))]
    pub async fn record_raw_times(&self, samples: &[RawTimingSample]) -> Result<(), StatsError> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for s in samples {
            sqlx::query(
                "INSERT INTO raw_times (service_name, created_at, duration_ms) VALUES ($1, $2, $3)",
            )
            .bind(&s.service_name)
            .bind(s.timestamp)
            .bind(s.duration_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Select-and-delete raw samples with created_at < watermark, oldest first,
    /// bounded by batch. Runs in one transaction so each sample is drained
    /// exactly once; re-running over the same window finds nothing.
    #[instrument(skip(self), fields(repo = "stats", operation = "drain_raw_times"))]
    pub async fn drain_raw_times(
        &self,
        watermark_ms: i64,
        batch: i64,
    ) -> Result<Vec<RawTimingSample>, StatsError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT service_name, created_at, duration_ms FROM raw_times
             WHERE created_at < $1 ORDER BY created_at ASC, id ASC LIMIT $2",
        )
        .bind(watermark_ms)
        .bind(batch)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM raw_times WHERE id IN
             (SELECT id FROM raw_times WHERE created_at < $1 ORDER BY created_at ASC, id ASC LIMIT $2)",
        )
        .bind(watermark_ms)
        .bind(batch)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(RawTimingSample {
                service_name: row.try_get("service_name")?,
                timestamp: row.try_get("created_at")?,
                duration_ms: row.try_get("duration_ms")?,
            });
        }
        Ok(out)
    }

    /// Merge partial per-minute sums into the bucket table. Keyed upsert:
    /// an existing bucket accumulates counts and totals, mean is recomputed,
    /// and re-applying an empty batch leaves buckets identical.
    #[instrument(skip(self, partials), fields(repo = "stats", operation = "upsert_buckets", buckets_count = partials.len()))]
    pub async fn upsert_buckets(&self, partials: &[PartialBucket]) -> Result<(), StatsError> {
        if partials.is_empty() {
            return Ok(());
        }
        let _shared = self.maintenance.read().await;
        let mut tx = self.pool.begin().await?;
        for p in partials {
            sqlx::query(
                r#"
                INSERT INTO minute_buckets
                    (service_name, bucket_start, granularity_seconds, usage_count, total_ms, mean_ms)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (service_name, bucket_start, granularity_seconds) DO UPDATE SET
                    usage_count = minute_buckets.usage_count + excluded.usage_count,
                    total_ms = minute_buckets.total_ms + excluded.total_ms,
                    mean_ms = CASE
                        WHEN minute_buckets.usage_count + excluded.usage_count > 0
                        THEN (minute_buckets.total_ms + excluded.total_ms)
                             / (minute_buckets.usage_count + excluded.usage_count)
                        ELSE 0.0
                    END
                "#,
            )
            .bind(&p.service_name)
            .bind(p.bucket_start)
            .bind(GRANULARITY_MINUTE)
            .bind(p.usage_count)
            .bind(p.total_ms)
            .bind(aggregation::mean_ms(p.total_ms, p.usage_count))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Buckets with bucket_start in [start, stop), ascending, optionally
    /// filtered by service name.
    pub async fn range_query(
        &self,
        service: Option<&str>,
        start_ms: i64,
        stop_ms: i64,
    ) -> Result<Vec<AggregateBucket>, StatsError> {
        let rows = match service {
            Some(name) => {
                sqlx::query(
                    "SELECT service_name, bucket_start, granularity_seconds, usage_count, total_ms, mean_ms
                     FROM minute_buckets
                     WHERE service_name = $1 AND bucket_start >= $2 AND bucket_start < $3
                     ORDER BY bucket_start ASC, service_name ASC",
                )
                .bind(name)
                .bind(start_ms)
                .bind(stop_ms)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT service_name, bucket_start, granularity_seconds, usage_count, total_ms, mean_ms
                     FROM minute_buckets
                     WHERE bucket_start >= $1 AND bucket_start < $2
                     ORDER BY bucket_start ASC, service_name ASC",
                )
                .bind(start_ms)
                .bind(stop_ms)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_bucket_row(&row)?);
        }
        Ok(out)
    }

    /// Top N services over [start, stop), descending by the requested stat,
    /// ties broken by service name ascending.
    #[instrument(skip(self), fields(repo = "stats", operation = "top_n"))]
    pub async fn top_n(
        &self,
        start_ms: i64,
        stop_ms: i64,
        n: u32,
        stat_type: StatType,
    ) -> Result<Vec<ServiceTotals>, StatsError> {
        let order = match stat_type {
            StatType::HighestMean => "mean_ms DESC, service_name ASC",
            StatType::HighestUsage => "usage_count DESC, service_name ASC",
        };
        let sql = format!(
            "SELECT service_name, SUM(usage_count) AS usage_count, SUM(total_ms) AS total_ms,
                    CASE WHEN SUM(usage_count) > 0
                         THEN SUM(total_ms) / SUM(usage_count) ELSE 0.0 END AS mean_ms
             FROM minute_buckets
             WHERE bucket_start >= $1 AND bucket_start < $2
             GROUP BY service_name
             ORDER BY {order}
             LIMIT $3",
        );
        let rows = sqlx::query(&sql)
            .bind(start_ms)
            .bind(stop_ms)
            .bind(n as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_totals_row(&row)?);
        }
        Ok(out)
    }

    /// Per-service totals over [start, stop), without ranking or limit.
    /// Used for baseline comparison windows.
    pub async fn totals_by_service(
        &self,
        start_ms: i64,
        stop_ms: i64,
    ) -> Result<Vec<ServiceTotals>, StatsError> {
        let rows = sqlx::query(
            "SELECT service_name, SUM(usage_count) AS usage_count, SUM(total_ms) AS total_ms,
                    CASE WHEN SUM(usage_count) > 0
                         THEN SUM(total_ms) / SUM(usage_count) ELSE 0.0 END AS mean_ms
             FROM minute_buckets
             WHERE bucket_start >= $1 AND bucket_start < $2
             GROUP BY service_name
             ORDER BY service_name ASC",
        )
        .bind(start_ms)
        .bind(stop_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_totals_row(&row)?);
        }
        Ok(out)
    }

    /// Total usage across all services in [start, stop) (percent-of-total base).
    pub async fn window_usage_total(
        &self,
        start_ms: i64,
        stop_ms: i64,
    ) -> Result<i64, StatsError> {
        let total = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT SUM(usage_count) FROM minute_buckets WHERE bucket_start >= $1 AND bucket_start < $2",
        )
        .bind(start_ms)
        .bind(stop_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0))
    }

    /// Delete all buckets with bucket_start in [start, stop). Irreversible.
    /// Takes the maintenance gate exclusively so no aggregation write can
    /// land inside the range mid-delete.
    #[instrument(skip(self), fields(repo = "stats", operation = "delete_range"))]
    pub async fn delete_range(&self, start_ms: i64, stop_ms: i64) -> Result<u64, StatsError> {
        let _exclusive = self.maintenance.write().await;
        let r = sqlx::query("DELETE FROM minute_buckets WHERE bucket_start >= $1 AND bucket_start < $2")
            .bind(start_ms)
            .bind(stop_ms)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Count of raw samples not yet drained (observability).
    pub async fn raw_times_pending(&self) -> Result<i64, StatsError> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM raw_times")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Reclaim space after drains and range deletes (run on a schedule).
    #[instrument(skip(self), fields(repo = "stats", operation = "vacuum"))]
    pub async fn vacuum(&self) -> Result<(), StatsError> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    fn parse_bucket_row(row: &sqlx::sqlite::SqliteRow) -> Result<AggregateBucket, StatsError> {
        Ok(AggregateBucket {
            service_name: row.try_get("service_name")?,
            bucket_start: row.try_get("bucket_start")?,
            granularity_seconds: row.try_get("granularity_seconds")?,
            usage_count: row.try_get("usage_count")?,
            total_ms: row.try_get("total_ms")?,
            mean_ms: row.try_get("mean_ms")?,
        })
    }

    fn parse_totals_row(row: &sqlx::sqlite::SqliteRow) -> Result<ServiceTotals, StatsError> {
        Ok(ServiceTotals {
            service_name: row.try_get("service_name")?,
            usage_count: row.try_get("usage_count")?,
            total_ms: row.try_get("total_ms")?,
            mean_ms: row.try_get("mean_ms")?,
        })
    }
}
