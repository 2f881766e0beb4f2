// Job executors. ProcessRawTimes drains raw samples into per-minute partial
// sums; AggregateByMinute merges those sums into the bucket table.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::models::JobKind;
use crate::stats_repo::StatsRepo;
use crate::stats_repo::aggregation::{self, PartialBucket};

/// Hand-off between the two executors: per-(service, minute) sums buffered
/// by ProcessRawTimes until AggregateByMinute drains them. A drained sum is
/// gone from the buffer, so a repeated run cannot double-count.
#[derive(Default)]
pub struct MinuteBuffer {
    inner: Mutex<BTreeMap<(String, i64), (i64, f64)>>,
}

impl MinuteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&self, partials: Vec<PartialBucket>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for p in partials {
            let entry = inner
                .entry((p.service_name, p.bucket_start))
                .or_insert((0, 0.0));
            entry.0 += p.usage_count;
            entry.1 += p.total_ms;
        }
    }

    /// Take everything, sorted by (service_name, bucket_start).
    pub fn drain(&self) -> Vec<PartialBucket> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *inner)
            .into_iter()
            .map(|((service_name, bucket_start), (usage_count, total_ms))| PartialBucket {
                service_name,
                bucket_start,
                usage_count,
                total_ms,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared dependencies handed to every executor run.
#[derive(Clone)]
pub struct JobContext {
    pub repo: Arc<StatsRepo>,
    pub buffer: Arc<MinuteBuffer>,
    /// Max raw samples drained per ProcessRawTimes run.
    pub raw_stats_batch: i64,
}

/// Dispatch an executor by kind. `now_ms` is the scheduler's tick time.
pub async fn execute(kind: JobKind, ctx: &JobContext, now_ms: i64) -> anyhow::Result<()> {
    match kind {
        JobKind::ProcessRawTimes => process_raw_times(ctx, now_ms).await,
        JobKind::AggregateByMinute => aggregate_by_minute(ctx).await,
    }
}

/// Drain raw samples older than the watermark (start of the current minute)
/// and buffer them as per-minute partial sums. Safe with zero samples.
pub async fn process_raw_times(ctx: &JobContext, now_ms: i64) -> anyhow::Result<()> {
    let watermark = aggregation::bucket_start_for(now_ms);
    let samples = ctx.repo.drain_raw_times(watermark, ctx.raw_stats_batch).await?;
    if samples.is_empty() {
        debug!(watermark, "no raw samples below watermark");
        return Ok(());
    }
    let drained = samples.len();
    let partials = aggregation::partial_sums(&samples);
    let buckets = partials.len();
    ctx.buffer.merge(partials);
    info!(drained, buckets, watermark, "raw times processed");
    Ok(())
}

/// Upsert buffered per-minute sums into the bucket table. On a store failure
/// the sums go back into the buffer for the next run.
pub async fn aggregate_by_minute(ctx: &JobContext) -> anyhow::Result<()> {
    let partials = ctx.buffer.drain();
    if partials.is_empty() {
        return Ok(());
    }
    let buckets = partials.len();
    if let Err(e) = ctx.repo.upsert_buckets(&partials).await {
        ctx.buffer.merge(partials);
        return Err(e.into());
    }
    info!(buckets, "per-minute aggregation");
    Ok(())
}
