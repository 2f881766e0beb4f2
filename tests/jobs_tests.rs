// Executor tests: raw-times drain into the minute buffer, per-minute upsert,
// and idempotent re-runs over the same window.

mod common;

use std::sync::Arc;

use common::{sample, test_repo};
use svcstats::jobs::{self, JobContext, MinuteBuffer};
use svcstats::models::MINUTE_MS;

fn ctx(repo: Arc<svcstats::stats_repo::StatsRepo>) -> JobContext {
    JobContext {
        repo,
        buffer: Arc::new(MinuteBuffer::new()),
        raw_stats_batch: 99_999,
    }
}

#[tokio::test]
async fn process_raw_times_with_zero_samples_is_safe() {
    let (_dir, repo) = test_repo().await;
    let ctx = ctx(repo);
    jobs::process_raw_times(&ctx, 10 * MINUTE_MS).await.unwrap();
    assert!(ctx.buffer.is_empty());
}

#[tokio::test]
async fn process_raw_times_leaves_current_minute_alone() {
    let (_dir, repo) = test_repo().await;
    let ctx = ctx(repo.clone());
    let now = 3 * MINUTE_MS + 30_000;
    repo.record_raw_times(&[
        sample("Orders", 2 * MINUTE_MS + 100, 50.0),
        sample("Orders", 3 * MINUTE_MS + 100, 60.0),
    ])
    .await
    .unwrap();

    jobs::process_raw_times(&ctx, now).await.unwrap();
    // One closed-minute sample buffered; the in-progress minute still pending.
    assert_eq!(ctx.buffer.len(), 1);
    assert_eq!(repo.raw_times_pending().await.unwrap(), 1);
}

#[tokio::test]
async fn pipeline_aggregates_orders_scenario() {
    let (_dir, repo) = test_repo().await;
    let ctx = ctx(repo.clone());
    let minute = 7 * MINUTE_MS;
    repo.record_raw_times(&[
        sample("Orders", minute + 1_000, 100.0),
        sample("Orders", minute + 2_000, 200.0),
        sample("Orders", minute + 3_000, 300.0),
    ])
    .await
    .unwrap();

    let now = minute + MINUTE_MS + 5_000;
    jobs::process_raw_times(&ctx, now).await.unwrap();
    jobs::aggregate_by_minute(&ctx).await.unwrap();

    let buckets = repo.range_query(Some("Orders"), 0, i64::MAX).await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].bucket_start, minute);
    assert_eq!(buckets[0].usage_count, 3);
    assert_eq!(buckets[0].total_ms, 600.0);
    assert_eq!(buckets[0].mean_ms, 200.0);

    // Raw samples were consumed.
    assert_eq!(repo.raw_times_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn rerunning_both_jobs_leaves_buckets_identical() {
    let (_dir, repo) = test_repo().await;
    let ctx = ctx(repo.clone());
    let minute = 9 * MINUTE_MS;
    repo.record_raw_times(&[
        sample("Orders", minute + 100, 100.0),
        sample("Billing", minute + 200, 40.0),
    ])
    .await
    .unwrap();

    let now = minute + 2 * MINUTE_MS;
    jobs::process_raw_times(&ctx, now).await.unwrap();
    jobs::aggregate_by_minute(&ctx).await.unwrap();
    let first = repo.range_query(None, 0, i64::MAX).await.unwrap();

    // Same window again: the samples are gone and the buffer is empty,
    // so nothing is double-counted.
    jobs::process_raw_times(&ctx, now).await.unwrap();
    jobs::aggregate_by_minute(&ctx).await.unwrap();
    let second = repo.range_query(None, 0, i64::MAX).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn aggregate_with_empty_buffer_is_a_no_op() {
    let (_dir, repo) = test_repo().await;
    let ctx = ctx(repo.clone());
    jobs::aggregate_by_minute(&ctx).await.unwrap();
    assert!(repo.range_query(None, 0, i64::MAX).await.unwrap().is_empty());
}

#[test]
fn minute_buffer_merges_and_drains_once() {
    let buffer = MinuteBuffer::new();
    buffer.merge(vec![
        common::partial("Orders", 0, 2, 100.0),
        common::partial("Orders", 0, 1, 50.0),
        common::partial("Billing", MINUTE_MS, 1, 10.0),
    ]);
    assert_eq!(buffer.len(), 2);

    let drained = buffer.drain();
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0].service_name, "Billing");
    assert_eq!(drained[1].service_name, "Orders");
    assert_eq!(drained[1].usage_count, 3);
    assert_eq!(drained[1].total_ms, 150.0);

    assert!(buffer.is_empty());
    assert!(buffer.drain().is_empty());
}
