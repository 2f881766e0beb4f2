// Shared test helpers

use std::sync::Arc;

use svcstats::models::RawTimingSample;
use svcstats::stats_repo::StatsRepo;
use svcstats::stats_repo::aggregation::PartialBucket;
use tempfile::TempDir;

pub async fn test_repo() -> (TempDir, Arc<StatsRepo>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.db");
    let repo = StatsRepo::connect(path.to_str().unwrap(), 2).await.unwrap();
    repo.init().await.unwrap();
    (dir, Arc::new(repo))
}

pub fn sample(service: &str, timestamp: i64, duration_ms: f64) -> RawTimingSample {
    RawTimingSample {
        service_name: service.into(),
        timestamp,
        duration_ms,
    }
}

pub fn partial(service: &str, bucket_start: i64, usage_count: i64, total_ms: f64) -> PartialBucket {
    PartialBucket {
        service_name: service.into(),
        bucket_start,
        usage_count,
        total_ms,
    }
}
