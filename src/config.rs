use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub attention: AttentionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Optional cron expression for VACUUM (e.g. "0 3 * * *" = 03:00 daily). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

/// Job intervals and dispatch limits for the scheduler loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Scheduler tick period.
    pub tick_interval_ms: u64,
    /// A job run exceeding this is abandoned and logged.
    pub job_timeout_secs: u64,
    /// How often ProcessRawTimes runs (seconds).
    pub raw_stats_interval_secs: u64,
    /// How often AggregateByMinute runs (seconds).
    pub per_minute_aggr_interval_secs: u64,
    /// Max raw samples drained per ProcessRawTimes run.
    pub raw_stats_batch: i64,
    pub raw_stats_enabled: bool,
    pub per_minute_aggr_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            job_timeout_secs: 300,
            raw_stats_interval_secs: 90,
            per_minute_aggr_interval_secs: 60,
            raw_stats_batch: 99_999,
            raw_stats_enabled: true,
            per_minute_aggr_enabled: true,
        }
    }
}

/// Thresholds for flagging services that need attention in top-N reports.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Mean duration (ms) at which a service counts as slow.
    pub slow_threshold_ms: f64,
    /// How many of the slowest services are checked against the threshold.
    pub top_threshold: usize,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 2000.0,
            top_threshold: 10,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.vacuum_interval_secs > 0,
            "database.vacuum_interval_secs must be > 0, got {}",
            self.database.vacuum_interval_secs
        );
        anyhow::ensure!(
            self.scheduler.tick_interval_ms > 0,
            "scheduler.tick_interval_ms must be > 0, got {}",
            self.scheduler.tick_interval_ms
        );
        anyhow::ensure!(
            self.scheduler.job_timeout_secs > 0,
            "scheduler.job_timeout_secs must be > 0, got {}",
            self.scheduler.job_timeout_secs
        );
        anyhow::ensure!(
            self.scheduler.raw_stats_interval_secs > 0,
            "scheduler.raw_stats_interval_secs must be > 0, got {}",
            self.scheduler.raw_stats_interval_secs
        );
        anyhow::ensure!(
            self.scheduler.per_minute_aggr_interval_secs > 0,
            "scheduler.per_minute_aggr_interval_secs must be > 0, got {}",
            self.scheduler.per_minute_aggr_interval_secs
        );
        anyhow::ensure!(
            self.scheduler.raw_stats_batch > 0,
            "scheduler.raw_stats_batch must be > 0, got {}",
            self.scheduler.raw_stats_batch
        );
        anyhow::ensure!(
            self.attention.slow_threshold_ms >= 0.0,
            "attention.slow_threshold_ms must be >= 0, got {}",
            self.attention.slow_threshold_ms
        );
        anyhow::ensure!(
            self.attention.top_threshold > 0,
            "attention.top_threshold must be > 0, got {}",
            self.attention.top_threshold
        );
        Ok(())
    }
}
