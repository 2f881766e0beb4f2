// Timer-driven scheduler: each tick dispatches due jobs as concurrent tasks.
// The same job is never in flight twice; last-run advances before execution.
// VACUUM runs on a configurable schedule (cron expression or fixed interval).

use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::jobs::{self, JobContext};
use crate::models::{IntervalUnit, Job, JobKind};
use crate::stats_repo::StatsRepo;

/// Milliseconds since the Unix epoch. Falls back to 0 on a clock error.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_else(|e| {
            warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}

struct JobSlot {
    job: Mutex<Job>,
    in_flight: AtomicBool,
}

/// Holds job definitions. Jobs are never removed during normal operation;
/// a job that should not run is disabled instead.
pub struct JobStore {
    slots: Vec<Arc<JobSlot>>,
}

impl JobStore {
    pub fn new(jobs: Vec<Job>) -> Self {
        let slots = jobs
            .into_iter()
            .map(|job| {
                Arc::new(JobSlot {
                    job: Mutex::new(job),
                    in_flight: AtomicBool::new(false),
                })
            })
            .collect();
        Self { slots }
    }

    /// The two statistics jobs, with intervals and enable flags from config.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(vec![
            Job {
                name: "stats.process-raw-times".into(),
                kind: JobKind::ProcessRawTimes,
                interval: config.raw_stats_interval_secs,
                unit: IntervalUnit::Seconds,
                enabled: config.raw_stats_enabled,
                last_run_ms: 0,
            },
            Job {
                name: "stats.aggregate-by-minute".into(),
                kind: JobKind::AggregateByMinute,
                interval: config.per_minute_aggr_interval_secs,
                unit: IntervalUnit::Seconds,
                enabled: config.per_minute_aggr_enabled,
                last_run_ms: 0,
            },
        ])
    }

    /// Snapshot of current job definitions (introspection and tests).
    pub fn jobs(&self) -> Vec<Job> {
        self.slots
            .iter()
            .map(|s| s.job.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect()
    }
}

/// Clears the in-flight flag when a job run finishes, fails, times out,
/// or panics.
struct InFlightGuard(Arc<JobSlot>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

/// Runs one dispatched job. The production executor is [`JobContext`]; the
/// seam lets dispatch be driven without a backing store.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        kind: JobKind,
        now_ms: i64,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl JobExecutor for JobContext {
    async fn execute(&self, kind: JobKind, now_ms: i64) -> anyhow::Result<()> {
        jobs::execute(kind, self, now_ms).await
    }
}

pub struct Scheduler<E: JobExecutor = JobContext> {
    store: JobStore,
    executor: Arc<E>,
    job_timeout: Duration,
}

impl<E: JobExecutor> Scheduler<E> {
    pub fn new(store: JobStore, executor: Arc<E>, job_timeout_secs: u64) -> Self {
        Self {
            store,
            executor,
            job_timeout: Duration::from_secs(job_timeout_secs),
        }
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.store.jobs()
    }

    /// Dispatch every enabled job whose interval has elapsed. Last-run is
    /// advanced to `now_ms` before the executor starts, so a slow run is not
    /// re-dispatched at the next tick; an already-in-flight job is skipped
    /// without touching its last-run. Returns handles for the dispatched runs.
    pub fn tick(&self, now_ms: i64) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for slot in &self.store.slots {
            let (name, kind) = {
                let mut job = slot.job.lock().unwrap_or_else(|e| e.into_inner());
                if !job.is_due(now_ms) {
                    continue;
                }
                if slot
                    .in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    debug!(job = %job.name, "previous run still in flight; skipping");
                    continue;
                }
                job.last_run_ms = now_ms;
                (job.name.clone(), job.kind)
            };

            let guard = InFlightGuard(slot.clone());
            let executor = self.executor.clone();
            let timeout = self.job_timeout;
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                match tokio::time::timeout(timeout, executor.execute(kind, now_ms)).await {
                    Err(_) => warn!(
                        job = %name,
                        timeout_secs = timeout.as_secs(),
                        "job run timed out; abandoned"
                    ),
                    Ok(Err(e)) => {
                        let err = crate::error::StatsError::Execution {
                            job: name.clone(),
                            source: e,
                        };
                        warn!(error = %err, "job run failed");
                    }
                    Ok(Ok(())) => debug!(job = %name, "job run complete"),
                }
            }));
        }
        handles
    }
}

/// Timing for the scheduler worker loop.
#[derive(Debug, Clone)]
pub struct SchedulerWorkerConfig {
    pub tick_interval_ms: u64,
    /// Optional cron expression for VACUUM (e.g. "0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

/// Spawns the scheduler worker. Returns a join handle.
pub fn spawn<E: JobExecutor>(
    scheduler: Arc<Scheduler<E>>,
    repo: Arc<StatsRepo>,
    config: SchedulerWorkerConfig,
    shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(scheduler, repo, config, shutdown_rx).await;
    })
}

#[instrument(skip(scheduler, repo, shutdown_rx), fields(tick_interval_ms = config.tick_interval_ms))]
async fn run<E: JobExecutor>(
    scheduler: Arc<Scheduler<E>>,
    repo: Arc<StatsRepo>,
    config: SchedulerWorkerConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut tick = tokio::time::interval(Duration::from_millis(config.tick_interval_ms));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let dispatched = scheduler.tick(now_ms());
                if !dispatched.is_empty() {
                    debug!(dispatched = dispatched.len(), "jobs dispatched");
                }
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = repo.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
            _ = &mut shutdown_rx => {
                debug!("Scheduler shutting down");
                break;
            }
        }
    }
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: SchedulerWorkerConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}
