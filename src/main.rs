use anyhow::Result;
use std::sync::Arc;
use svcstats::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let repo = Arc::new(
        stats_repo::StatsRepo::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
        )
        .await?,
    );
    repo.init().await?;

    let buffer = Arc::new(jobs::MinuteBuffer::new());
    let ctx = jobs::JobContext {
        repo: repo.clone(),
        buffer,
        raw_stats_batch: app_config.scheduler.raw_stats_batch,
    };
    let store = scheduler::JobStore::from_config(&app_config.scheduler);
    for job in store.jobs() {
        tracing::info!(
            job = %job.name,
            interval = job.interval,
            unit = ?job.unit,
            enabled = job.enabled,
            "job configured"
        );
    }
    let sched = Arc::new(scheduler::Scheduler::new(
        store,
        Arc::new(ctx),
        app_config.scheduler.job_timeout_secs,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let worker_handle = scheduler::spawn(
        sched,
        repo.clone(),
        scheduler::SchedulerWorkerConfig {
            tick_interval_ms: app_config.scheduler.tick_interval_ms,
            vacuum_schedule: app_config.database.vacuum_schedule.clone(),
            vacuum_interval_secs: app_config.database.vacuum_interval_secs,
        },
        shutdown_rx,
    );

    let query = Arc::new(query::StatsQuery::new(
        repo.clone(),
        app_config.attention.clone(),
    ));
    let app = routes::app(repo, query);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let in_container = std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("1");

    if in_container {
        // In Docker: run server until error or SIGTERM (no signal handler; avoids immediate exit)
        axum::serve(listener, app).await?;
    } else {
        tokio::select! {
            result = axum::serve(listener, app) => {
                result?;
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(_) => {
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c().await
                }
            } => {
                tracing::info!("Received shutdown signal");
                let _ = shutdown_tx.send(());
                let _ = worker_handle.await;
            }
        }
    }

    Ok(())
}
