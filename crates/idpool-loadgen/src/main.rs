#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::bail;
use clap::Parser;
use config::{CliArgs, LoadgenConfig};
use futures::future::try_join_all;
use idpool::{Error, IdPoolAsyncExt, MemoryIdAuthority, SimpleBlockSizer, StandardIdPool};
use telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

type Pool = StandardIdPool<MemoryIdAuthority>;

/// What one task got out of the pool.
#[derive(Debug, Default)]
struct TaskReport {
    ids: Vec<u64>,
    retries: u64,
    /// The error that ended the task before its quota, if any.
    stopped: Option<Error>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = LoadgenConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let authority = MemoryIdAuthority::new()
        .with_capacity(config.authority_capacity)
        .with_latency(config.authority_latency);
    let pool = Arc::new(StandardIdPool::with_sizer(
        authority,
        config.pool.clone(),
        SimpleBlockSizer::new(config.block_size),
    ));

    let watcher = tokio::spawn(close_on_shutdown(Arc::clone(&pool)));

    let started = Instant::now();
    let tasks: Vec<_> = (0..config.tasks)
        .map(|_| {
            tokio::spawn(drive(
                Arc::clone(&pool),
                config.ids_per_task,
                config.max_retries,
            ))
        })
        .collect();
    let reports = try_join_all(tasks).await?;
    let elapsed = started.elapsed();
    watcher.abort();

    report(&pool, &config, &reports, elapsed)?;
    pool.close();
    Ok(())
}

/// Draws `quota` IDs, retrying transient failures up to `max_retries` times
/// in a row.
async fn drive(pool: Arc<Pool>, quota: u64, max_retries: u32) -> TaskReport {
    let mut report = TaskReport {
        ids: Vec::with_capacity(usize::try_from(quota).unwrap_or(0)),
        ..TaskReport::default()
    };
    let mut consecutive = 0;

    while (report.ids.len() as u64) < quota {
        match pool.next_id_async().await {
            Ok(id) => {
                report.ids.push(id);
                consecutive = 0;
            }
            Err(e) if e.is_retryable() && consecutive < max_retries => {
                tracing::debug!("Retrying after transient failure: {e}");
                report.retries += 1;
                consecutive += 1;
            }
            Err(e) => {
                report.stopped = Some(e);
                break;
            }
        }
    }
    report
}

fn report(
    pool: &Pool,
    config: &LoadgenConfig,
    reports: &[TaskReport],
    elapsed: Duration,
) -> anyhow::Result<()> {
    let upper = config.pool.id_upper_bound();
    let issued: usize = reports.iter().map(|r| r.ids.len()).sum();
    let retries: u64 = reports.iter().map(|r| r.retries).sum();

    let mut seen = HashSet::with_capacity(issued);
    let mut duplicates = 0usize;
    let mut over_ceiling = 0usize;
    for &id in reports.iter().flat_map(|r| &r.ids) {
        if !seen.insert(id) {
            duplicates += 1;
        }
        if id >= upper {
            over_ceiling += 1;
        }
    }

    let mut exhausted = 0usize;
    let mut closed = 0usize;
    let mut failed = 0usize;
    for stopped in reports.iter().filter_map(|r| r.stopped.as_ref()) {
        match stopped {
            Error::PoolExhausted { .. } => exhausted += 1,
            Error::Closed { .. } => closed += 1,
            e => {
                tracing::warn!("Task gave up: {e}");
                failed += 1;
            }
        }
    }

    let throughput = issued as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    tracing::info!(
        issued,
        requested = config.total_ids,
        retries,
        exhausted,
        closed,
        failed,
        "Issued {issued} ids in {elapsed:?} ({throughput:.0} ids/s)"
    );
    tracing::info!(stats = ?pool.stats(), "Final pool state");

    if duplicates > 0 {
        bail!("{duplicates} duplicate ids were issued");
    }
    if over_ceiling > 0 {
        bail!("{over_ceiling} ids at or above the upper bound {upper} were issued");
    }
    if failed > 0 {
        bail!("{failed} tasks stopped on repeated allocation failures");
    }
    Ok(())
}

fn log_startup_info(config: &LoadgenConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting load generator with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting load generator: {} tasks x {} ids, block size {}",
            config.tasks,
            config.ids_per_task,
            config.block_size
        );
    }
}

async fn close_on_shutdown(pool: Arc<Pool>) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Closing pool, in-flight tasks will stop");
    pool.close();
}
