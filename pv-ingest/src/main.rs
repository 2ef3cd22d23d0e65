use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use pv_ingest::{
    config::AppConfig,
    metrics_server, observability,
    scheduler::{Scheduler, SchedulerCfg},
    sinks::HistoryStore,
    sources::FtpSnapshotSource,
    BoundedCache,
};
use tokio_util::sync::CancellationToken;

/// Poll the PV snapshot and append every reading to the history store.
#[derive(Debug, Parser)]
#[command(name = "pv-ingest", version)]
struct Args {
    /// Number of cycles to run; 0 runs until interrupted.
    #[arg(long)]
    iterations: Option<u64>,

    /// Seconds to wait between cycles.
    #[arg(long)]
    interval: Option<u64>,

    /// Config file (defaults to $PV_INGEST_CONFIG or pv-ingest.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let cfg = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    observability::init_tracing(cfg.logging.file.as_deref())?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    // A store that cannot be opened is a startup failure.
    let store = HistoryStore::open(&cfg.store).await?;

    let source = FtpSnapshotSource::new(cfg.source.clone());
    let cache = Arc::new(BoundedCache::new(source, Duration::from_secs(cfg.cache.ttl_secs)));

    let sched_cfg = SchedulerCfg {
        iterations: args.iterations.unwrap_or(cfg.scheduler.iterations),
        interval: Duration::from_secs(args.interval.unwrap_or(cfg.scheduler.interval_secs)),
    };
    let scheduler = Scheduler::new(cache, store.clone(), sched_cfg);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, finishing current cycle");
                cancel.cancel();
            }
        });
    }

    tracing::info!(
        host = %cfg.source.host,
        remote_path = %cfg.source.remote_path,
        store = %cfg.store.path.display(),
        "pv monitor starting"
    );

    scheduler.run(cancel).await;
    store.close().await;

    Ok(())
}
