use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pv_client::db::HistoryFilter;
use pv_ingest::{
    config::AppConfig,
    export::{export, ExportFormat},
    observability,
    sinks::HistoryStore,
};
use time::OffsetDateTime;

/// Query, export and prune the PV readings history.
#[derive(Debug, Parser)]
#[command(name = "pv_history", version)]
struct Args {
    /// Config file (defaults to $PV_INGEST_CONFIG or pv-ingest.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write readings of the last N hours as CSV or JSON.
    Export {
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        #[arg(long, default_value_t = 24)]
        hours: u32,
        /// Keep only the newest N rows.
        #[arg(long)]
        limit: Option<u32>,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Summary statistics over the last N hours.
    Stats {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    /// Delete readings older than N days.
    Prune {
        #[arg(long)]
        older_than_days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    observability::init_tracing(cfg.logging.file.as_deref())?;

    let store = HistoryStore::open(&cfg.store).await?;

    match args.command {
        Command::Export {
            format,
            hours,
            limit,
            out,
        } => {
            let mut filter = HistoryFilter::last_hours(hours);
            filter.limit = limit;
            let rows = store.query(&filter).await?;
            let bytes = export(&rows, format)?;

            match out {
                Some(path) => {
                    std::fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(rows = rows.len(), path = %path.display(), %format, "history exported");
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&bytes)?;
                }
            }
        }
        Command::Stats { hours } => {
            let stats = store.statistics(&HistoryFilter::last_hours(hours)).await?;
            let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
            println!("readings:          {}", stats.reading_count);
            println!("avg power (kW):    {}", fmt(stats.avg_power));
            println!("max power (kW):    {}", fmt(stats.max_power));
            println!("min power (kW):    {}", fmt(stats.min_power));
            println!("avg efficiency (%): {}", fmt(stats.avg_efficiency));
            println!("avg energy today (kWh): {}", fmt(stats.avg_daily_energy));
        }
        Command::Prune { older_than_days } => {
            let cutoff = OffsetDateTime::now_utc() - time::Duration::days(i64::from(older_than_days));
            let deleted = store.delete_older_than(cutoff).await?;
            println!("deleted {deleted} readings");
        }
    }

    store.close().await;
    Ok(())
}
