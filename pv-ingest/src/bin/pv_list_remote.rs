use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use pv_ingest::{config::AppConfig, observability, pipeline::PipelineError, sources::FtpSnapshotSource};

/// List the remote FTP directory holding the PV snapshot.
#[derive(Debug, Parser)]
#[command(name = "pv_list_remote", version)]
struct Args {
    /// Remote directory; defaults to the directory of `source.remote_path`.
    path: Option<String>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    observability::init_tracing(cfg.logging.file.as_deref())?;

    let path = args.path.or_else(|| {
        cfg.source
            .remote_path
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .filter(|dir| !dir.is_empty())
    });

    let source = FtpSnapshotSource::new(cfg.source.clone());
    match source.list_remote(path.clone()).await {
        Ok(entries) => {
            println!("{}:{} {}", cfg.source.host, cfg.source.port, path.as_deref().unwrap_or("."));
            for entry in entries {
                println!("  {entry}");
            }
            Ok(())
        }
        Err(PipelineError::Connectivity(e)) => {
            anyhow::bail!("source unreachable ({e}); check network/VPN access to {}", cfg.source.host)
        }
        Err(e) => Err(e.into()),
    }
}
