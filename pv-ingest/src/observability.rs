use std::{fs::OpenOptions, path::Path, sync::Mutex};

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Used when `RUST_LOG` is unset. Each binary logs under its own crate name.
pub const DEFAULT_FILTER: &str = "pv_ingest=info,pv_history=info,pv_list_remote=info,warn";

/// Install the global subscriber: stdout, plus an append-only log file when
/// `log_file` is given.
pub fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_target(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_enables_info_for_every_binary() {
        let filter = EnvFilter::try_new(DEFAULT_FILTER).unwrap();
        let rendered = filter.to_string().to_ascii_lowercase();
        for target in ["pv_ingest=info", "pv_history=info", "pv_list_remote=info"] {
            assert!(rendered.contains(target), "{target} missing from {rendered}");
        }
    }
}
