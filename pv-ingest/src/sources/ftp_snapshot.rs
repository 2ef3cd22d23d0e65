use std::{
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use suppaftp::{types::FileType, FtpError, FtpStream};
use time::{macros::format_description, OffsetDateTime};

use crate::{
    config::FtpSourceConfig,
    pipeline::{PipelineError, Source},
};

/// Downloads the inverter snapshot file over FTP.
///
/// Every call opens a fresh authenticated session and closes it again before
/// returning. The payload is also written to the local snapshot path (and the
/// archive directory, if configured); those copies are best effort.
#[derive(Debug, Clone)]
pub struct FtpSnapshotSource {
    cfg: FtpSourceConfig,
}

/// An open FTP session; `QUIT` is sent when it goes out of scope.
struct Session {
    stream: FtpStream,
}

impl Session {
    fn connect(cfg: &FtpSourceConfig) -> Result<Self, PipelineError> {
        let addr = resolve(&cfg.host, cfg.port)?;
        let timeout = Duration::from_secs(cfg.connect_timeout_secs);

        // Socket timeouts go on before the greeting is read.
        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .and_then(|tcp| {
                tcp.set_read_timeout(Some(timeout))?;
                tcp.set_write_timeout(Some(timeout))?;
                Ok(tcp)
            })
            .map_err(|e| PipelineError::Connectivity(format!("connect to {addr} failed: {e}")))?;
        let stream = FtpStream::connect_with_stream(tcp)
            .map_err(|e| PipelineError::Connectivity(format!("no greeting from {addr}: {e}")))?;

        // Wrapped before login so a rejected login still ends with QUIT.
        let mut session = Session { stream };
        session
            .stream
            .login(cfg.user.as_str(), cfg.password.as_str())
            .map_err(|e| match e {
                FtpError::ConnectionError(io) => {
                    PipelineError::Connectivity(format!("connection lost during login to {addr}: {io}"))
                }
                e => PipelineError::Auth(format!("login as '{}' rejected: {e}", cfg.user)),
            })?;
        Ok(session)
    }

    fn retrieve(&mut self, remote_path: &str) -> Result<Vec<u8>, PipelineError> {
        let (dir, name) = split_remote_path(remote_path);
        if let Some(dir) = dir {
            self.stream
                .cwd(dir)
                .map_err(|e| PipelineError::Transfer(format!("cannot change into '{dir}': {e}")))?;
        }
        self.stream
            .transfer_type(FileType::Binary)
            .map_err(|e| PipelineError::Transfer(format!("cannot switch to binary mode: {e}")))?;
        let buf = self
            .stream
            .retr_as_buffer(name)
            .map_err(|e| PipelineError::Transfer(format!("RETR {name} failed: {e}")))?;
        Ok(buf.into_inner())
    }

    fn list(&mut self, path: Option<&str>) -> Result<Vec<String>, PipelineError> {
        self.stream
            .nlst(path)
            .map_err(|e| PipelineError::Transfer(format!("NLST failed: {e}")))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.stream.quit() {
            tracing::debug!(error = %e, "ftp quit failed");
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, PipelineError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| PipelineError::Connectivity(format!("cannot resolve {host}: {e}")))?
        .next()
        .ok_or_else(|| PipelineError::Connectivity(format!("{host} resolved to no addresses")))
}

/// `pvdaten/pv.csv` → (`Some("pvdaten")`, `"pv.csv"`).
fn split_remote_path(remote_path: &str) -> (Option<&str>, &str) {
    match remote_path.rsplit_once('/') {
        Some((dir, name)) if !dir.is_empty() => (Some(dir), name),
        Some((_, name)) => (Some("/"), name),
        None => (None, remote_path),
    }
}

impl FtpSnapshotSource {
    pub fn new(cfg: FtpSourceConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &FtpSourceConfig {
        &self.cfg
    }

    /// List remote entries (`NLST`), for diagnosing the remote layout.
    pub async fn list_remote(&self, path: Option<String>) -> Result<Vec<String>, PipelineError> {
        let cfg = self.cfg.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = Session::connect(&cfg)?;
            session.list(path.as_deref())
        })
        .await
        .map_err(|e| PipelineError::Transfer(format!("listing task failed: {e}")))?
    }

    async fn keep_local_copies(&self, payload: &[u8]) {
        if let Some(path) = &self.cfg.snapshot_path {
            if let Err(e) = write_replacing(path, payload).await {
                tracing::warn!(error = %e, path = %path.display(), "failed to write local snapshot");
            }
        }

        if let Some(dir) = &self.cfg.archive_dir {
            match archive_path(dir) {
                Ok(path) => {
                    let res = match tokio::fs::create_dir_all(dir).await {
                        Ok(()) => tokio::fs::write(&path, payload).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = res {
                        tracing::warn!(error = %e, path = %path.display(), "failed to archive snapshot");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to name archived snapshot"),
            }
        }
    }
}

/// Write through a temporary sibling and rename, so readers never see a
/// half-written snapshot.
async fn write_replacing(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("part");
    tokio::fs::write(&tmp, payload).await?;
    tokio::fs::rename(&tmp, path).await
}

fn archive_path(dir: &Path) -> Result<PathBuf, time::error::Format> {
    let stamp = OffsetDateTime::now_utc().format(format_description!("[year][month][day][hour][minute][second]"))?;
    Ok(dir.join(format!("pv_{stamp}.csv")))
}

#[async_trait::async_trait]
impl Source for FtpSnapshotSource {
    async fn fetch(&self) -> Result<Vec<u8>, PipelineError> {
        let cfg = self.cfg.clone();
        let started = Instant::now();

        // suppaftp's client is blocking; keep it off the async workers.
        let result = tokio::task::spawn_blocking(move || {
            let mut session = Session::connect(&cfg)?;
            session.retrieve(&cfg.remote_path)
        })
        .await
        .map_err(|e| PipelineError::Transfer(format!("fetch task failed: {e}")))
        .and_then(|r| r);

        metrics::histogram!("pv_fetch_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(payload) => {
                metrics::counter!("pv_fetch_total").increment(1);
                tracing::debug!(
                    host = %self.cfg.host,
                    remote_path = %self.cfg.remote_path,
                    bytes = payload.len(),
                    "snapshot downloaded"
                );
                self.keep_local_copies(&payload).await;
                Ok(payload)
            }
            Err(e) => {
                metrics::counter!("pv_fetch_errors_total", "kind" => e.kind()).increment(1);
                Err(e)
            }
        }
    }
}
