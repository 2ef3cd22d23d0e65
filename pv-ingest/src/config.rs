use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};

pub const ENV_CONFIG_PATH: &str = "PV_INGEST_CONFIG";
pub const ENV_FTP_HOST: &str = "PV_FTP_HOST";
pub const ENV_FTP_USER: &str = "PV_FTP_USER";
pub const ENV_FTP_PASSWORD: &str = "PV_FTP_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
pub struct FtpSourceConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Remote file, optionally prefixed by the directory to `CWD` into.
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Local working copy of the last payload, overwritten on every fetch.
    /// An empty string turns it off.
    #[serde(default = "default_snapshot_path", deserialize_with = "path_or_off")]
    pub snapshot_path: Option<PathBuf>,
    /// If set, every fetched payload is also kept here under a timestamped name.
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Number of cycles to run; 0 runs until stopped.
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Append-only log file in addition to stdout.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: FtpSourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_port() -> u16 {
    21
}

fn default_remote_path() -> String {
    "pvdaten/pv.csv".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_snapshot_path() -> Option<PathBuf> {
    Some(PathBuf::from("pv.csv"))
}

fn path_or_off<'de, D>(de: D) -> Result<Option<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let path = PathBuf::deserialize(de)?;
    Ok((!path.as_os_str().is_empty()).then_some(path))
}

fn default_ttl_secs() -> u64 {
    60
}

fn default_store_path() -> PathBuf {
    PathBuf::from("pv_data.db")
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_iterations() -> u64 {
    6
}

fn default_interval_secs() -> u64 {
    10
}

impl Default for FtpSourceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            user: String::new(),
            password: String::new(),
            remote_path: default_remote_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
            snapshot_path: default_snapshot_path(),
            archive_dir: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Load from `$PV_INGEST_CONFIG` (default `pv-ingest.toml`), then apply
    /// credential overrides from the environment.
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| "pv-ingest.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&contents)?;
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents).context("invalid config")?;
        Ok(cfg)
    }

    /// Environment values win over the file for the remote host and credentials.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_FTP_HOST) {
            self.source.host = host;
        }
        if let Some(user) = lookup(ENV_FTP_USER) {
            self.source.user = user;
        }
        if let Some(password) = lookup(ENV_FTP_PASSWORD) {
            self.source.password = password;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source.host.trim().is_empty() {
            bail!("source.host must not be empty");
        }
        if self.source.user.is_empty() || self.source.password.is_empty() {
            bail!("FTP credentials missing: set source.user/source.password or {ENV_FTP_USER}/{ENV_FTP_PASSWORD}");
        }
        if self.source.remote_path.trim().is_empty() {
            bail!("source.remote_path must not be empty");
        }
        if self.source.connect_timeout_secs == 0 {
            bail!("source.connect_timeout_secs must be positive");
        }
        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be positive");
        }
        Ok(())
    }
}
