use pv_client::domain::Reading;

/// Every failure the acquisition pipeline can surface.
///
/// Fetch, parse and storage errors keep their kind all the way up to the
/// caller; nothing in between re-wraps them.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("source unreachable: {0}")]
    Connectivity(String),
    #[error("credentials rejected: {0}")]
    Auth(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("malformed snapshot: {0}")]
    Format(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("export error: {0}")]
    Export(String),
}

impl PipelineError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Connectivity(_) => "connectivity",
            PipelineError::Auth(_) => "auth",
            PipelineError::Transfer(_) => "transfer",
            PipelineError::Format(_) => "format",
            PipelineError::Storage(_) => "storage",
            PipelineError::Export(_) => "export",
        }
    }
}

/// Retrieves one raw snapshot from the remote data source.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, PipelineError>;
}

/// Durable destination for readings.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Persist one reading, returning its row id.
    async fn append(&self, reading: &Reading) -> Result<i64, PipelineError>;
}

#[async_trait::async_trait]
impl<T: Source + ?Sized> Source for std::sync::Arc<T> {
    async fn fetch(&self) -> Result<Vec<u8>, PipelineError> {
        (**self).fetch().await
    }
}

#[async_trait::async_trait]
impl<T: Sink + ?Sized> Sink for std::sync::Arc<T> {
    async fn append(&self, reading: &Reading) -> Result<i64, PipelineError> {
        (**self).append(reading).await
    }
}
