use std::sync::Arc;

use pv_client::{
    db::{HistoryFilter, ReadingStatistics},
    domain::Reading,
};

use crate::{
    cache::BoundedCache,
    export::{export, ExportFormat},
    pipeline::{PipelineError, Source},
    sinks::HistoryStore,
};

/// Read-side entry point for a dashboard or any other interactive caller.
///
/// Current data comes through the cache (cached values are fine here);
/// history and exports come straight from the store. Nothing here writes
/// rows: the scheduler is the only writer.
pub struct LiveDataService<S> {
    cache: Arc<BoundedCache<S>>,
    store: HistoryStore,
}

impl<S: Source> LiveDataService<S> {
    pub fn new(cache: Arc<BoundedCache<S>>, store: HistoryStore) -> Self {
        Self { cache, store }
    }

    /// Latest reading. Fails with the fetch/parse error when the live source
    /// cannot be reached; there is no substitute data.
    pub async fn current(&self, force_refresh: bool) -> Result<Arc<Reading>, PipelineError> {
        self.cache.get_current(force_refresh).await.inspect_err(|e| {
            tracing::warn!(kind = e.kind(), error = %e, "live data unavailable");
        })
    }

    pub async fn history(&self, filter: &HistoryFilter) -> Result<Vec<Reading>, PipelineError> {
        self.store.query(filter).await
    }

    pub async fn statistics(&self, filter: &HistoryFilter) -> Result<ReadingStatistics, PipelineError> {
        self.store.statistics(filter).await
    }

    pub async fn export(&self, filter: &HistoryFilter, format: ExportFormat) -> Result<Vec<u8>, PipelineError> {
        let rows = self.store.query(filter).await?;
        export(&rows, format)
    }
}
