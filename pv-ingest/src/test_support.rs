use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use pv_client::domain::Reading;
use tokio_util::sync::CancellationToken;

use crate::pipeline::{PipelineError, Sink, Source};

/// Source that replays a fixed script of fetch results.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Vec<u8>, PipelineError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    cancel_on_fetch: Option<CancellationToken>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Result<Vec<u8>, PipelineError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
            delay: None,
            cancel_on_fetch: None,
        }
    }

    pub fn ok<'a>(payloads: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(payloads.into_iter().map(|p| Ok(p.as_bytes().to_vec())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancel `token` from inside the first fetch.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_fetch = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Source for ScriptedSource {
    async fn fetch(&self) -> Result<Vec<u8>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_fetch {
            token.cancel();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::Connectivity("script exhausted".into())))
    }
}

/// Sink that always reports a broken store.
pub struct BrokenSink;

#[async_trait::async_trait]
impl Sink for BrokenSink {
    async fn append(&self, _reading: &Reading) -> Result<i64, PipelineError> {
        Err(PipelineError::Storage("disk I/O error".into()))
    }
}

/// Sink that keeps appended readings in memory.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<Vec<Reading>>,
}

impl MemorySink {
    pub fn rows(&self) -> Vec<Reading> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn append(&self, reading: &Reading) -> Result<i64, PipelineError> {
        let mut rows = self.rows.lock().unwrap();
        rows.push(reading.clone());
        Ok(rows.len() as i64)
    }
}
