use std::{sync::Arc, time::Duration};

use pv_client::domain::Reading;
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};

use crate::{
    pipeline::{PipelineError, Source},
    transform::parse_reading,
};

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// The single cached reading plus when it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub reading: Arc<Reading>,
    /// blake3 digest of the raw payload the reading was parsed from.
    pub digest: blake3::Hash,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Valid while `now - fetched_at < ttl`.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

/// Time-bounded, single-slot cache in front of a [`Source`].
///
/// At most one fetch runs at a time: callers that miss while a refresh is in
/// flight wait for it and reuse its result. Errors from the source and the
/// parser are returned unchanged, and an expired entry is never served.
pub struct BoundedCache<S> {
    source: S,
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
    refresh: Mutex<()>,
}

impl<S: Source> BoundedCache<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entry: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The current reading, fetching a new one if the cached entry is missing,
    /// expired, or `force_refresh` is set.
    pub async fn get_current(&self, force_refresh: bool) -> Result<Arc<Reading>, PipelineError> {
        self.get_current_entry(force_refresh).await.map(|e| e.reading)
    }

    pub async fn get_current_entry(&self, force_refresh: bool) -> Result<CacheEntry, PipelineError> {
        if !force_refresh {
            if let Some(entry) = self.valid_entry().await {
                metrics::counter!("pv_cache_hits_total").increment(1);
                return Ok(entry);
            }
        }

        let _gate = self.refresh.lock().await;

        // Someone else may have refreshed while we waited for the gate.
        if !force_refresh {
            if let Some(entry) = self.valid_entry().await {
                metrics::counter!("pv_cache_hits_total").increment(1);
                return Ok(entry);
            }
            self.discard_expired().await;
        }

        metrics::counter!("pv_cache_misses_total").increment(1);
        let raw = self.source.fetch().await?;
        let reading = parse_reading(&raw)?;

        let entry = CacheEntry {
            reading: Arc::new(reading),
            digest: blake3::hash(&raw),
            fetched_at: Instant::now(),
            ttl: self.ttl,
        };
        *self.entry.write().await = Some(entry.clone());
        tracing::debug!(live_power = entry.reading.live_power, "cache refreshed");

        Ok(entry)
    }

    /// The cached entry, if still valid, without touching the source.
    pub async fn peek(&self) -> Option<CacheEntry> {
        self.valid_entry().await
    }

    async fn valid_entry(&self) -> Option<CacheEntry> {
        let now = Instant::now();
        self.entry
            .read()
            .await
            .as_ref()
            .filter(|e| e.is_valid_at(now))
            .cloned()
    }

    async fn discard_expired(&self) {
        let now = Instant::now();
        let mut slot = self.entry.write().await;
        if slot.as_ref().is_some_and(|e| !e.is_valid_at(now)) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedSource;

    const R1: &str = "live_power=1.5,energy_today=4.0";
    const R2: &str = "live_power=2.5,energy_today=6.0";

    #[tokio::test(start_paused = true)]
    async fn ttl_window_scenario() {
        let source = Arc::new(ScriptedSource::ok([R1, R2]));
        let cache = BoundedCache::new(source.clone(), DEFAULT_TTL);

        let first = cache.get_current(false).await.unwrap();
        assert_eq!(first.live_power, 1.5);
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        let again = cache.get_current(false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let fresh = cache.get_current(false).await.unwrap();
        assert_eq!(fresh.live_power, 2.5);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_inclusive_of_ttl() {
        let source = Arc::new(ScriptedSource::ok([R1, R2]));
        let cache = BoundedCache::new(source.clone(), Duration::from_secs(60));

        cache.get_current(false).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        let r = cache.get_current(false).await.unwrap();
        assert_eq!(r.live_power, 2.5);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_bypasses_valid_entry() {
        let source = Arc::new(ScriptedSource::ok([R1, R2]));
        let cache = BoundedCache::new(source.clone(), DEFAULT_TTL);

        cache.get_current(false).await.unwrap();
        let forced = cache.get_current(true).await.unwrap();
        assert_eq!(forced.live_power, 2.5);
        assert_eq!(source.calls(), 2);

        // The forced result is what later readers see.
        let cached = cache.get_current(false).await.unwrap();
        assert!(Arc::ptr_eq(&forced, &cached));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_not_served_after_failed_refresh() {
        let source = Arc::new(ScriptedSource::new([
            Ok(R1.as_bytes().to_vec()),
            Err(PipelineError::Connectivity("vpn down".into())),
        ]));
        let cache = BoundedCache::new(source.clone(), DEFAULT_TTL);

        cache.get_current(false).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let err = cache.get_current(false).await.unwrap_err();
        assert_eq!(err, PipelineError::Connectivity("vpn down".into()));
        assert!(cache.peek().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_forced_refresh_keeps_valid_entry() {
        let source = Arc::new(ScriptedSource::new([
            Ok(R1.as_bytes().to_vec()),
            Err(PipelineError::Auth("530 Login incorrect".into())),
        ]));
        let cache = BoundedCache::new(source.clone(), DEFAULT_TTL);

        let first = cache.get_current(false).await.unwrap();
        assert!(matches!(cache.get_current(true).await, Err(PipelineError::Auth(_))));

        let still = cache.get_current(false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &still));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn parse_errors_propagate_unchanged() {
        let source = Arc::new(ScriptedSource::ok(["energy_today=3.0"]));
        let cache = BoundedCache::new(source, DEFAULT_TTL);
        assert!(matches!(cache.get_current(false).await, Err(PipelineError::Format(_))));
        assert!(cache.peek().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let source = Arc::new(ScriptedSource::ok([R1, R2]).with_delay(Duration::from_millis(50)));
        let cache = Arc::new(BoundedCache::new(source.clone(), DEFAULT_TTL));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_current(false).await }));
        }
        let mut readings = Vec::new();
        for h in handles {
            readings.push(h.await.unwrap().unwrap());
        }

        assert_eq!(source.calls(), 1);
        assert!(readings.iter().all(|r| Arc::ptr_eq(r, &readings[0])));
    }

    #[tokio::test]
    async fn entry_carries_payload_digest() {
        let source = Arc::new(ScriptedSource::ok([R1, R1]));
        let cache = BoundedCache::new(source, DEFAULT_TTL);
        let a = cache.get_current_entry(true).await.unwrap();
        let b = cache.get_current_entry(true).await.unwrap();
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest, blake3::hash(R1.as_bytes()));
    }
}
