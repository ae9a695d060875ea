//! TTL-cached voice catalog with single-flight fetch coalescing.
//!
//! Catalog fetches go through `moka`'s `try_get_with`, which guarantees that
//! concurrent callers for the same key share one in-flight fetch instead of
//! issuing duplicate network calls. Failure degrades in two steps: the last
//! successfully fetched catalog (stale is better than nothing), then the
//! engine's bundled static list. The system never reports zero voices.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::base::{EngineResult, Voice};

/// Default catalog TTL (~1 hour).
pub const CATALOG_TTL: Duration = Duration::from_secs(3600);

pub struct CatalogCache {
    cache: Cache<&'static str, Arc<Vec<Voice>>>,
    /// Most recent successful fetch, outliving the TTL window
    last_good: RwLock<Option<Arc<Vec<Voice>>>>,
    static_fallback: Arc<Vec<Voice>>,
}

impl CatalogCache {
    pub fn new(ttl: Duration, static_fallback: Vec<Voice>) -> Self {
        Self {
            cache: Cache::builder().max_capacity(8).time_to_live(ttl).build(),
            last_good: RwLock::new(None),
            static_fallback: Arc::new(static_fallback),
        }
    }

    /// The bundled static list for this engine.
    pub fn static_list(&self) -> Arc<Vec<Voice>> {
        self.static_fallback.clone()
    }

    /// Get the cached catalog or fetch it, coalescing concurrent fetches.
    pub async fn get_or_fetch<F, Fut>(&self, key: &'static str, fetch: F) -> Arc<Vec<Voice>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<Vec<Voice>>>,
    {
        let result = self
            .cache
            .try_get_with(key, async move {
                let voices = fetch().await?;
                if voices.is_empty() {
                    // An empty provider response is as useless as an error
                    return Err(super::base::EngineError::InvalidAudio(
                        "provider returned empty voice catalog".to_string(),
                    ));
                }
                Ok(Arc::new(voices))
            })
            .await;

        match result {
            Ok(voices) => {
                *self.last_good.write() = Some(voices.clone());
                voices
            }
            Err(e) => {
                if let Some(stale) = self.last_good.read().clone() {
                    warn!(key, error = %e, "catalog fetch failed, serving stale catalog");
                    stale
                } else {
                    debug!(key, error = %e, "catalog fetch failed, serving static list");
                    self.static_fallback.clone()
                }
            }
        }
    }

    /// Drop the TTL cache (stale copy is kept for degraded serving).
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tts::base::EngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn static_voices() -> Vec<Voice> {
        vec![Voice::new("static-voice", "Static", "en", "Female")]
    }

    #[tokio::test]
    async fn fetch_success_is_cached() {
        let catalog = CatalogCache::new(Duration::from_secs(60), static_voices());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let voices = catalog
                .get_or_fetch("test", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![Voice::new("live-voice", "Live", "en", "Male")])
                })
                .await;
            assert_eq!(voices[0].id, "live-voice");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_without_history_serves_static_list() {
        let catalog = CatalogCache::new(Duration::from_secs(60), static_voices());
        let voices = catalog
            .get_or_fetch("test", || async {
                Err(EngineError::Network("down".to_string()))
            })
            .await;
        assert_eq!(voices[0].id, "static-voice");
    }

    #[tokio::test]
    async fn failure_after_success_serves_stale_catalog() {
        let catalog = CatalogCache::new(Duration::from_secs(60), static_voices());

        let live = catalog
            .get_or_fetch("test", || async {
                Ok(vec![Voice::new("live-voice", "Live", "en", "Male")])
            })
            .await;
        assert_eq!(live[0].id, "live-voice");

        catalog.invalidate();

        let stale = catalog
            .get_or_fetch("test", || async {
                Err(EngineError::Network("down".to_string()))
            })
            .await;
        assert_eq!(stale[0].id, "live-voice");
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_call() {
        let catalog = Arc::new(CatalogCache::new(Duration::from_secs(60), static_voices()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let catalog = catalog.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                catalog
                    .get_or_fetch("test", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(vec![Voice::new("live-voice", "Live", "en", "Male")])
                    })
                    .await
            }));
        }
        for handle in handles {
            let voices = handle.await.unwrap();
            assert_eq!(voices[0].id, "live-voice");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_catalog_counts_as_failure() {
        let catalog = CatalogCache::new(Duration::from_secs(60), static_voices());
        let voices = catalog.get_or_fetch("test", || async { Ok(vec![]) }).await;
        assert_eq!(voices[0].id, "static-voice");
    }
}
