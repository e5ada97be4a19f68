//! Proxy core: cache lookup and miss-fill
//!
//! [`ProxyCore::fetch`] serves an object from the cache when it can and
//! otherwise fetches it from the object store, falling back once to the
//! directory index (`key/index.html`) when the literal key does not exist.

use crate::cache::CacheStore;
use crate::error::{ProxyError, Result};
use crate::inflight::{FetchRole, InFlightTracker};
use crate::key_resolver::{self, CacheKey};
use crate::metrics::ProxyMetrics;
use crate::object_store::{FetchOutcome, ObjectStore};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fetch an object, retrying once with `/index.html` appended on not-found
///
/// Only a `NotFound` outcome for the literal key triggers the retry; every
/// other failure is returned as-is, and the retry itself is never retried.
pub async fn fetch_with_fallback(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    metrics: Option<&ProxyMetrics>,
) -> Result<Bytes> {
    match store.get_object(bucket, key).await {
        FetchOutcome::Found(body) => Ok(body),
        FetchOutcome::Failed(err) => Err(err.into()),
        FetchOutcome::NotFound { .. } => {
            let index_key = key_resolver::index_fallback_key(key);
            debug!("{}/{} not found, trying {}", bucket, key, index_key);
            if let Some(metrics) = metrics {
                metrics.index_fallbacks_total.inc();
            }

            match store.get_object(bucket, &index_key).await {
                FetchOutcome::Found(body) => Ok(body),
                FetchOutcome::Failed(err) => Err(err.into()),
                FetchOutcome::NotFound { message } => Err(ProxyError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    message,
                }),
            }
        }
    }
}

/// Orchestrates the cache and the object store
pub struct ProxyCore {
    cache: Arc<CacheStore>,
    store: Arc<dyn ObjectStore>,
    inflight: Option<InFlightTracker>,
    metrics: Option<Arc<ProxyMetrics>>,
}

impl ProxyCore {
    /// Create a proxy core with miss coalescing enabled and no metrics
    pub fn new(cache: Arc<CacheStore>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            cache,
            store,
            inflight: Some(InFlightTracker::new()),
            metrics: None,
        }
    }

    /// Enable or disable sharing one fetch between concurrent misses
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.inflight = enabled.then(InFlightTracker::new);
        self
    }

    /// Record metrics into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<ProxyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn metrics(&self) -> Option<&Arc<ProxyMetrics>> {
        self.metrics.as_ref()
    }

    /// Fetch `bucket/key`, where `key` is the object key as the client sent it
    ///
    /// # Returns
    /// * `Ok(Bytes)` - the object body, from cache or freshly fetched
    /// * `Err(ProxyError::ObjectNotFound)` - neither the key nor its index exists
    /// * `Err(ProxyError::StoreClientError)` - any other object store failure
    /// * `Err(ProxyError::CacheIoError)` - the cache could not be read or written
    pub async fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let cache_key = key_resolver::cache_key(bucket, key);

        if let Some(body) = self.cache.get(&cache_key).await? {
            if let Some(metrics) = &self.metrics {
                metrics.cache_hits_total.inc();
            }
            return Ok(body);
        }

        debug!("Cache miss for {}/{} ({})", bucket, key, cache_key);
        if let Some(metrics) = &self.metrics {
            metrics.cache_misses_total.inc();
        }

        let Some(tracker) = &self.inflight else {
            return self.fill(bucket, key, cache_key).await;
        };

        match tracker.try_register(&cache_key) {
            FetchRole::Fetcher(guard) => {
                let result = self.fill(bucket, key, cache_key).await;
                guard.complete(&result);
                result
            }
            FetchRole::Waiter(mut rx) => match rx.recv().await {
                Ok(result) => {
                    debug!("Shared in-flight fetch for {}/{}", bucket, key);
                    if let Some(metrics) = &self.metrics {
                        metrics.coalesced_fetches_total.inc();
                    }
                    result
                }
                Err(_) => {
                    debug!("In-flight fetch for {}/{} was abandoned, fetching", bucket, key);
                    self.fill(bucket, key, cache_key).await
                }
            },
        }
    }

    /// Fetch from the object store and store the body in the cache
    async fn fill(&self, bucket: &str, key: &str, cache_key: CacheKey) -> Result<Bytes> {
        let start = Instant::now();
        let result =
            fetch_with_fallback(self.store.as_ref(), bucket, key, self.metrics.as_deref()).await;

        if let Some(metrics) = &self.metrics {
            metrics
                .fetch_duration_seconds
                .observe(start.elapsed().as_secs_f64());
        }

        let body = match result {
            Ok(body) => body,
            Err(err) => {
                warn!("Failed to fetch {}/{}: {}", bucket, key, err);
                if let Some(metrics) = &self.metrics {
                    let kind = match &err {
                        ProxyError::ObjectNotFound { .. } => "not_found",
                        ProxyError::StoreClientError { kind, .. } => kind.as_str(),
                        _ => "other",
                    };
                    metrics.record_fetch_error(kind);
                }
                return Err(err);
            }
        };

        info!(
            "Fetched {}/{} from object store ({} bytes)",
            bucket,
            key,
            body.len()
        );

        self.cache.put(cache_key, body.clone()).await?;
        if let Some(metrics) = &self.metrics {
            metrics.observe_cache(&self.cache.stats().await);
        }

        Ok(body)
    }

    /// Drop every cached object
    ///
    /// # Returns
    /// The number of entries removed
    pub async fn reset(&self) -> usize {
        let removed = self.cache.clear().await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_cache(&self.cache.stats().await);
        }
        removed
    }
}
