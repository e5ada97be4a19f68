//! Prometheus metrics for the proxy
//!
//! All collectors live in a private [`Registry`] so several proxies (or
//! tests) can coexist in one process.

use crate::cache::CacheStats;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Metrics collected by the proxy core and HTTP adapter
#[derive(Clone)]
pub struct ProxyMetrics {
    registry: Registry,

    /// Requests by route: root, favicon, reset, object, other
    pub requests_total: IntCounterVec,

    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,

    /// Fetches that had to retry with `/index.html` appended
    pub index_fallbacks_total: IntCounter,

    /// Failed object fetches by kind
    pub fetch_errors_total: IntCounterVec,

    /// Misses served by waiting on another request's fetch
    pub coalesced_fetches_total: IntCounter,

    pub bytes_served_total: IntCounter,

    /// Duration of object store fetches, fallback included
    pub fetch_duration_seconds: Histogram,

    pub cache_size_bytes: IntGauge,
    pub cache_entries: IntGauge,
}

impl ProxyMetrics {
    /// Create metrics registered in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("s3proxy_requests_total", "Total number of HTTP requests by route"),
            &["route"],
        )?;
        let cache_hits_total =
            IntCounter::new("s3proxy_cache_hits_total", "Number of cache hits")?;
        let cache_misses_total =
            IntCounter::new("s3proxy_cache_misses_total", "Number of cache misses")?;
        let index_fallbacks_total = IntCounter::new(
            "s3proxy_index_fallbacks_total",
            "Number of fetches retried with /index.html appended",
        )?;
        let fetch_errors_total = IntCounterVec::new(
            Opts::new(
                "s3proxy_fetch_errors_total",
                "Number of failed object store fetches by kind",
            ),
            &["kind"],
        )?;
        let coalesced_fetches_total = IntCounter::new(
            "s3proxy_coalesced_fetches_total",
            "Number of misses that shared another request's fetch",
        )?;
        let bytes_served_total = IntCounter::new(
            "s3proxy_bytes_served_total",
            "Total object bytes returned to clients",
        )?;
        let fetch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "s3proxy_fetch_duration_seconds",
                "Duration of object store fetches in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        let cache_size_bytes =
            IntGauge::new("s3proxy_cache_size_bytes", "Current total size of cached bodies")?;
        let cache_entries = IntGauge::new("s3proxy_cache_entries", "Current number of cache entries")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(index_fallbacks_total.clone()))?;
        registry.register(Box::new(fetch_errors_total.clone()))?;
        registry.register(Box::new(coalesced_fetches_total.clone()))?;
        registry.register(Box::new(bytes_served_total.clone()))?;
        registry.register(Box::new(fetch_duration_seconds.clone()))?;
        registry.register(Box::new(cache_size_bytes.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            cache_hits_total,
            cache_misses_total,
            index_fallbacks_total,
            fetch_errors_total,
            coalesced_fetches_total,
            bytes_served_total,
            fetch_duration_seconds,
            cache_size_bytes,
            cache_entries,
        })
    }

    pub fn record_request(&self, route: &str) {
        self.requests_total.with_label_values(&[route]).inc();
    }

    pub fn record_fetch_error(&self, kind: &str) {
        self.fetch_errors_total.with_label_values(&[kind]).inc();
    }

    /// Mirror a cache snapshot into the gauges
    pub fn observe_cache(&self, stats: &CacheStats) {
        self.cache_size_bytes.set(stats.current_size as i64);
        self.cache_entries.set(stats.entries as i64);
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
