//! Caching S3 Proxy
//!
//! A small HTTP reverse proxy in front of a private S3-compatible object
//! store. Requests for `/{bucket}/{key}` are answered from a persistent,
//! size-bounded LRU cache of object bodies; misses are fetched from the
//! store, cached and returned.
//!
//! # Overview
//!
//! - Keys that look like directories (`simple/foo/`) are served from their
//!   index document: a missing key is retried once as `key/index.html`.
//! - `site/`, `site` and `site/index.html` share one cache entry.
//! - The cache survives restarts; its directory is rescanned on startup.
//! - `GET /reset` drops every cached object.
//!
//! # Architecture
//!
//! - [`KeyResolver`](key_resolver): path parsing, key normalization and cache keys
//! - [`CacheStore`]: LRU cache of object bodies, in memory or on disk
//! - [`ObjectStore`]: the object store seam, with [`S3ObjectStore`] for S3
//! - [`ProxyCore`]: cache lookup, index fallback and miss coalescing
//! - [`ProxyServer`]: the HTTP front end
//! - [`ProxyMetrics`] / [`MetricsEndpoint`]: Prometheus metrics
//!
//! # Configuration
//!
//! ```yaml
//! listen_address: "0.0.0.0:8080"
//! cache:
//!   capacity_bytes: 10000000000
//!   directory: /var/cache/s3proxy
//! object_store:
//!   region: eu-west-1
//!   # MinIO or another S3-compatible store
//!   endpoint: "http://minio.internal:9000"
//!   force_path_style: true
//!   timeout_secs: 30
//! metrics_endpoint:
//!   enabled: true
//!   address: "127.0.0.1:9090"
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use caching_s3_proxy::{CacheStore, MemoryObjectStore, ProxyCore};
//! use std::sync::Arc;
//!
//! # async fn example() -> caching_s3_proxy::Result<()> {
//! let store = Arc::new(MemoryObjectStore::new());
//! store.insert("docs", "site/index.html", "<html></html>");
//!
//! let core = ProxyCore::new(Arc::new(CacheStore::in_memory(1 << 20)), store);
//! let body = core.fetch("docs", "site").await?;
//! assert_eq!(&body[..], b"<html></html>");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod content_type;
pub mod error;
pub mod inflight;
pub mod key_resolver;
pub mod metrics;
pub mod metrics_endpoint;
pub mod object_store;
pub mod proxy;
pub mod server;

// Re-export commonly used types
pub use cache::{CacheStats, CacheStore};
pub use config::{CacheConfig, MetricsEndpointConfig, ObjectStoreConfig, ProxyConfig};
pub use content_type::content_type_for;
pub use error::{ProxyError, Result, StoreErrorKind};
pub use inflight::InFlightTracker;
pub use key_resolver::{cache_key, normalize_key, resolve_path, CacheKey, ResolvedPath};
pub use metrics::ProxyMetrics;
pub use metrics_endpoint::MetricsEndpoint;
pub use object_store::{
    FetchOutcome, MemoryObjectStore, ObjectStore, S3ObjectStore, StoreError,
};
pub use proxy::{fetch_with_fallback, ProxyCore};
pub use server::ProxyServer;
