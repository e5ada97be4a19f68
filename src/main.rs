//! Caching S3 proxy server
//!
//! Loads configuration, sets up logging, opens the cache and serves
//! `/{bucket}/{key}` requests from a private object store.

use anyhow::Context;
use caching_s3_proxy::{
    CacheStore, MetricsEndpoint, ProxyConfig, ProxyCore, ProxyMetrics, ProxyServer, S3ObjectStore,
};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// # Usage
/// ```bash
/// # Start with default config
/// caching-s3-proxy
///
/// # Start with a config file
/// caching-s3-proxy /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting Caching S3 Proxy");

    let config = match env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            ProxyConfig::from_file(&path)
                .with_context(|| format!("Failed to load configuration from {}", path))?
        }
        None => {
            info!("No configuration file given, using defaults");
            ProxyConfig::default()
        }
    };

    info!("  - Listen address: {}", config.listen_address);
    info!(
        "  - Object store: endpoint={}, region={}",
        config.object_store.endpoint.as_deref().unwrap_or("aws"),
        config.object_store.region.as_deref().unwrap_or("from environment")
    );
    info!("  - Cache capacity: {} bytes", config.cache.capacity_bytes);
    info!("  - Coalesce misses: {}", config.coalesce_misses);
    info!("  - Strict status codes: {}", config.strict_status_codes);

    let cache = match config.cache.resolved_directory() {
        Some(dir) => CacheStore::open(config.cache.capacity_bytes, &dir)
            .await
            .with_context(|| format!("Failed to open cache directory {}", dir.display()))?,
        None => {
            warn!("Cache persistence disabled, bodies are kept in memory");
            CacheStore::in_memory(config.cache.capacity_bytes)
        }
    };

    let store = S3ObjectStore::from_config(&config.object_store).await;
    let metrics = Arc::new(ProxyMetrics::new().context("Failed to register metrics")?);

    let core = ProxyCore::new(Arc::new(cache), Arc::new(store))
        .with_coalescing(config.coalesce_misses)
        .with_metrics(Arc::clone(&metrics));
    let server = Arc::new(
        ProxyServer::new(Arc::new(core)).with_strict_status_codes(config.strict_status_codes),
    );

    if let Some(metrics_config) = config.metrics_endpoint.as_ref().filter(|m| m.enabled) {
        let addr = metrics_config.socket_addr()?;
        let endpoint = MetricsEndpoint::new(Arc::clone(&metrics), addr);
        tokio::spawn(async move {
            if let Err(e) = endpoint.start().await {
                error!("Metrics endpoint failed: {}", e);
            }
        });
    }

    let addr = config.listen_socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tokio::select! {
        result = server.serve(listener) => result.context("Proxy server failed")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
