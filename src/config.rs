//! Configuration management for the caching S3 proxy

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Configuration for the proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    /// Address the proxy listens on (default: 0.0.0.0:8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Object store settings
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Share one object-store fetch between concurrent misses for the same
    /// object (default: true)
    #[serde(default = "default_true")]
    pub coalesce_misses: bool,

    /// Report access-denied as 403 and store outages as 502 instead of 404
    /// (default: false)
    #[serde(default)]
    pub strict_status_codes: bool,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Configuration for the object body cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Maximum total size of cached bodies in bytes (default: 10GB)
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: u64,

    /// Directory holding cached bodies (default: `caching-s3-proxy` under
    /// the system temp directory)
    #[serde(default)]
    pub directory: Option<String>,

    /// Persist cached bodies to `directory` (default: true); when false the
    /// cache lives in memory only
    #[serde(default = "default_true")]
    pub persist: bool,
}

/// Configuration for the S3 client
///
/// Credentials always come from the AWS default provider chain
/// (environment, profile, web identity, instance metadata).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectStoreConfig {
    /// Endpoint override for S3-compatible stores such as MinIO; AWS S3 when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Region; when unset the default chain is consulted, then us-east-1
    #[serde(default)]
    pub region: Option<String>,

    /// Request objects as `{endpoint}/{bucket}/{key}` (default: false)
    #[serde(default)]
    pub force_path_style: bool,

    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

// Default value functions for serde
fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_capacity_bytes() -> u64 {
    10 * 1_000_000_000 // 10GB
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            listen_address: default_listen_address(),
            cache: CacheConfig::default(),
            object_store: ObjectStoreConfig::default(),
            coalesce_misses: default_true(),
            strict_status_codes: false,
            metrics_endpoint: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity_bytes: default_capacity_bytes(),
            directory: None,
            persist: default_true(),
        }
    }
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        ObjectStoreConfig {
            endpoint: None,
            region: None,
            force_path_style: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

impl CacheConfig {
    /// Directory to persist the cache in, or `None` for a memory-only cache
    ///
    /// The temp-directory default is looked up here, so callers should
    /// resolve it once at startup and keep the result.
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        if !self.persist {
            return None;
        }
        Some(match &self.directory {
            Some(dir) => PathBuf::from(dir),
            None => std::env::temp_dir().join("caching-s3-proxy"),
        })
    }
}

impl ProxyConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(ProxyConfig)` if loading and validation succeed
    /// * `Err(ProxyError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ProxyError::ConfigError(format!("Failed to read config file: {}", e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ProxyConfig = serde_yaml::from_str(content).map_err(|e| {
            ProxyError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - listen_address (and the metrics address, if enabled) must be a socket address
    /// - cache.capacity_bytes must be > 0
    /// - cache.directory must not be empty when set
    /// - object_store.endpoint, when set, must be an http or https URL
    /// - object_store.region must not be empty when set
    /// - object_store.timeout_secs must be > 0
    pub fn validate(&self) -> Result<()> {
        self.listen_socket_addr()?;

        if self.cache.capacity_bytes == 0 {
            return Err(ProxyError::ConfigError(
                "cache.capacity_bytes must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.cache.directory, Some(dir) if dir.trim().is_empty()) {
            return Err(ProxyError::ConfigError(
                "cache.directory must not be empty".to_string(),
            ));
        }

        if let Some(endpoint) = &self.object_store.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ProxyError::ConfigError(format!(
                    "object_store.endpoint must be an http(s) URL, got '{}'",
                    endpoint
                )));
            }
        }

        if matches!(&self.object_store.region, Some(region) if region.trim().is_empty()) {
            return Err(ProxyError::ConfigError(
                "object_store.region must not be empty".to_string(),
            ));
        }

        if self.object_store.timeout_secs == 0 {
            return Err(ProxyError::ConfigError(
                "object_store.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if let Some(metrics) = &self.metrics_endpoint {
            if metrics.enabled {
                metrics.socket_addr()?;
            }
        }

        Ok(())
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr("listen_address", &self.listen_address)
    }
}

impl MetricsEndpointConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr("metrics_endpoint.address", &self.address)
    }
}

fn parse_socket_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value.parse().map_err(|e| {
        ProxyError::ConfigError(format!("{} '{}' is not a socket address: {}", field, value, e))
    })
}
