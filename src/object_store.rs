//! Object-store clients
//!
//! The proxy only needs one operation from the store: fetch a whole object by
//! bucket and key. The outcome distinguishes "not found" (which triggers the
//! directory-index fallback) from every other failure.

use crate::config::ObjectStoreConfig;
use crate::error::{ProxyError, StoreErrorKind};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Message reported for a missing key, matching S3's wording
pub const NO_SUCH_KEY_MESSAGE: &str = "The specified key does not exist.";

/// Region used when neither the configuration nor the environment names one
const DEFAULT_REGION: &str = "us-east-1";

/// An object-store failure other than "not found"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        StoreError {
            kind,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ProxyError {
    fn from(err: StoreError) -> Self {
        ProxyError::StoreClientError {
            kind: err.kind,
            message: err.message,
        }
    }
}

/// Result of a single object fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The complete object body
    Found(Bytes),
    /// The key does not exist in the bucket
    NotFound { message: String },
    /// Any other failure; never retried
    Failed(StoreError),
}

/// A store the proxy can read objects from
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the full body of `bucket/key`
    async fn get_object(&self, bucket: &str, key: &str) -> FetchOutcome;
}

/// S3 (or S3-compatible) object store backed by the AWS SDK
///
/// Requests are signed with credentials from the AWS default provider chain.
/// The SDK's own retries are disabled: the only retry the proxy performs is
/// the directory-index fallback.
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Wrap an already configured SDK client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the `object_store` configuration section
    pub async fn from_config(config: &ObjectStoreConfig) -> Self {
        let region = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::from_static(DEFAULT_REGION));
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;

        let timeouts = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_secs))
            .build();
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.as_str());
        }

        info!(
            "S3 client ready: region={:?}, endpoint={}, path_style={}",
            sdk_config.region(),
            config.endpoint.as_deref().unwrap_or("aws"),
            config.force_path_style
        );
        Self::new(Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> FetchOutcome {
        debug!("Fetching object: bucket={}, key={}", bucket, key);

        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) => return classify_sdk_error(bucket, key, &err),
        };

        match output.body.collect().await {
            Ok(data) => FetchOutcome::Found(data.into_bytes()),
            Err(e) => {
                warn!("Failed to read body of {}/{}: {}", bucket, key, e);
                FetchOutcome::Failed(StoreError::new(
                    StoreErrorKind::Transport,
                    format!("Failed to read object body: {}", e),
                ))
            }
        }
    }
}

fn classify_sdk_error(
    bucket: &str,
    key: &str,
    err: &SdkError<GetObjectError, HttpResponse>,
) -> FetchOutcome {
    match err {
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let error = service.err();
            debug!(
                "Object store error: bucket={}, key={}, status={}, code={:?}",
                bucket,
                key,
                status,
                error.code()
            );

            let message = error
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| default_message(status));
            if error.is_no_such_key() {
                return FetchOutcome::NotFound { message };
            }
            classify_status(status, error.code(), message)
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            warn!(
                "Object store request failed: bucket={}, key={}: {}",
                bucket,
                key,
                DisplayErrorContext(err)
            );
            FetchOutcome::Failed(StoreError::new(
                StoreErrorKind::Transport,
                format!("Object store request failed: {}", DisplayErrorContext(err)),
            ))
        }
        _ => FetchOutcome::Failed(StoreError::new(
            StoreErrorKind::BadRequest,
            format!("Cannot build request for {}/{}: {}", bucket, key, DisplayErrorContext(err)),
        )),
    }
}

/// Map an S3 error response to a fetch outcome
///
/// A missing bucket is a configuration problem, not a missing key, so it
/// never triggers the index fallback.
fn classify_status(status: u16, code: Option<&str>, message: String) -> FetchOutcome {
    let kind = match (status, code) {
        (_, Some("NoSuchKey")) => return FetchOutcome::NotFound { message },
        (404, Some("NoSuchBucket")) => StoreErrorKind::BadRequest,
        (404, _) => return FetchOutcome::NotFound { message },
        (403, _) => StoreErrorKind::AccessDenied,
        (500..=599, _) => StoreErrorKind::Upstream,
        _ => StoreErrorKind::BadRequest,
    };
    FetchOutcome::Failed(StoreError::new(kind, message))
}

fn default_message(status: u16) -> String {
    if status == 404 {
        NO_SUCH_KEY_MESSAGE.to_string()
    } else {
        format!("Object store returned status {}", status)
    }
}

/// In-memory object store
///
/// Holds objects and injected failures per (bucket, key) and records every
/// request it receives, in order.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Bytes>>,
    failures: Mutex<HashMap<(String, String), StoreError>>,
    requests: Mutex<Vec<(String, String)>>,
    latency: Option<Duration>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    /// Make requests for `bucket/key` fail with `error`
    pub fn insert_failure(&self, bucket: &str, key: &str, error: StoreError) {
        self.failures
            .lock()
            .insert((bucket.to_string(), key.to_string()), error);
    }

    /// Every (bucket, key) requested so far
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> FetchOutcome {
        let id = (bucket.to_string(), key.to_string());
        self.requests.lock().push(id.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.failures.lock().get(&id) {
            return FetchOutcome::Failed(error.clone());
        }

        match self.objects.lock().get(&id) {
            Some(body) => FetchOutcome::Found(body.clone()),
            None => FetchOutcome::NotFound {
                message: NO_SUCH_KEY_MESSAGE.to_string(),
            },
        }
    }
}
