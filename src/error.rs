//! Error types for the caching S3 proxy

use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Classification of object-store failures other than "not found"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The store refused the request (403)
    AccessDenied,
    /// Any other client-side rejection (malformed request, missing bucket, ...)
    BadRequest,
    /// The store answered with a server error (5xx)
    Upstream,
    /// Connection, timeout or body transfer failure
    Transport,
}

impl StoreErrorKind {
    /// Label used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::AccessDenied => "access_denied",
            StoreErrorKind::BadRequest => "bad_request",
            StoreErrorKind::Upstream => "upstream",
            StoreErrorKind::Transport => "transport",
        }
    }
}

/// Error types that can occur in the proxy
///
/// Object-store errors display as the store's own message, which is what
/// clients receive as the response body.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProxyError {
    #[error("{message}")]
    ObjectNotFound {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("{message}")]
    StoreClientError {
        kind: StoreErrorKind,
        message: String,
    },

    #[error("Cache IO error: {0}")]
    CacheIoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::CacheIoError(err.to_string())
    }
}

impl ProxyError {
    /// Create a StoreClientError from a kind and message
    pub fn store_client_error(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        ProxyError::StoreClientError {
            kind,
            message: message.into(),
        }
    }

    /// Convert error to HTTP status code
    ///
    /// Every object-store failure is reported as 404, matching what existing
    /// clients (pip, static site browsers) have always received.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::ObjectNotFound { .. } => 404,
            ProxyError::StoreClientError { .. } => 404,
            ProxyError::CacheIoError(_) => 500,
            ProxyError::ConfigError(_) => 500,
            ProxyError::HttpError(_) => 500,
        }
    }

    /// Convert error to HTTP status code, distinguishing store failure kinds
    pub fn strict_status_code(&self) -> u16 {
        match self {
            ProxyError::StoreClientError { kind, .. } => match kind {
                StoreErrorKind::AccessDenied => 403,
                StoreErrorKind::BadRequest => 400,
                StoreErrorKind::Upstream => 502,
                StoreErrorKind::Transport => 502,
            },
            other => other.status_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_display_store_message() {
        let err = ProxyError::ObjectNotFound {
            bucket: "b".to_string(),
            key: "missing.whl".to_string(),
            message: "The specified key does not exist.".to_string(),
        };
        assert_eq!(err.to_string(), "The specified key does not exist.");

        let err = ProxyError::store_client_error(StoreErrorKind::AccessDenied, "Access Denied");
        assert_eq!(err.to_string(), "Access Denied");
    }

    #[test]
    fn test_compat_status_codes() {
        let denied = ProxyError::store_client_error(StoreErrorKind::AccessDenied, "denied");
        let upstream = ProxyError::store_client_error(StoreErrorKind::Upstream, "slow down");
        assert_eq!(denied.status_code(), 404);
        assert_eq!(upstream.status_code(), 404);
        assert_eq!(ProxyError::CacheIoError("disk full".into()).status_code(), 500);
    }

    #[test]
    fn test_strict_status_codes() {
        let not_found = ProxyError::ObjectNotFound {
            bucket: "b".into(),
            key: "k".into(),
            message: "gone".into(),
        };
        assert_eq!(not_found.strict_status_code(), 404);
        assert_eq!(
            ProxyError::store_client_error(StoreErrorKind::AccessDenied, "x").strict_status_code(),
            403
        );
        assert_eq!(
            ProxyError::store_client_error(StoreErrorKind::BadRequest, "x").strict_status_code(),
            400
        );
        assert_eq!(
            ProxyError::store_client_error(StoreErrorKind::Transport, "x").strict_status_code(),
            502
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only fs");
        let err: ProxyError = io.into();
        assert!(matches!(err, ProxyError::CacheIoError(_)));
        assert_eq!(err.status_code(), 500);
    }
}
