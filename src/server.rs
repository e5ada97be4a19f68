//! HTTP front end of the proxy
//!
//! Routes:
//! - `GET /` - greeting
//! - `GET /favicon.ico` - always 404
//! - `GET /reset` - clear the cache
//! - `GET /{bucket}/{key...}` - serve an object through [`ProxyCore`]

use crate::content_type::content_type_for;
use crate::error::{ProxyError, Result};
use crate::key_resolver::resolve_path;
use crate::proxy::ProxyCore;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

pub const GREETING: &str = "Caching S3 Proxy";
pub const FAVICON_REFUSAL: &str = "Refusing to serve favicon";
pub const CACHE_CLEARED: &str = "Cache cleared";

const TEXT_PLAIN: &str = "text/plain";

/// HTTP server wrapping a [`ProxyCore`]
pub struct ProxyServer {
    core: Arc<ProxyCore>,
    strict_status_codes: bool,
}

impl ProxyServer {
    pub fn new(core: Arc<ProxyCore>) -> Self {
        Self {
            core,
            strict_status_codes: false,
        }
    }

    /// Report object store failures with distinct status codes instead of 404
    pub fn with_strict_status_codes(mut self, strict: bool) -> Self {
        self.strict_status_codes = strict;
        self
    }

    /// Accept connections on `listener` until an accept error occurs
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener
            .local_addr()
            .map_err(|e| ProxyError::HttpError(format!("Listener has no address: {}", e)))?;
        info!("Proxy listening on http://{}", addr);

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| ProxyError::HttpError(format!("Failed to accept connection: {}", e)))?;
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }

    /// Handle one request; the request body is ignored
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let (parts, _) = req.into_parts();
        self.route(&parts.method, parts.uri.path()).await
    }

    async fn route(&self, method: &Method, raw_path: &str) -> Response<Full<Bytes>> {
        if method != Method::GET {
            self.record_request("other");
            return text_response(StatusCode::METHOD_NOT_ALLOWED, TEXT_PLAIN, "Method not allowed");
        }

        let path = match percent_decode_str(raw_path).decode_utf8() {
            Ok(path) => path,
            Err(_) => {
                self.record_request("other");
                return text_response(StatusCode::BAD_REQUEST, TEXT_PLAIN, "Invalid request path");
            }
        };
        debug!("GET {}", path);

        match &*path {
            "/favicon.ico" => {
                self.record_request("favicon");
                text_response(StatusCode::NOT_FOUND, TEXT_PLAIN, FAVICON_REFUSAL)
            }
            "/reset" => {
                self.record_request("reset");
                let removed = self.core.reset().await;
                info!("Cache reset requested: {} entries removed", removed);
                text_response(StatusCode::OK, TEXT_PLAIN, CACHE_CLEARED)
            }
            other => match resolve_path(other) {
                None => {
                    self.record_request("root");
                    text_response(StatusCode::OK, TEXT_PLAIN, GREETING)
                }
                Some(resolved) => {
                    self.record_request("object");
                    self.serve_object(&resolved.bucket, &resolved.key).await
                }
            },
        }
    }

    async fn serve_object(&self, bucket: &str, key: &str) -> Response<Full<Bytes>> {
        match self.core.fetch(bucket, key).await {
            Ok(body) => {
                if let Some(metrics) = self.core.metrics() {
                    metrics.bytes_served_total.inc_by(body.len() as u64);
                }
                text_response(StatusCode::OK, content_type_for(key), body)
            }
            Err(err) => {
                let code = if self.strict_status_codes {
                    err.strict_status_code()
                } else {
                    err.status_code()
                };
                let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                text_response(status, TEXT_PLAIN, err.to_string())
            }
        }
    }

    fn record_request(&self, route: &str) {
        if let Some(metrics) = self.core.metrics() {
            metrics.record_request(route);
        }
    }
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
