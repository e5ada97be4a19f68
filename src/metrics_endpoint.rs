//! Metrics HTTP endpoint
//!
//! Serves the proxy's Prometheus metrics on a listener separate from the
//! proxy itself:
//! - `/metrics` - Prometheus text exposition
//! - `/health` - liveness check

use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<ProxyMetrics>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    pub fn new(metrics: Arc<ProxyMetrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Bind the configured address and serve until an accept error occurs
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            ProxyError::HttpError(format!("Failed to bind metrics endpoint {}: {}", self.addr, e))
        })?;
        serve(listener, self.metrics).await
    }
}

/// Serve metrics on an already bound listener
pub async fn serve(listener: TcpListener, metrics: Arc<ProxyMetrics>) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| ProxyError::HttpError(format!("Listener has no address: {}", e)))?;
    info!("Metrics available at http://{}/metrics", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| ProxyError::HttpError(format!("Failed to accept connection: {}", e)))?;
        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::task::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = handle_request(req.uri().path(), &metrics);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving metrics connection: {:?}", err);
            }
        });
    }
}

fn handle_request(path: &str, metrics: &ProxyMetrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => match metrics.encode() {
            Ok(body) => response(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, body),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "Failed to encode metrics",
                )
            }
        },
        "/health" => response(StatusCode::OK, "text/plain", "OK"),
        _ => response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found"),
    }
}

fn response(
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
