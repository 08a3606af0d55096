//! HTTP transport shared by discovery and request dispatch.
//!
//! Wraps a pooled hyper client. Every call targets one explicit
//! [`Endpoint`]; choosing the endpoint is the caller's job.

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{HeaderMap, Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::protocol::endpoint::Endpoint;
use crate::protocol::error::{Result, TfsError};
use crate::protocol::RequestDescriptor;

/// Type alias for responses streamed back from an agent
pub type HyperResponse = Response<Incoming>;

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Cloneable HTTP/1 client. Clones share the underlying connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    /// Target description used in error messages: `host:port/path`.
    pub fn target(endpoint: &Endpoint, path: &str) -> String {
        format!("{}{}", endpoint, path)
    }

    /// Sends `descriptor` to `endpoint` and returns once response headers
    /// arrive. No timeout is applied; callers bound the whole exchange.
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        descriptor: &RequestDescriptor,
    ) -> Result<HyperResponse> {
        let target = Self::target(endpoint, &descriptor.path);
        let body = descriptor.body.clone().unwrap_or_default();

        let mut request = Request::builder()
            .method(descriptor.method.clone())
            .uri(endpoint.url(&descriptor.path))
            .body(Full::new(body))
            .map_err(|e| TfsError::Transport {
                url: target.clone(),
                message: format!("Failed to build request: {}", e),
            })?;
        request
            .headers_mut()
            .extend(descriptor.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.client
            .request(request)
            .await
            .map_err(|e| TfsError::Transport {
                url: target,
                message: format!("HTTP request failed: {}", e),
            })
    }

    /// Sends `descriptor` and buffers the whole response body, all within
    /// `descriptor.timeout`.
    pub async fn fetch(
        &self,
        endpoint: &Endpoint,
        descriptor: &RequestDescriptor,
    ) -> Result<FetchedResponse> {
        let target = Self::target(endpoint, &descriptor.path);
        let exchange = async {
            let response = self.send(endpoint, descriptor).await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = read_body(&target, response.into_body()).await?;
            Ok::<_, TfsError>(FetchedResponse {
                status,
                headers,
                body,
            })
        };

        with_timeout(&target, descriptor.timeout, exchange).await
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects a response body into memory.
pub async fn read_body(target: &str, body: Incoming) -> Result<Bytes> {
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| TfsError::Transport {
            url: target.to_string(),
            message: format!("Failed to read response: {}", e),
        })
}

/// Runs `future` under `timeout`, mapping expiry to [`TfsError::Timeout`].
pub async fn with_timeout<T, F>(target: &str, timeout: Duration, future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| TfsError::Timeout {
            url: target.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })?
}
