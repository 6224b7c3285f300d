use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use async_trait::async_trait;
use hyper::body::Bytes;
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

/// A single outbound request, built by the scenario from iteration parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Bytes>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(url)
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::HEAD,
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A completed HTTP exchange. Any status code counts as a response.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult {
    pub status: u16,
    /// Time from send until the full body was read.
    pub latency: Duration,
    pub body: Bytes,
}

/// The request never produced a response.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Anything that can execute a [`RequestSpec`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: RequestSpec,
        timeout: Duration,
    ) -> Result<RequestResult, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        request: RequestSpec,
        timeout: Duration,
    ) -> Result<RequestResult, TransportError> {
        (**self).send(request, timeout).await
    }
}

/// Pooled keep-alive client over hyper-util with rustls.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_pool_and_workers(2000, 1000)
    }

    /// Create a new HttpClient with pool size and worker-scaled HTTP/2 windows.
    /// At high worker counts (>5K), use smaller windows to reduce memory
    pub fn with_pool_and_workers(pool_size: usize, total_workers: usize) -> anyhow::Result<Self> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        let tls = match hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_native_roots(rustls::crypto::ring::default_provider())
        {
            Ok(builder) => builder,
            Err(e) => {
                // plain http targets still work without a CA bundle
                tracing::warn!("no native TLS roots available ({}), https targets will fail", e);
                let config = rustls::ClientConfig::builder_with_provider(Arc::new(
                    rustls::crypto::ring::default_provider(),
                ))
                .with_safe_default_protocol_versions()
                .context("failed to configure TLS")?
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth();
                hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(config)
            }
        };

        let https = tls
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let (conn_window, stream_window) = if total_workers > 5000 {
            (128 * 1024, 64 * 1024)
        } else if total_workers > 2000 {
            (256 * 1024, 128 * 1024)
        } else {
            (512 * 1024, 256 * 1024)
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(pool_size)
            .http2_initial_connection_window_size(conn_window)
            .http2_initial_stream_window_size(stream_window)
            .build(https);

        Ok(Self { client })
    }

    async fn execute(&self, spec: RequestSpec) -> Result<RequestResult, TransportError> {
        let mut builder = Request::builder().method(spec.method).uri(spec.url.as_str());
        for (name, value) in &spec.headers {
            builder = builder.header(*name, value.as_str());
        }
        let req = builder
            .body(Full::new(spec.body.unwrap_or_default()))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let start = Instant::now();
        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let status = response.status().as_u16();

        // read the body to completion so the connection returns to the pool
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?
            .to_bytes();

        Ok(RequestResult {
            status,
            latency: start.elapsed(),
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(
        &self,
        request: RequestSpec,
        timeout: Duration,
    ) -> Result<RequestResult, TransportError> {
        match tokio::time::timeout(timeout, self.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}
