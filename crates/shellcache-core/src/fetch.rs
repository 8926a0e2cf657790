//! Network access for cache misses and manifest population.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::Result;
use crate::request::Request;
use crate::response::NetworkResponse;

/// HTTP request timeout in seconds.
/// The cache layer adds no timeout of its own; this is the network layer's.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Issues requests to the network.
///
/// Non-success statuses are returned as responses, not errors; callers decide
/// what to do with them. Only transport failures are `Err`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<NetworkResponse>;
}

/// Fetcher backed by reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client, sharing its connection pool
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<NetworkResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;

        let status = response.status();
        let url = response.url().to_string();
        let headers = header_pairs(&url, response.headers());

        // Drain the body stream once; copies are made from this buffer
        let body = response.bytes().await?.to_vec();
        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Network response received");

        Ok(NetworkResponse {
            url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

/// Headers as stored text. Values that are not valid UTF-8 cannot be
/// represented and are dropped with a warning.
fn header_pairs(url: &str, headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| match value.to_str() {
            Ok(v) => Some((name.as_str().to_string(), v.to_string())),
            Err(_) => {
                warn!(url = %url, header = %name, bytes = value.len(), "Dropping non-UTF-8 response header");
                None
            }
        })
        .collect()
}
