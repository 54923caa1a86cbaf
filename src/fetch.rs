use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::admission::mime::parse_media_type;
use crate::core::error::ProxyError;
use crate::observability::metrics as obs;

// ---------------------------------------------------------------------------
// Upstream HTTP client
// ---------------------------------------------------------------------------

/// Process-wide upstream fetcher.
///
/// One pooled `reqwest` client shared by every request task: keep-alive
/// (≤10 idle connections per host, ~90 s idle timeout), 10 s connect/TLS
/// timeout, configurable overall timeout, gzip decompression, HTTP/2 via
/// ALPN.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(timeout_secs))
            .gzip(true)
            .build()
            .map_err(|e| ProxyError::Internal(format!("http client init: {}", e)))?;
        Ok(Self { client })
    }

    /// Fetch a source object in full. Returns the parsed media type and
    /// the body. An upstream response without a `Content-Type` is denied.
    pub async fn fetch(&self, url: &str) -> Result<(String, Bytes), ProxyError> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProxyError::SourceFailure(format!("failed to fetch source: {}", e)))?;

        let media_type = required_media_type(&response)?;

        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::SourceFailure(format!("failed to read source body: {}", e)))?;

        obs::record_source_fetch_duration(start.elapsed().as_secs_f64());
        debug!(url, media_type, bytes = body.len(), "source fetched");
        Ok((media_type, body))
    }

    /// HEAD-equivalent probe: read only the response headers and drop the
    /// body unconsumed.
    pub async fn probe_content_type(&self, url: &str) -> Result<String, ProxyError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProxyError::SourceFailure(format!("failed to check source: {}", e)))?;

        required_media_type(&response)
    }

    /// Open an upstream response for streaming relay, forwarding the
    /// client's `Range` header verbatim when present.
    pub async fn proxy_stream(
        &self,
        url: &str,
        range: Option<&str>,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range);
        }
        request
            .send()
            .await
            .map_err(|e| ProxyError::SourceFailure(format!("failed to proxy source: {}", e)))
    }
}

fn required_media_type(response: &reqwest::Response) -> Result<String, ProxyError> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ProxyError::AuthFailed("no content type received".to_string()))?;

    parse_media_type(header)
        .ok_or_else(|| ProxyError::Internal("failed to parse content type".to_string()))
}
