use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode};
use sha2::{Digest, Sha256};
use tower::{Layer, Service};
use tracing::debug;

use crate::storage::memory::{CachedArtifact, MemoryCache};

// ---------------------------------------------------------------------------
// HTTP response cache + ETag middleware
// ---------------------------------------------------------------------------

/// Short-TTL admission cache over successful media responses.
///
/// GET responses with status 200 on the image and video-preview route
/// families are buffered into the shared memory cache, keyed by path and
/// query. The raw video proxy family is never cached here — streams keep
/// their range semantics by being served fresh each time. Cacheable
/// responses gain a strong ETag; a matching `If-None-Match` short-circuits
/// to 304.
#[derive(Clone)]
pub struct ResponseCacheLayer {
    cache: Arc<MemoryCache>,
    ttl: Duration,
}

impl ResponseCacheLayer {
    pub fn new(cache: Arc<MemoryCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

impl<S> Layer<S> for ResponseCacheLayer {
    type Service = ResponseCacheMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseCacheMiddleware {
            inner,
            cache: self.cache.clone(),
            ttl: self.ttl,
        }
    }
}

/// Which paths participate in response caching.
fn is_cacheable_path(path: &str) -> bool {
    path.starts_with("/images/") || path.starts_with("/videos/preview/") || path == "/image"
}

fn etag_for(body: &[u8]) -> String {
    let hash = hex::encode(Sha256::digest(body));
    format!("\"{}\"", &hash[..32])
}

#[derive(Clone)]
pub struct ResponseCacheMiddleware<S> {
    inner: S,
    cache: Arc<MemoryCache>,
    ttl: Duration,
}

impl<S> Service<Request<Body>> for ResponseCacheMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let cacheable = req.method() == Method::GET && is_cacheable_path(req.uri().path());
        if !cacheable {
            let fut = self.inner.call(req);
            return Box::pin(fut);
        }

        let key = format!(
            "http:{}",
            req.uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or_else(|| req.uri().path())
        );
        let if_none_match = req
            .headers()
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let cache = self.cache.clone();
        let ttl = self.ttl;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if let Some(hit) = cache.get(&key) {
                debug!(key = %key, "http cache hit");
                if if_none_match.as_deref() == Some(hit.etag.as_str()) {
                    return Ok(not_modified(&hit.etag));
                }
                return Ok(cached_response(&hit, ttl));
            }

            let response = inner.call(req).await?;
            if response.status() != StatusCode::OK {
                return Ok(response);
            }

            let (mut parts, body) = response.into_parts();
            let bytes = match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(plain_error(format!("failed to buffer response: {}", e)));
                }
            };

            let etag = etag_for(&bytes);
            if let Ok(value) = HeaderValue::from_str(&etag) {
                parts.headers.insert(header::ETAG, value);
            }

            let content_type = parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();

            cache.insert(
                key,
                CachedArtifact {
                    body: bytes.clone(),
                    content_type,
                    etag: etag.clone(),
                },
                ttl,
            );

            if if_none_match.as_deref() == Some(etag.as_str()) {
                return Ok(not_modified(&etag));
            }

            Ok(Response::from_parts(parts, Body::from(bytes)))
        })
    }
}

fn cached_response(hit: &CachedArtifact, ttl: Duration) -> Response<Body> {
    let mut response = Response::new(Body::from(hit.body.clone()));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&hit.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&hit.etag) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", ttl.as_secs())) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(hit.body.len() as u64),
    );
    response
}

fn not_modified(etag: &str) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    if let Ok(value) = HeaderValue::from_str(etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

fn plain_error(message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cacheable_paths() {
        assert!(is_cacheable_path("/images/q:50/abc"));
        assert!(is_cacheable_path("/videos/preview/fp:half/abc"));
        assert!(is_cacheable_path("/image"));
        // the raw proxy family streams every time
        assert!(!is_cacheable_path("/videos/abc"));
        assert!(!is_cacheable_path("/videos/multiparts"));
        assert!(!is_cacheable_path("/health"));
        assert!(!is_cacheable_path("/metrics"));
    }

    #[test]
    fn etag_is_strong_and_stable() {
        let a = etag_for(b"body");
        let b = etag_for(b"body");
        assert_eq!(a, b);
        assert!(a.starts_with('"') && a.ends_with('"'));
        assert_ne!(a, etag_for(b"other"));
    }
}
