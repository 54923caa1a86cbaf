use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::admission::params::{build_read_context, RawParams};
use crate::core::error::ProxyError;
use crate::observability::metrics as obs;

use super::router::AppState;

// ---------------------------------------------------------------------------
// Range parsing
// ---------------------------------------------------------------------------

/// A single parsed `Range: bytes=…` spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `start-end`, both inclusive.
    FromTo(u64, u64),
    /// `start-`, to the end of the object.
    From(u64),
    /// `-N`, the last N bytes; needs the total size to resolve.
    Suffix(u64),
}

/// Parse a `Range` header value. Multiple ranges are refused outright;
/// malformed specs are unsatisfiable.
pub fn parse_range_header(value: &str) -> Result<ByteRange, ProxyError> {
    let spec = value
        .strip_prefix("bytes=")
        .ok_or(ProxyError::RangeUnsatisfiable)?;
    if spec.contains(',') {
        return Err(ProxyError::BadInput(
            "multiple ranges are not supported".to_string(),
        ));
    }

    let (start, end) = spec.split_once('-').ok_or(ProxyError::RangeUnsatisfiable)?;
    match (start.is_empty(), end.is_empty()) {
        (true, true) => Err(ProxyError::RangeUnsatisfiable),
        (true, false) => {
            let n: u64 = end.parse().map_err(|_| ProxyError::RangeUnsatisfiable)?;
            Ok(ByteRange::Suffix(n))
        }
        (false, true) => {
            let s: u64 = start.parse().map_err(|_| ProxyError::RangeUnsatisfiable)?;
            Ok(ByteRange::From(s))
        }
        (false, false) => {
            let s: u64 = start.parse().map_err(|_| ProxyError::RangeUnsatisfiable)?;
            let e: u64 = end.parse().map_err(|_| ProxyError::RangeUnsatisfiable)?;
            if s > e {
                return Err(ProxyError::RangeUnsatisfiable);
            }
            Ok(ByteRange::FromTo(s, e))
        }
    }
}

/// Resolve a parsed range against the object size into inclusive offsets.
pub fn resolve_range(range: ByteRange, total: u64) -> Result<(u64, u64), ProxyError> {
    if total == 0 {
        return Err(ProxyError::RangeUnsatisfiable);
    }
    match range {
        ByteRange::FromTo(start, end) => {
            if start >= total {
                return Err(ProxyError::RangeUnsatisfiable);
            }
            Ok((start, end.min(total - 1)))
        }
        ByteRange::From(start) => {
            if start >= total {
                return Err(ProxyError::RangeUnsatisfiable);
            }
            Ok((start, total - 1))
        }
        ByteRange::Suffix(n) => {
            if n == 0 {
                return Err(ProxyError::RangeUnsatisfiable);
            }
            Ok((total.saturating_sub(n), total - 1))
        }
    }
}

// ---------------------------------------------------------------------------
// Raw video proxy
// ---------------------------------------------------------------------------

/// `GET /videos/{*params}` — stream raw source bytes with range support.
///
/// Object-store sources are stat'd first so suffix ranges resolve; HTTP
/// sources get the `Range` header forwarded verbatim and the upstream
/// status relayed.
pub async fn video_proxy(
    State(state): State<AppState>,
    Path(params): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    obs::inc_request("video_proxy");

    let raw = RawParams::from_path(&params)?;
    let ctx = build_read_context(raw, &state.config.proxy, &state.origins)?;
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    if let (Some(location), Some(object_cache)) = (&ctx.custom_object_key, &state.object_cache) {
        let store = object_cache.store();
        let meta = store.head_object(location).await?;
        let total = meta.content_length;

        let resolved = match range_header {
            Some(value) => Some(resolve_range(parse_range_header(value)?, total)?),
            None => None,
        };

        let stream = store.get_object_stream(location, resolved).await?;
        let body = Body::from_stream(ReaderStream::new(stream.into_async_read()));

        info!(
            location,
            ranged = resolved.is_some(),
            signature = %ctx.signature_for_log(),
            "object-store video proxied"
        );
        obs::inc_served("video-proxy", "");

        let response = match resolved {
            Some((start, end)) => (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, meta.content_type),
                    (header::CONTENT_LENGTH, (end - start + 1).to_string()),
                    (
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", start, end, total),
                    ),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
                body,
            )
                .into_response(),
            None => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, meta.content_type),
                    (header::CONTENT_LENGTH, total.to_string()),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
                body,
            )
                .into_response(),
        };
        return Ok(response);
    }

    let url = ctx
        .source_url
        .as_deref()
        .ok_or_else(|| ProxyError::BadInput("url or location is required".to_string()))?;

    let upstream = state.fetcher.proxy_stream(url, range_header).await?;
    let status = upstream.status();

    let mut builder = Response::builder().status(status);
    for name in [
        header::CONTENT_TYPE,
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
    ] {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    let accept_ranges = upstream
        .headers()
        .get(header::ACCEPT_RANGES)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("bytes"));
    builder = builder.header(header::ACCEPT_RANGES, accept_ranges);

    info!(
        url,
        hostname = %ctx.hostname,
        status = status.as_u16(),
        signature = %ctx.signature_for_log(),
        "video proxied"
    );
    obs::inc_served("video-proxy", &ctx.hostname);

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ProxyError::Internal(format!("failed to build proxy response: {}", e)))
}
