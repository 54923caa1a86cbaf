use std::collections::HashMap;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use tracing::{info, warn};

use crate::admission::mime::{is_document_mime, is_image_mime, is_video_mime};
use crate::admission::params::{
    build_read_context, build_upload_context, RawParams, RequestContext,
};
use crate::core::error::{ProxyError, StorageError};
use crate::core::security::validate_size;
use crate::observability::metrics as obs;
use crate::storage::key::fingerprint;
use crate::storage::memory::CachedArtifact;
use crate::transform::image::{
    encode_jpeg, encode_webp, rescale_image, resize_image, transform_image,
};
use crate::transform::TransformOutput;

use super::router::AppState;

/// Observability header naming which cache tier served the response.
static X_CACHE_PLACE: HeaderName = HeaderName::from_static("x-cache-place");

/// Presigned source URLs handed to the frame extractor stay valid this long.
const PRESIGN_EXPIRY: Duration = Duration::from_secs(15 * 60);

// ---------------------------------------------------------------------------
// Health + metrics
// ---------------------------------------------------------------------------

/// `GET /health` — liveness.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let metrics = state.metrics_handle.render();
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Image routes
// ---------------------------------------------------------------------------

/// `GET /images/{*params}` — image transform by path form.
pub async fn image_get(
    State(state): State<AppState>,
    Path(params): Path<String>,
) -> Result<Response, ProxyError> {
    obs::inc_request("image");
    let raw = RawParams::from_path(&params)?;
    let ctx = build_read_context(raw, &state.config.proxy, &state.origins)?;
    serve_image(&state, ctx).await
}

/// `GET /image?url=…` — query-form equivalent of the image route.
pub async fn image_query(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ProxyError> {
    obs::inc_request("image");
    if !query.contains_key("url") {
        return Err(ProxyError::BadInput("url is required".to_string()));
    }
    let raw = RawParams::from_query(&query)?;
    let ctx = build_read_context(raw, &state.config.proxy, &state.origins)?;
    serve_image(&state, ctx).await
}

/// `POST /images/{*params}` — transform an uploaded image, optionally
/// replicating the artifact to a signed custom location.
pub async fn image_post(
    State(state): State<AppState>,
    Path(params): Path<String>,
    mut multipart: axum::extract::Multipart,
) -> Result<Response, ProxyError> {
    obs::inc_request("image_upload");
    let raw = RawParams::from_path(&params)?;
    let ctx = build_upload_context(raw, &state.config.proxy)?;

    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ProxyError::BadInput(format!("failed to read form: {}", e)))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let media_type = field
            .content_type()
            .and_then(crate::admission::mime::parse_media_type)
            .ok_or_else(|| ProxyError::AuthFailed("no content type received".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ProxyError::BadInput(format!("failed to read image file: {}", e)))?;
        upload = Some((media_type, bytes));
        break;
    }

    let (media_type, body) =
        upload.ok_or_else(|| ProxyError::BadInput("failed to get image file".to_string()))?;

    if !is_image_mime(&media_type) && !is_document_mime(&media_type) {
        return Err(ProxyError::AuthFailed(format!(
            "content type '{}' is not allowed",
            media_type
        )));
    }
    validate_size(body.len() as u64, state.config.proxy.max_image_size_mb)?;

    let transforms = ctx.transforms.clone();
    let source_type = media_type.clone();
    let output = tokio::task::spawn_blocking(move || {
        transform_image(body, &source_type, &transforms)
    })
    .await
    .map_err(|e| ProxyError::Internal(format!("transform task failed: {}", e)))??;

    // Replicate to the caller-owned key when one was signed.
    if let (Some(location), Some(object_cache)) =
        (ctx.custom_object_key.clone(), state.object_cache.clone())
    {
        let artifact = output.clone();
        state.shutdown.spawn_write_back(async move {
            if let Err(e) = object_cache
                .put_at_location(&location, artifact.body, &artifact.content_type, None)
                .await
            {
                warn!(location, error = %e, "failed to store uploaded artifact");
            }
        });
    }

    info!(
        content_type = %media_type,
        signature = %ctx.signature_for_log(),
        token_presented = ctx.token_presented,
        "image upload served successfully"
    );
    obs::inc_served("image", "");
    Ok(media_response(
        output.body,
        &output.content_type,
        None,
        state.config.cache.http_ttl_secs,
    ))
}

// ---------------------------------------------------------------------------
// Video preview route
// ---------------------------------------------------------------------------

/// `GET /videos/preview/{*params}` — single-frame preview of a video.
pub async fn video_preview(
    State(state): State<AppState>,
    Path(params): Path<String>,
) -> Result<Response, ProxyError> {
    obs::inc_request("video_preview");
    let raw = RawParams::from_path(&params)?;
    let ctx = build_read_context(raw, &state.config.proxy, &state.origins)?;

    let fp = fingerprint(&ctx);
    let http_ttl = state.config.cache.http_ttl_secs;

    if let Some(hit) = state.memory_cache.get(&fp) {
        obs::inc_served_cached("video-preview", "response-handler");
        return Ok(media_response(
            hit.body,
            &hit.content_type,
            Some("response-handler"),
            http_ttl,
        ));
    }

    if let Some(object_cache) = &state.object_cache {
        if let Some(artifact) = object_cache.get(&fp).await {
            obs::inc_served_cached("video-preview", "s3cache");
            remember(&state, &fp, &artifact.body, &artifact.content_type);
            return Ok(media_response(
                artifact.body,
                &artifact.content_type,
                Some("s3cache"),
                http_ttl,
            ));
        }
    }

    // Resolve the source the extractor will open and gate on its type.
    let source_url = match (&ctx.source_url, &ctx.custom_object_key) {
        (Some(url), _) => {
            let media_type = state.fetcher.probe_content_type(url).await?;
            if !is_video_mime(&media_type) {
                return Err(ProxyError::AuthFailed(format!(
                    "content type '{}' is not allowed",
                    media_type
                )));
            }
            url.clone()
        }
        (None, Some(location)) => {
            let object_cache = state.object_cache.as_ref().ok_or_else(|| {
                ProxyError::Disabled("object store is not configured".to_string())
            })?;
            let meta = object_cache.store().head_object(location).await?;
            if !is_video_mime(&meta.content_type) {
                return Err(ProxyError::AuthFailed(format!(
                    "content type '{}' is not allowed",
                    meta.content_type
                )));
            }
            object_cache
                .store()
                .presigned_get_url(location, PRESIGN_EXPIRY)
                .await?
        }
        (None, None) => {
            return Err(ProxyError::BadInput("url or location is required".to_string()));
        }
    };

    let transforms = ctx.transforms.clone();
    let output = tokio::task::spawn_blocking(move || -> Result<TransformOutput, ProxyError> {
        let mut frame =
            crate::transform::frame::extract_frame(&source_url, transforms.frame_position)?;
        if transforms.width > 0 || transforms.height > 0 {
            frame = resize_image(
                frame,
                transforms.width,
                transforms.height,
                transforms.interpolation,
            );
        }
        if transforms.scale > 0.0 {
            frame = rescale_image(frame, transforms.scale);
        }
        if transforms.webp {
            Ok(TransformOutput {
                body: Bytes::from(encode_webp(&frame, transforms.quality)),
                content_type: "image/webp".to_string(),
            })
        } else {
            Ok(TransformOutput {
                body: Bytes::from(encode_jpeg(&frame, transforms.quality)?),
                content_type: "image/jpeg".to_string(),
            })
        }
    })
    .await
    .map_err(|e| ProxyError::Internal(format!("extraction task failed: {}", e)))??;

    spawn_write_back(&state, fp, None, output.clone());

    info!(
        url = %ctx.source_id(),
        hostname = %ctx.hostname,
        content_type = %output.content_type,
        signature = %ctx.signature_for_log(),
        "video preview served successfully"
    );
    obs::inc_served("video-preview", &ctx.hostname);

    Ok(media_response(
        output.body,
        &output.content_type,
        None,
        http_ttl,
    ))
}

// ---------------------------------------------------------------------------
// Shared read pipeline
// ---------------------------------------------------------------------------

/// Image read flow: memory cache → object-store cache → source fetch →
/// transform → fire-and-forget write-back.
async fn serve_image(state: &AppState, ctx: RequestContext) -> Result<Response, ProxyError> {
    let fp = fingerprint(&ctx);
    let http_ttl = state.config.cache.http_ttl_secs;

    if let Some(hit) = state.memory_cache.get(&fp) {
        obs::inc_served_cached("image", "response-handler");
        return Ok(media_response(
            hit.body,
            &hit.content_type,
            Some("response-handler"),
            http_ttl,
        ));
    }

    if let Some(object_cache) = &state.object_cache {
        if ctx.custom_object_key.is_none() {
            if let Some(artifact) = object_cache.get(&fp).await {
                obs::inc_served_cached("image", "s3cache");
                remember(state, &fp, &artifact.body, &artifact.content_type);
                return Ok(media_response(
                    artifact.body,
                    &artifact.content_type,
                    Some("s3cache"),
                    http_ttl,
                ));
            }
        }
    }

    // A caller-owned key is both cache and source: a hit is served as
    // stored, and only a miss with an upstream URL falls through to the
    // compute path.
    if let Some(location) = &ctx.custom_object_key {
        let object_cache = state
            .object_cache
            .as_ref()
            .ok_or_else(|| ProxyError::Disabled("object store is not configured".to_string()))?;
        match object_cache.get_at_location(location).await {
            Ok(artifact) => {
                obs::inc_served_cached("image", "s3cache-location");
                remember(state, &fp, &artifact.body, &artifact.content_type);
                return Ok(media_response(
                    artifact.body,
                    &artifact.content_type,
                    Some("s3cache-location"),
                    http_ttl,
                ));
            }
            Err(StorageError::NotFound { .. }) if ctx.source_url.is_some() => {}
            Err(e) => return Err(e.into()),
        }
    }

    let url = ctx
        .source_url
        .as_deref()
        .ok_or_else(|| ProxyError::BadInput("url or location is required".to_string()))?;

    let (media_type, body) = state.fetcher.fetch(url).await?;
    if !is_image_mime(&media_type) && !is_document_mime(&media_type) {
        return Err(ProxyError::AuthFailed(format!(
            "content type '{}' is not allowed",
            media_type
        )));
    }
    validate_size(body.len() as u64, state.config.proxy.max_image_size_mb)?;

    let transforms = ctx.transforms.clone();
    let source_type = media_type.clone();
    let output = tokio::task::spawn_blocking(move || {
        transform_image(body, &source_type, &transforms)
    })
    .await
    .map_err(|e| ProxyError::Internal(format!("transform task failed: {}", e)))??;

    spawn_write_back(state, fp, ctx.custom_object_key.clone(), output.clone());

    info!(
        url,
        hostname = %ctx.hostname,
        content_type = %media_type,
        signature = %ctx.signature_for_log(),
        "image served successfully"
    );
    obs::inc_served("image", &ctx.hostname);

    Ok(media_response(
        output.body,
        &output.content_type,
        None,
        http_ttl,
    ))
}

/// Populate the memory tier after an object-store hit.
fn remember(state: &AppState, fp: &str, body: &Bytes, content_type: &str) {
    state.memory_cache.insert(
        fp.to_string(),
        CachedArtifact {
            body: body.clone(),
            content_type: content_type.to_string(),
            etag: String::new(),
        },
        Duration::from_secs(state.config.cache.ttl_secs),
    );
}

/// Write-back of a computed artifact: memory immediately, object store as
/// a fire-and-forget task. Artifacts computed for a caller-owned key land
/// at that key; everything else is content-addressed.
fn spawn_write_back(
    state: &AppState,
    fp: String,
    location: Option<String>,
    output: TransformOutput,
) {
    state.memory_cache.insert(
        fp.clone(),
        CachedArtifact {
            body: output.body.clone(),
            content_type: output.content_type.clone(),
            etag: String::new(),
        },
        Duration::from_secs(state.config.cache.ttl_secs),
    );

    let Some(object_cache) = state.object_cache.clone() else {
        return;
    };
    state.shutdown.spawn_write_back(async move {
        match location {
            Some(location) => {
                if let Err(e) = object_cache
                    .put_at_location(&location, output.body, &output.content_type, None)
                    .await
                {
                    warn!(location, error = %e, "object-store write-back failed");
                }
            }
            None => {
                object_cache
                    .put(&fp, output.body, &output.content_type)
                    .await;
            }
        }
    });
}

/// A successful media response with cache headers and the observability
/// header naming the serving tier.
fn media_response(
    body: Bytes,
    content_type: &str,
    cache_place: Option<&str>,
    http_ttl_secs: u64,
) -> Response {
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, body.len().to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", http_ttl_secs),
            ),
        ],
        Body::from(body),
    )
        .into_response();

    if let Some(place) = cache_place {
        if let Ok(value) = place.parse() {
            response.headers_mut().insert(X_CACHE_PLACE.clone(), value);
        }
    }
    response
}
