use std::collections::HashMap;
use std::time::Instant;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::admission::mime::{is_video_mime, parse_media_type};
use crate::admission::params::{decode_base64url, validate_video_upload};
use crate::core::error::ProxyError;
use crate::core::security::{sanitize_object_key, validate_size};
use crate::observability::metrics as obs;
use crate::storage::session::{SessionStore, UploadSession};

use super::router::AppState;

// ---------------------------------------------------------------------------
// JSON bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    status: u16,
}

/// Upload endpoints speak JSON, including on failure.
fn error_json(status: StatusCode, error: &str, message: &str) -> Response {
    let body = ErrorResponse {
        error: error.to_string(),
        message: message.to_string(),
        status: status.as_u16(),
    };
    (status, Json(body)).into_response()
}

fn proxy_error_json(e: ProxyError) -> Response {
    obs::inc_request_error(e.kind());
    error_json(e.status(), e.kind(), &e.to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SingleUploadResponse {
    location: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartInitRequest {
    pub token: String,
    /// Unix seconds; the session never outlives this instant.
    pub deadline: i64,
    /// base64url-encoded object-store key.
    pub location: String,
    pub total_size: u64,
    pub content_type: String,
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MultipartInitResponse {
    #[serde(flatten)]
    session: UploadSession,
    uploaded_parts: Vec<u32>,
    complete: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MultipartPartResponse {
    upload_id: String,
    part_index: u32,
    parts_count: u32,
    uploaded_count: u32,
    complete: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MultipartStatusResponse {
    upload_id: String,
    location: String,
    total_size: u64,
    chunk_size: u64,
    content_type: String,
    parts_count: u32,
    uploaded_count: u32,
    uploaded_parts: Vec<u32>,
    complete: bool,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Single-shot video upload
// ---------------------------------------------------------------------------

/// `POST /videos?deadline=…&location=…&signature=…` — deadline-signed
/// atomic write of one video into the object store.
pub async fn upload_video(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Multipart,
) -> Response {
    obs::inc_request("video_upload");
    let start = Instant::now();

    if !state.config.upload.enabled {
        return proxy_error_json(ProxyError::Disabled(
            "video uploading is disabled".to_string(),
        ));
    }

    let location = match validate_video_upload(
        query.get("deadline").map(String::as_str),
        query.get("location").map(String::as_str),
        query.get("signature").map(String::as_str),
        Utc::now().timestamp(),
        &state.config.proxy,
    ) {
        Ok(location) => location,
        Err(e) => return proxy_error_json(e),
    };

    let Some(object_cache) = state.object_cache.clone() else {
        return proxy_error_json(ProxyError::Disabled(
            "object store is not configured".to_string(),
        ));
    };

    let (content_type, body) = match read_video_field(multipart).await {
        Ok(upload) => upload,
        Err(e) => return proxy_error_json(e),
    };
    if let Err(e) = validate_size(body.len() as u64, state.config.upload.max_video_size_mb) {
        return proxy_error_json(e);
    }

    let size = body.len() as u64;
    if let Err(e) = object_cache
        .put_at_location(&location, body, &content_type, None)
        .await
    {
        warn!(location, error = %e, "video upload write failed");
        return proxy_error_json(e.into());
    }

    obs::record_upload_size(size as f64);
    obs::record_upload_duration(start.elapsed().as_secs_f64());
    info!(location, size, content_type, "video uploaded");

    (
        StatusCode::CREATED,
        Json(SingleUploadResponse { location, size }),
    )
        .into_response()
}

/// Pull the single `video` file part out of a multipart form.
async fn read_video_field(mut multipart: Multipart) -> Result<(String, Bytes), ProxyError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ProxyError::BadInput(format!("failed to read form: {}", e)))?
    {
        if field.name() != Some("video") {
            continue;
        }
        let content_type = field
            .content_type()
            .and_then(parse_media_type)
            .ok_or_else(|| ProxyError::AuthFailed("no content type received".to_string()))?;
        if !is_video_mime(&content_type) {
            return Err(ProxyError::AuthFailed(format!(
                "content type '{}' is not allowed",
                content_type
            )));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ProxyError::TooLarge(format!("failed to read video file: {}", e)))?;
        return Ok((content_type, bytes));
    }
    Err(ProxyError::BadInput(
        "failed to get video file".to_string(),
    ))
}

// ---------------------------------------------------------------------------
// Multi-part coordinator
// ---------------------------------------------------------------------------

/// `POST /videos/multiparts` — open a session and enumerate its parts.
pub async fn multipart_init(
    State(state): State<AppState>,
    Json(request): Json<MultipartInitRequest>,
) -> Response {
    obs::inc_request("multipart_init");

    if !state.config.upload.enabled {
        return proxy_error_json(ProxyError::Disabled(
            "video uploading is disabled".to_string(),
        ));
    }
    let Some(sessions) = state.sessions.clone() else {
        return proxy_error_json(ProxyError::Disabled(
            "state store is not configured".to_string(),
        ));
    };

    match plan_session(&request, &state.config.proxy, &state.config.upload) {
        Ok(session) => match sessions.create(&session).await {
            Ok(()) => {
                info!(
                    upload_id = %session.upload_id,
                    location = %session.location,
                    parts = session.parts_count,
                    "multi-part upload session opened"
                );
                (
                    StatusCode::OK,
                    Json(MultipartInitResponse {
                        session,
                        uploaded_parts: Vec::new(),
                        complete: false,
                    }),
                )
                    .into_response()
            }
            Err(e) => proxy_error_json(e.into()),
        },
        Err(e) => proxy_error_json(e),
    }
}

/// Validate an init request and plan the session. Pure aside from clock
/// and randomness, so the admission rules are unit-testable.
pub(crate) fn plan_session(
    request: &MultipartInitRequest,
    proxy: &crate::core::config::ProxyConfig,
    upload: &crate::core::config::UploadConfig,
) -> Result<UploadSession, ProxyError> {
    if proxy.token.is_empty() || request.token != proxy.token {
        return Err(ProxyError::AuthFailed("invalid token".to_string()));
    }

    let deadline = DateTime::<Utc>::from_timestamp(request.deadline, 0)
        .ok_or_else(|| ProxyError::BadInput("invalid deadline format".to_string()))?;
    if deadline < Utc::now() {
        return Err(ProxyError::AuthFailed(
            "upload deadline has expired".to_string(),
        ));
    }

    let location = sanitize_object_key(&decode_base64url(&request.location)?)?;

    let content_type = parse_media_type(&request.content_type)
        .filter(|t| is_video_mime(t))
        .ok_or_else(|| {
            ProxyError::BadInput(format!(
                "content type '{}' is not allowed",
                request.content_type
            ))
        })?;

    if request.total_size == 0 {
        return Err(ProxyError::BadInput(
            "totalSize must be greater than zero".to_string(),
        ));
    }
    validate_size(request.total_size, upload.max_video_size_mb)?;

    let chunk_size = match request.chunk_size {
        Some(size) if size > 0 => size,
        _ => upload.chunk_size,
    };

    Ok(UploadSession::plan(
        location,
        request.total_size,
        chunk_size,
        content_type,
        deadline,
    ))
}

/// `POST /videos/multiparts/{upload_id}/parts/{part_index}?uploadToken=…`
/// — authenticated, idempotent write of one part.
pub async fn multipart_part(
    State(state): State<AppState>,
    Path((upload_id, part_index)): Path<(String, u32)>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Multipart,
) -> Response {
    obs::inc_request("multipart_part");
    let start = Instant::now();

    if !state.config.upload.enabled {
        return proxy_error_json(ProxyError::Disabled(
            "video uploading is disabled".to_string(),
        ));
    }
    let Some(sessions) = state.sessions.clone() else {
        return proxy_error_json(ProxyError::Disabled(
            "state store is not configured".to_string(),
        ));
    };
    let Some(object_cache) = state.object_cache.clone() else {
        return proxy_error_json(ProxyError::Disabled(
            "object store is not configured".to_string(),
        ));
    };

    let session = match sessions.fetch(&upload_id).await {
        Ok(session) => session,
        Err(e) => return proxy_error_json(e.into()),
    };
    if session.expires_at <= Utc::now() {
        return proxy_error_json(ProxyError::NotFound(
            "upload not found or expired".to_string(),
        ));
    }
    if query.get("uploadToken").map(String::as_str) != Some(session.upload_token.as_str()) {
        return proxy_error_json(ProxyError::AuthFailed("invalid upload token".to_string()));
    }

    let Some(expected) = session.parts.get(part_index as usize) else {
        return proxy_error_json(ProxyError::BadInput(format!(
            "invalid part index: {}",
            part_index
        )));
    };

    let body = match read_part_field(multipart).await {
        Ok(body) => body,
        Err(e) => return proxy_error_json(e),
    };
    if body.len() as u64 != expected.size {
        return proxy_error_json(ProxyError::TooLarge(format!(
            "part {} must be {} bytes, got {}",
            part_index,
            expected.size,
            body.len()
        )));
    }

    let size = body.len() as u64;
    let part_key = session.part_key(part_index);
    if let Err(e) = object_cache
        .put_at_location(
            &part_key,
            body,
            &session.content_type,
            Some(session.expires_at),
        )
        .await
    {
        warn!(part_key, error = %e, "part write failed");
        return proxy_error_json(e.into());
    }

    let uploaded = match sessions.mark_part_uploaded(&upload_id, part_index).await {
        Ok(uploaded) => uploaded,
        Err(e) => return proxy_error_json(e.into()),
    };
    let complete = uploaded.len() as u32 == session.parts_count;

    obs::record_upload_size(size as f64);
    obs::record_upload_duration(start.elapsed().as_secs_f64());
    info!(
        upload_id,
        part_index,
        uploaded = uploaded.len(),
        parts = session.parts_count,
        complete,
        "part uploaded"
    );

    Json(MultipartPartResponse {
        upload_id,
        part_index,
        parts_count: session.parts_count,
        uploaded_count: uploaded.len() as u32,
        complete,
    })
    .into_response()
}

/// The part endpoints reuse the `video` form field name.
async fn read_part_field(mut multipart: Multipart) -> Result<Bytes, ProxyError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ProxyError::BadInput(format!("failed to read form: {}", e)))?
    {
        if field.name() != Some("video") {
            continue;
        }
        return field
            .bytes()
            .await
            .map_err(|e| ProxyError::TooLarge(format!("failed to read part: {}", e)));
    }
    Err(ProxyError::BadInput(
        "failed to get video file".to_string(),
    ))
}

/// `GET /videos/multiparts/{upload_id}?token=…` — session status.
pub async fn multipart_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    obs::inc_request("multipart_status");

    if state.config.proxy.token.is_empty()
        || query.get("token").map(String::as_str) != Some(state.config.proxy.token.as_str())
    {
        return proxy_error_json(ProxyError::AuthFailed("invalid token".to_string()));
    }
    let Some(sessions) = state.sessions.clone() else {
        return proxy_error_json(ProxyError::Disabled(
            "state store is not configured".to_string(),
        ));
    };

    let session = match sessions.fetch(&upload_id).await {
        Ok(session) => session,
        Err(e) => return proxy_error_json(e.into()),
    };
    let uploaded = match sessions.uploaded_parts(&upload_id).await {
        Ok(uploaded) => uploaded,
        Err(e) => return proxy_error_json(e.into()),
    };

    let uploaded_parts: Vec<u32> = uploaded.into_iter().collect();
    let complete = uploaded_parts.len() as u32 == session.parts_count;

    Json(MultipartStatusResponse {
        upload_id: session.upload_id,
        location: session.location,
        total_size: session.total_size,
        chunk_size: session.chunk_size,
        content_type: session.content_type,
        parts_count: session.parts_count,
        uploaded_count: uploaded_parts.len() as u32,
        uploaded_parts,
        complete,
        created_at: session.created_at,
        expires_at: session.expires_at,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::params::encode_base64url;
    use crate::core::config::{ProxyConfig, UploadConfig};
    use crate::storage::session::testing::MemorySessionStore;

    fn proxy_config() -> ProxyConfig {
        ProxyConfig {
            allowed_origins: Vec::new(),
            webp_by_default: false,
            token: "app-token".to_string(),
            hmac_key: "k".to_string(),
            http_timeout_secs: 30,
            url_cache_size: 100,
            max_image_size_mb: 0,
        }
    }

    fn upload_config() -> UploadConfig {
        UploadConfig {
            enabled: true,
            chunk_size: 83_886_080,
            max_video_size_mb: 0,
        }
    }

    fn init_request() -> MultipartInitRequest {
        MultipartInitRequest {
            token: "app-token".to_string(),
            deadline: (Utc::now() + chrono::Duration::hours(2)).timestamp(),
            location: encode_base64url("videos/v.mp4"),
            total_size: 157_286_400,
            content_type: "video/mp4".to_string(),
            chunk_size: None,
        }
    }

    #[test]
    fn plan_session_happy_path() {
        let session = plan_session(&init_request(), &proxy_config(), &upload_config()).unwrap();
        assert_eq!(session.location, "videos/v.mp4");
        assert_eq!(session.parts_count, 2);
        assert_eq!(session.parts[0].size, 83_886_080);
        assert_eq!(session.parts[1].offset, 83_886_080);
        assert_eq!(session.parts[1].size, 73_400_320);
        assert_eq!(session.upload_token.len(), 64);
    }

    #[test]
    fn plan_session_rejects_bad_token() {
        let mut request = init_request();
        request.token = "wrong".to_string();
        let err = plan_session(&request, &proxy_config(), &upload_config()).unwrap_err();
        assert_eq!(err.kind(), "auth_failed");

        // an unset process token rejects everything
        let mut config = proxy_config();
        config.token.clear();
        let err = plan_session(&init_request(), &config, &upload_config()).unwrap_err();
        assert_eq!(err.kind(), "auth_failed");
    }

    #[test]
    fn plan_session_rejects_past_deadline() {
        let mut request = init_request();
        request.deadline = (Utc::now() - chrono::Duration::hours(1)).timestamp();
        let err = plan_session(&request, &proxy_config(), &upload_config()).unwrap_err();
        assert_eq!(err.kind(), "auth_failed");
    }

    #[test]
    fn plan_session_rejects_non_video_content_type() {
        let mut request = init_request();
        request.content_type = "image/png".to_string();
        let err = plan_session(&request, &proxy_config(), &upload_config()).unwrap_err();
        assert_eq!(err.kind(), "bad_input");
    }

    #[test]
    fn plan_session_rejects_oversize_and_zero_size() {
        let mut upload = upload_config();
        upload.max_video_size_mb = 100;
        let err = plan_session(&init_request(), &proxy_config(), &upload).unwrap_err();
        assert_eq!(err.kind(), "too_large");

        let mut request = init_request();
        request.total_size = 0;
        let err = plan_session(&request, &proxy_config(), &upload_config()).unwrap_err();
        assert_eq!(err.kind(), "bad_input");
    }

    #[test]
    fn plan_session_rejects_bad_location() {
        let mut request = init_request();
        request.location = encode_base64url("../escape");
        assert!(plan_session(&request, &proxy_config(), &upload_config()).is_err());

        request.location = "!!not-base64!!".to_string();
        assert!(plan_session(&request, &proxy_config(), &upload_config()).is_err());
    }

    #[test]
    fn plan_session_honors_explicit_chunk_size() {
        let mut request = init_request();
        request.chunk_size = Some(50_000_000);
        let session = plan_session(&request, &proxy_config(), &upload_config()).unwrap();
        assert_eq!(session.chunk_size, 50_000_000);
        assert_eq!(session.parts_count, 4);
    }

    #[tokio::test]
    async fn multi_part_happy_path_completes_after_all_parts() {
        let store = MemorySessionStore::default();
        let session = plan_session(&init_request(), &proxy_config(), &upload_config()).unwrap();
        store.create(&session).await.unwrap();

        let uploaded = store
            .mark_part_uploaded(&session.upload_id, 0)
            .await
            .unwrap();
        assert_eq!(uploaded.len(), 1);
        assert!((uploaded.len() as u32) < session.parts_count);

        let uploaded = store
            .mark_part_uploaded(&session.upload_id, 1)
            .await
            .unwrap();
        assert_eq!(uploaded.len() as u32, session.parts_count);
        assert_eq!(
            uploaded.iter().copied().collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[tokio::test]
    async fn resubmitting_a_part_does_not_change_completion() {
        let store = MemorySessionStore::default();
        let session = plan_session(&init_request(), &proxy_config(), &upload_config()).unwrap();
        store.create(&session).await.unwrap();

        for _ in 0..5 {
            store
                .mark_part_uploaded(&session.upload_id, 0)
                .await
                .unwrap();
        }
        let uploaded = store.uploaded_parts(&session.upload_id).await.unwrap();
        assert_eq!(uploaded.len(), 1);
    }
}
