use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};

use crate::admission::origin::OriginValidator;
use crate::core::config::AppConfig;
use crate::core::security;
use crate::core::shutdown::ShutdownCoordinator;
use crate::fetch::HttpFetcher;
use crate::storage::memory::MemoryCache;
use crate::storage::object_cache::ObjectStoreCache;
use crate::storage::session::RedisSessionStore;

use super::middleware::ResponseCacheLayer;
use super::{handlers, proxy, upload};

// ---------------------------------------------------------------------------
// Application state + router
// ---------------------------------------------------------------------------

/// Shared state handed to every handler. All collaborators are explicit;
/// there are no ambient singletons past construction.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub fetcher: Arc<HttpFetcher>,
    pub memory_cache: Arc<MemoryCache>,
    /// `None` when S3 is disabled or misconfigured.
    pub object_cache: Option<Arc<ObjectStoreCache>>,
    /// `None` when Redis is disabled or unreachable at startup.
    pub sessions: Option<RedisSessionStore>,
    pub origins: Arc<OriginValidator>,
    /// Tracks fire-and-forget write-backs so shutdown can flush them.
    pub shutdown: ShutdownCoordinator,
    pub start_time: std::time::Instant,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Build the full Axum router.
///
/// Route table:
/// - `GET  /health`                                         — liveness
/// - `GET  /metrics`                                        — Prometheus
/// - `GET  /image`                                          — image, query form
/// - `GET  /images/{*params}`                               — image transform
/// - `POST /images/{*params}`                               — image upload
/// - `GET  /videos/preview/{*params}`                       — frame preview
/// - `GET  /videos/{*params}`                               — raw proxy (range-aware)
/// - `POST /videos`                                         — single video upload
/// - `POST /videos/multiparts`                              — multi-part init
/// - `POST /videos/multiparts/{upload_id}/parts/{part_index}` — part upload
/// - `GET  /videos/multiparts/{upload_id}`                  — session status
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([http::Method::GET, http::Method::HEAD, http::Method::POST])
        .allow_headers([http::header::RANGE, http::header::CONTENT_TYPE])
        .expose_headers([
            http::header::CONTENT_LENGTH,
            http::header::CONTENT_RANGE,
            http::header::ACCEPT_RANGES,
        ])
        .max_age(Duration::from_secs(86400));

    let body_limit = DefaultBodyLimit::max(security::body_limit_bytes(
        state.config.upload.enabled,
        state.config.upload.chunk_size,
        state.config.upload.max_video_size_mb,
    ));

    let response_cache = ResponseCacheLayer::new(
        state.memory_cache.clone(),
        Duration::from_secs(state.config.cache.http_ttl_secs),
    );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/image", get(handlers::image_query))
        .route(
            "/images/{*params}",
            get(handlers::image_get).post(handlers::image_post),
        )
        .route("/videos/preview/{*params}", get(handlers::video_preview))
        .route("/videos", post(upload::upload_video))
        .route("/videos/multiparts", post(upload::multipart_init))
        .route(
            "/videos/multiparts/{upload_id}",
            get(upload::multipart_status),
        )
        .route(
            "/videos/multiparts/{upload_id}/parts/{part_index}",
            post(upload::multipart_part),
        )
        .route("/videos/{*params}", get(proxy::video_proxy))
        .layer(response_cache)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(body_limit)
        .with_state(state)
}
