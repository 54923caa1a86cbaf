use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use mediaproxy::admission::origin::OriginValidator;
use mediaproxy::core::config::AppConfig;
use mediaproxy::core::shutdown::ShutdownCoordinator;
use mediaproxy::delivery::router::{self, AppState};
use mediaproxy::fetch::HttpFetcher;
use mediaproxy::observability::metrics as obs_metrics;
use mediaproxy::storage::memory::MemoryCache;
use mediaproxy::storage::object_cache::ObjectStoreCache;
use mediaproxy::storage::s3::S3Store;
use mediaproxy::storage::session::RedisSessionStore;

#[tokio::main]
async fn main() -> ExitCode {
    // The Prometheus recorder must be installed before any metric is
    // recorded.
    let metrics_handle = obs_metrics::install_prometheus_recorder();

    // Panic hook: log with backtrace and count.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        obs_metrics::inc_panic_total();
        let backtrace = std::backtrace::Backtrace::force_capture();
        eprintln!("PANIC: {panic_info}\nBacktrace:\n{backtrace}");
        default_hook(panic_info);
    }));

    let config = AppConfig::load();

    init_tracing(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    info!(version = env!("CARGO_PKG_VERSION"), "mediaproxy starting");
    obs_metrics::describe_all_metrics();

    let shutdown = ShutdownCoordinator::new();

    let fetcher = match HttpFetcher::new(config.proxy.http_timeout_secs) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            error!(error = %e, "failed to build upstream HTTP client");
            return ExitCode::FAILURE;
        }
    };

    let memory_cache = Arc::new(MemoryCache::new(config.cache.max_cost));

    let object_cache = if config.s3.is_usable() {
        let store = Arc::new(S3Store::new(&config.s3));
        info!(bucket = %config.s3.bucket, prefix = %config.s3.prefix, "object-store cache enabled");
        Some(Arc::new(ObjectStoreCache::new(store)))
    } else {
        if config.s3.enabled {
            warn!("S3 enabled but endpoint/credentials/bucket missing, treating as disabled");
        }
        None
    };

    let sessions = if config.redis.is_usable() {
        match RedisSessionStore::connect(&config.redis.url()).await {
            Ok(store) => {
                info!(addr = %config.redis.addr, "upload session store connected");
                Some(store)
            }
            Err(e) => {
                warn!(error = %e, "failed to connect session store, multi-part uploads disabled");
                None
            }
        }
    } else {
        None
    };

    let origins = Arc::new(OriginValidator::new(
        config.proxy.allowed_origins.clone(),
        config.proxy.url_cache_size,
    ));

    let start_time = std::time::Instant::now();
    let state = AppState {
        config: config.clone(),
        fetcher,
        memory_cache,
        object_cache,
        sessions,
        origins,
        shutdown: shutdown.clone(),
        start_time,
        metrics_handle,
    };
    let app = router::build_router(state);

    let uptime_cancel = shutdown.token();
    tokio::spawn(async move {
        obs_metrics::run_uptime_task(start_time, uptime_cancel).await;
    });

    let listener = match tokio::net::TcpListener::bind(&config.server.address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %config.server.address, error = %e, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    info!(
        address = %config.server.address,
        origins = ?config.proxy.allowed_origins,
        uploading = config.upload.enabled,
        "HTTP server listening"
    );

    let server_token = shutdown.token();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_token.cancelled().await;
            })
            .await
    });

    shutdown.wait_for_signal_and_shutdown().await;

    info!("draining HTTP server");
    let drained = tokio::time::timeout(
        std::time::Duration::from_secs(mediaproxy::core::shutdown::SHUTDOWN_TIMEOUT_SECS),
        server,
    )
    .await;

    // Give in-flight cache write-backs a chance to land before exit.
    let flushed = tokio::time::timeout(
        std::time::Duration::from_secs(mediaproxy::core::shutdown::WRITE_BACK_FLUSH_TIMEOUT_SECS),
        shutdown.drain_write_backs(),
    )
    .await;
    if flushed.is_err() {
        warn!("cache write-backs did not finish before timeout");
    }

    match drained {
        Ok(Ok(Ok(()))) => {
            info!("graceful shutdown completed");
            ExitCode::SUCCESS
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "HTTP server error");
            ExitCode::FAILURE
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
            ExitCode::FAILURE
        }
        Err(_) => {
            error!(
                "shutdown timed out after {}s, forcing exit",
                mediaproxy::core::shutdown::SHUTDOWN_TIMEOUT_SECS
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_level: &str, log_format: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_format {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
