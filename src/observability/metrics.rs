use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Metrics catalog
// ---------------------------------------------------------------------------

/// Install the Prometheus recorder. Must run before any metric is recorded.
pub fn install_prometheus_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Register all metric descriptors at startup.
pub fn describe_all_metrics() {
    describe_counter!(
        "mediaproxy_requests_total",
        "Requests received, by route family"
    );
    describe_counter!(
        "mediaproxy_request_errors_total",
        "Requests terminated by an error, by kind"
    );
    describe_counter!(
        "mediaproxy_served_total",
        "Successfully served media responses"
    );
    describe_counter!(
        "mediaproxy_served_cached_total",
        "Media responses served from a cache tier"
    );
    describe_counter!("mediaproxy_cache_hits_total", "Cache hits by tier");
    describe_counter!("mediaproxy_cache_misses_total", "Cache misses by tier");
    describe_gauge!(
        "mediaproxy_memory_cache_size_bytes",
        "Weighted size of the in-memory artifact cache"
    );
    describe_histogram!(
        "mediaproxy_source_fetch_duration_seconds",
        "Upstream source fetch latency"
    );
    describe_histogram!(
        "mediaproxy_storage_get_duration_seconds",
        "Object-store GET latency"
    );
    describe_histogram!(
        "mediaproxy_storage_put_duration_seconds",
        "Object-store PUT latency"
    );
    describe_counter!(
        "mediaproxy_storage_retries_total",
        "Object-store operation retries"
    );
    describe_histogram!(
        "mediaproxy_transform_duration_seconds",
        "Image transform latency"
    );
    describe_histogram!(
        "mediaproxy_frame_extract_duration_seconds",
        "Video frame extraction latency"
    );
    describe_histogram!(
        "mediaproxy_upload_size_bytes",
        "Upload sizes (single and per part)"
    );
    describe_histogram!(
        "mediaproxy_upload_duration_seconds",
        "Upload handling latency"
    );
    describe_gauge!("mediaproxy_uptime_seconds", "Process uptime");
    describe_counter!(
        "mediaproxy_panic_total",
        "Total panics caught (should always be 0)"
    );
}

// ---------------------------------------------------------------------------
// Metric recording helpers
// ---------------------------------------------------------------------------

pub fn inc_request(route: &str) {
    counter!("mediaproxy_requests_total", "route" => route.to_string()).increment(1);
}

pub fn inc_request_error(kind: &str) {
    counter!("mediaproxy_request_errors_total", "kind" => kind.to_string()).increment(1);
}

pub fn inc_served(media_type: &str, hostname: &str) {
    counter!(
        "mediaproxy_served_total",
        "type" => media_type.to_string(),
        "hostname" => hostname.to_string()
    )
    .increment(1);
}

pub fn inc_served_cached(media_type: &str, place: &str) {
    counter!(
        "mediaproxy_served_cached_total",
        "type" => media_type.to_string(),
        "place" => place.to_string()
    )
    .increment(1);
}

pub fn inc_cache_hit(tier: &str) {
    counter!("mediaproxy_cache_hits_total", "tier" => tier.to_string()).increment(1);
}

pub fn inc_cache_miss(tier: &str) {
    counter!("mediaproxy_cache_misses_total", "tier" => tier.to_string()).increment(1);
}

pub fn set_memory_cache_size(bytes: f64) {
    gauge!("mediaproxy_memory_cache_size_bytes").set(bytes);
}

pub fn record_source_fetch_duration(seconds: f64) {
    histogram!("mediaproxy_source_fetch_duration_seconds").record(seconds);
}

pub fn record_storage_get_duration(seconds: f64) {
    histogram!("mediaproxy_storage_get_duration_seconds").record(seconds);
}

pub fn record_storage_put_duration(seconds: f64) {
    histogram!("mediaproxy_storage_put_duration_seconds").record(seconds);
}

pub fn inc_storage_retry(operation: &str) {
    counter!("mediaproxy_storage_retries_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_transform_duration(seconds: f64) {
    histogram!("mediaproxy_transform_duration_seconds").record(seconds);
}

pub fn record_frame_extract_duration(seconds: f64) {
    histogram!("mediaproxy_frame_extract_duration_seconds").record(seconds);
}

pub fn record_upload_size(bytes: f64) {
    histogram!("mediaproxy_upload_size_bytes").record(bytes);
}

pub fn record_upload_duration(seconds: f64) {
    histogram!("mediaproxy_upload_duration_seconds").record(seconds);
}

pub fn inc_panic_total() {
    counter!("mediaproxy_panic_total").increment(1);
}

/// Refresh the uptime gauge every 10 seconds until shutdown.
pub async fn run_uptime_task(start_time: Instant, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                gauge!("mediaproxy_uptime_seconds").set(start_time.elapsed().as_secs_f64());
            }
        }
    }
}
