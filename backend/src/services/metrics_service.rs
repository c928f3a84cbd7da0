//! Prometheus metrics collection and HTTP request instrumentation.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

use axum::{
    body::Body,
    http::{Request, Response},
    middleware::Next,
};

use crate::error::{AppError, Result};

/// Install the Prometheus recorder and return the handle for rendering.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(format!("Failed to install Prometheus recorder: {}", e)))
}

/// Axum middleware that records HTTP request metrics.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let normalized = normalize_path(request.uri().path());

    let start = Instant::now();
    counter!("hk_http_requests_total", "method" => method.clone(), "path" => normalized.clone())
        .increment(1);
    gauge!("hk_http_requests_in_flight", "method" => method.clone(), "path" => normalized.clone())
        .increment(1.0);

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    histogram!("hk_http_request_duration_seconds", "method" => method.clone(), "path" => normalized.clone(), "status" => status.clone()).record(duration);
    counter!("hk_http_responses_total", "method" => method.clone(), "path" => normalized.clone(), "status" => status).increment(1);
    gauge!("hk_http_requests_in_flight", "method" => method, "path" => normalized).decrement(1.0);

    response
}

fn is_backup_id(seg: &str) -> bool {
    let rest = seg
        .strip_prefix("family-tree-")
        .or_else(|| seg.strip_prefix("cms-"));
    match rest {
        Some(rest) => rest.starts_with("auto-") || rest.starts_with("manual-"),
        None => false,
    }
}

/// Replace backup ids, UUIDs and numeric ids with `:id`.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            let is_uuid = seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4;
            let is_numeric = !seg.is_empty() && seg.parse::<i64>().is_ok();
            if is_uuid || is_numeric || is_backup_id(seg) {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Record a backup run.
pub fn record_backup(realm: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "failure" };
    counter!("hk_backup_operations_total", "realm" => realm.to_string(), "status" => status.to_string()).increment(1);
    histogram!("hk_backup_duration_seconds", "realm" => realm.to_string()).record(duration_secs);
}

/// Record a restore run.
pub fn record_restore(realm: &str, success: bool, restored_records: u64) {
    let status = if success { "success" } else { "failure" };
    counter!("hk_restore_operations_total", "realm" => realm.to_string(), "status" => status.to_string()).increment(1);
    counter!("hk_restored_records_total", "realm" => realm.to_string()).increment(restored_records);
}

/// Record a cleanup operation.
pub fn record_cleanup(cleanup_type: &str, items_removed: u64) {
    counter!("hk_cleanup_items_removed_total", "type" => cleanup_type.to_string())
        .increment(items_removed);
}

/// Record a rejected request at the auth boundary.
pub fn record_auth_denied(realm: &str, reason: &str) {
    counter!("hk_auth_denied_total", "realm" => realm.to_string(), "reason" => reason.to_string())
        .increment(1);
}
