//! Prometheus metrics: recorder setup, the `/metrics` endpoint and HTTP
//! request tracking.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::api::auth::LOGIN_ATTEMPTS_TOTAL;
use crate::engine::checkout::ORDERS_CREATED_TOTAL;
use crate::notifications::PUSH_SENT_TOTAL;
use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const PRODUCTS_TOTAL: &str = "oxistore_products_total";
pub const ACTIVE_RENTALS: &str = "oxistore_active_rentals";

/// Install the global Prometheus recorder. Call once at startup.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_counter!(ORDERS_CREATED_TOTAL, "Orders placed through checkout");
    describe_counter!(PUSH_SENT_TOTAL, "Push deliveries by outcome (delivered/gone/failed)");
    describe_counter!(LOGIN_ATTEMPTS_TOTAL, "Login attempts by result (success/failure)");
    describe_gauge!(PRODUCTS_TOTAL, "Number of products in the catalog");
    describe_gauge!(ACTIVE_RENTALS, "Rentals currently out (rented or late)");

    Ok(handle)
}

/// GET /metrics
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauges(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauges(state: &AppState) {
    if let Ok(count) = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products")
        .fetch_one(&state.db)
        .await
    {
        gauge!(PRODUCTS_TOTAL).set(count as f64);
    }

    if let Ok(count) = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM rental_orders WHERE status IN ('rented', 'late')",
    )
    .fetch_one(&state.db)
    .await
    {
        gauge!(ACTIVE_RENTALS).set(count as f64);
    }
}

/// Count and time every request by method, route template and status
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        for name in [HTTP_REQUESTS_TOTAL, ORDERS_CREATED_TOTAL, PUSH_SENT_TOTAL, LOGIN_ATTEMPTS_TOTAL] {
            assert!(name.ends_with("_total"), "{} should end with _total", name);
        }
        assert!(HTTP_REQUEST_DURATION_SECONDS.ends_with("_seconds"));
        assert!(PRODUCTS_TOTAL.starts_with("oxistore_"));
    }
}
