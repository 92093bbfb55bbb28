use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::health::HealthStatus;
use crate::web::handlers::ApiEnvelope;
use crate::web::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.probe.health().await;
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ApiEnvelope::ok("system health", report)))
}
