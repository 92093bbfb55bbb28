use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::models::Platform;
use crate::web::handlers::ApiEnvelope;

#[derive(Serialize)]
pub struct ServiceMetadata {
    name: &'static str,
    version: &'static str,
    supported_platforms: Vec<&'static str>,
}

pub async fn service_metadata() -> impl IntoResponse {
    let data = ServiceMetadata {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        supported_platforms: Platform::ALL.iter().map(|p| p.as_str()).collect(),
    };
    Json(ApiEnvelope::ok("service metadata", data))
}
