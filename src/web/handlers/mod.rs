pub mod health;
pub mod meta;
pub mod stream;
pub mod videos;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Success envelope shared by every non-streaming endpoint.
#[derive(Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    pub success: bool,
    pub message: &'static str,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn ok(message: &'static str, data: T) -> Self {
        Self {
            success: true,
            message,
            data,
            timestamp: Utc::now(),
        }
    }
}
