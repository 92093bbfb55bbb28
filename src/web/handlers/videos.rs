use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::errors::{AppError, Redacted};
use crate::models::Platform;
use crate::web::handlers::ApiEnvelope;
use crate::web::middleware::RequestId;
use crate::web::AppState;

pub async fn get_video_info(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path((platform, video_id)): Path<(String, String)>,
) -> axum::response::Response {
    let detailed = state.config.server.detailed_errors;

    let platform: Platform = match platform.parse() {
        Ok(p) => p,
        Err(e) => {
            return Redacted {
                error: AppError::from(e),
                request_id,
                detailed,
            }
            .into_response()
        }
    };

    if video_id.trim().is_empty() || !video_id.chars().all(|c| c.is_ascii_graphic()) {
        return Redacted {
            error: AppError::bad_request("video_id must be non-empty and printable"),
            request_id,
            detailed,
        }
        .into_response();
    }

    match state.resolver.resolve_info(platform, &video_id).await {
        Ok(info) => Json(ApiEnvelope::ok("video info", info)).into_response(),
        Err(error) => Redacted {
            error,
            request_id,
            detailed,
        }
        .into_response(),
    }
}
