use std::collections::HashMap;

use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::errors::{AppError, Redacted};
use crate::models::{Platform, Quality};
use crate::streaming::StaleStream;
use crate::web::handlers::ApiEnvelope;
use crate::web::middleware::RequestId;
use crate::web::AppState;

fn parse_request(
    platform: &str,
    video_id: &str,
    params: &HashMap<String, String>,
) -> Result<(Platform, Quality), AppError> {
    let platform: Platform = platform.parse()?;
    if video_id.trim().is_empty() || !video_id.chars().all(|c| c.is_ascii_graphic()) {
        return Err(AppError::bad_request("video_id must be non-empty and printable"));
    }
    let quality = match params.get("quality") {
        Some(q) => q.parse::<Quality>()?,
        None => Quality::Best,
    };
    Ok((platform, quality))
}

/// Rejects a malformed `Range` header locally, before any upstream request
/// is made. Only single-range `bytes=<start>-<end>`, `bytes=<start>-`, and
/// `bytes=-<suffix>` forms are accepted, per RFC 7233 §2.1; anything else
/// (multi-range, a non-`bytes` unit, non-numeric bounds) is a 416.
fn validate_range(range: &HeaderValue) -> Result<(), AppError> {
    let value = range.to_str().map_err(|_| AppError::RangeNotSatisfiable)?;
    let spec = value.strip_prefix("bytes=").ok_or(AppError::RangeNotSatisfiable)?;
    if spec.contains(',') {
        return Err(AppError::RangeNotSatisfiable);
    }
    let (start, end) = spec.split_once('-').ok_or(AppError::RangeNotSatisfiable)?;
    let valid = match (start, end) {
        ("", suffix) => !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()),
        (start, "") => !start.is_empty() && start.chars().all(|c| c.is_ascii_digit()),
        (start, end) => {
            start.chars().all(|c| c.is_ascii_digit())
                && end.chars().all(|c| c.is_ascii_digit())
                && start.parse::<u64>().ok().zip(end.parse::<u64>().ok())
                    .is_some_and(|(s, e)| s <= e)
        }
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::RangeNotSatisfiable)
    }
}

pub async fn stream_direct(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path((platform, video_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let detailed = state.config.server.detailed_errors;

    let (platform, quality) = match parse_request(&platform, &video_id, &params) {
        Ok(v) => v,
        Err(error) => return Redacted { error, request_id, detailed }.into_response(),
    };

    let result = async {
        let info = state.resolver.resolve_info(platform, &video_id).await?;
        state.resolver.resolve_stream(&info, &quality).await
    }
    .await;

    match result {
        Ok(handle) => {
            let mut response = StatusCode::FOUND.into_response();
            if let Ok(value) = HeaderValue::from_str(&handle.direct_url) {
                response.headers_mut().insert(header::LOCATION, value);
            }
            response
        }
        Err(error) => Redacted { error, request_id, detailed }.into_response(),
    }
}

pub async fn stream_proxy(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path((platform, video_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: axum::http::HeaderMap,
) -> axum::response::Response {
    let detailed = state.config.server.detailed_errors;

    let (platform, quality) = match parse_request(&platform, &video_id, &params) {
        Ok(v) => v,
        Err(error) => return Redacted { error, request_id, detailed }.into_response(),
    };

    let client_range = headers.get(header::RANGE);
    if let Some(range) = client_range {
        if let Err(error) = validate_range(range) {
            return Redacted { error, request_id, detailed }.into_response();
        }
    }
    let accept_encoding = headers.get(header::ACCEPT_ENCODING);

    let info = match state.resolver.resolve_info(platform, &video_id).await {
        Ok(info) => info,
        Err(error) => return Redacted { error, request_id, detailed }.into_response(),
    };

    let mut handle = match state.resolver.resolve_stream(&info, &quality).await {
        Ok(handle) => handle,
        Err(error) => return Redacted { error, request_id, detailed }.into_response(),
    };

    for _attempt in 0..2 {
        let outcome = state
            .streaming
            .proxy(
                &handle,
                platform,
                &video_id,
                request_id,
                client_range,
                accept_encoding,
                state.metrics.clone(),
            )
            .await;

        match outcome {
            Ok(Ok((status, response_headers, body))) => {
                return (status, response_headers, body).into_response();
            }
            Ok(Err(StaleStream)) => {
                handle = match state.resolver.reresolve_stream(&info, &quality).await {
                    Ok(fresh) => fresh,
                    Err(error) => {
                        return Redacted { error, request_id, detailed }.into_response()
                    }
                };
                continue;
            }
            Err(error) => return Redacted { error, request_id, detailed }.into_response(),
        }
    }

    Redacted {
        error: AppError::UpstreamUnavailable,
        request_id,
        detailed,
    }
    .into_response()
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiEnvelope::ok("streaming metrics", state.metrics.snapshot()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).unwrap()
    }

    #[test]
    fn accepts_well_formed_ranges() {
        assert!(validate_range(&range("bytes=0-499")).is_ok());
        assert!(validate_range(&range("bytes=500-")).is_ok());
        assert!(validate_range(&range("bytes=-500")).is_ok());
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert!(validate_range(&range("bytes=500-100")).is_err());
        assert!(validate_range(&range("bytes=0-10,20-30")).is_err());
        assert!(validate_range(&range("items=0-10")).is_err());
        assert!(validate_range(&range("bytes=abc-def")).is_err());
        assert!(validate_range(&range("bytes=-")).is_err());
    }
}
