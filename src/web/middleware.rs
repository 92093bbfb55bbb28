//! Cross-cutting request middleware: request-id assignment and the
//! ip-check → rate-check → audit-write security chain.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use uuid::Uuid;

use crate::errors::{AppError, Redacted};
use crate::security::audit::AuditRecord;
use crate::security::rate_limit::RateLimitDecision;
use crate::web::AppState;

/// Extension type carrying the request id, set here and read by handlers
/// and the error redactor.
#[derive(Clone, Copy)]
pub struct RequestId(pub Uuid);

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    req.extensions_mut().insert(RequestId(request_id));
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}

/// Runs ip-check then rate-check before the handler, and writes the audit
/// record after, regardless of whether the request was admitted or denied.
pub async fn security_chain(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .copied()
        .unwrap_or(RequestId(Uuid::nil()));
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let forwarded_for = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let client_ip = state
        .ip_policy
        .resolve_client_ip(peer.ip(), forwarded_for.as_deref());

    let platform = extract_platform_segment(&path);

    if let Err(e) = state.ip_policy.check(client_ip) {
        let kind = e.kind();
        let response = deny_response(e, request_id, state.config.server.detailed_errors);
        audit(
            &state,
            request_id,
            &client_ip.to_string(),
            &method,
            &path,
            &platform,
            response.status().as_u16(),
            0,
            started_at.elapsed(),
            Some(kind.to_string()),
        );
        return response;
    }

    match state.rate_limiter.check(&client_ip.to_string()).await {
        RateLimitDecision::Deny => {
            let error = AppError::Forbidden("rate limit exceeded".to_string());
            let kind = error.kind();
            let response = deny_response(error, request_id, state.config.server.detailed_errors);
            audit(
                &state,
                request_id,
                &client_ip.to_string(),
                &method,
                &path,
                &platform,
                response.status().as_u16(),
                0,
                started_at.elapsed(),
                Some(kind.to_string()),
            );
            return response;
        }
        RateLimitDecision::Allow => {}
    }

    let response = next.run(req).await;
    let status = response.status();
    let bytes_out = content_length(&response);
    let redacted_error = (!status.is_success()).then(|| {
        status
            .canonical_reason()
            .unwrap_or("error")
            .to_ascii_lowercase()
            .replace(' ', "_")
    });
    audit(
        &state,
        request_id,
        &client_ip.to_string(),
        &method,
        &path,
        &platform,
        status.as_u16(),
        bytes_out,
        started_at.elapsed(),
        redacted_error,
    );
    response
}

fn content_length(response: &Response) -> u64 {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn deny_response(error: AppError, request_id: RequestId, detailed: bool) -> Response {
    Redacted {
        error,
        request_id: request_id.0,
        detailed,
    }
    .into_response()
}

#[allow(clippy::too_many_arguments)]
fn audit(
    state: &AppState,
    request_id: RequestId,
    client_ip: &str,
    method: &str,
    path: &str,
    platform: &Option<String>,
    status_code: u16,
    bytes_out: u64,
    latency: std::time::Duration,
    redacted_error: Option<String>,
) {
    state.audit.record(AuditRecord {
        request_id: request_id.0,
        timestamp: Utc::now(),
        client_ip: client_ip.to_string(),
        method: method.to_string(),
        path: path.to_string(),
        status_code,
        bytes_out,
        latency_ms: latency.as_millis() as u64,
        redacted_error,
        platform: platform.clone(),
    });
}

fn extract_platform_segment(path: &str) -> Option<String> {
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some("api"), Some("v2"), Some(rest)) => {
            let remainder: Vec<&str> = segments.collect();
            if rest == "videos" {
                remainder.first().map(|s| s.to_string())
            } else if rest == "stream" {
                remainder.get(1).map(|s| s.to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}
