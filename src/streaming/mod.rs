//! Relays upstream media bytes to the client without buffering the whole
//! response, forwarding `Range` requests and re-emitting only the response
//! headers a media client actually needs.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use tracing::{error, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::metrics::StreamingMetricsAggregator;
use crate::models::{Platform, StreamHandle, TransferOutcome};

/// Response headers worth forwarding from upstream. Anything else (cookies,
/// upstream-specific cache directives, server banners) is dropped.
const FORWARDED_RESPONSE_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::LAST_MODIFIED,
    header::ETAG,
];

/// Upstream statuses passed straight through to the client; anything else
/// is normalized to 502 rather than leaking an unfamiliar upstream status.
const PASSTHROUGH_STATUSES: [u16; 6] = [200, 206, 304, 403, 404, 410];

pub struct StreamingEngine {
    client: Client,
}

/// Signals the caller should invalidate the cached `StreamHandle` and
/// re-resolve once before giving up, per the staleness-recovery contract:
/// upstream answered 403/410 before any bytes were written.
pub struct StaleStream;

impl Default for StreamingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingEngine {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .redirect(reqwest::redirect::Policy::limited(5))
                .build()
                .expect("reqwest client builder failed"),
        }
    }

    /// Streams the handle's upstream URL to the client, forwarding `Range`
    /// and any extractor-supplied headers. The returned body records bytes
    /// and reports a `transfer_ended` metrics event exactly once, on drop,
    /// whether the transfer finished, errored, or the client disconnected.
    pub async fn proxy(
        &self,
        handle: &StreamHandle,
        platform: Platform,
        video_id: &str,
        request_id: Uuid,
        client_range: Option<&HeaderValue>,
        accept_encoding: Option<&HeaderValue>,
        metrics: Arc<StreamingMetricsAggregator>,
    ) -> Result<Result<(StatusCode, HeaderMap, Body), StaleStream>, AppError> {
        let mut req = self.client.get(&handle.direct_url);
        for (name, value) in &handle.upstream_headers_hint {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(range) = client_range {
            req = req.header(header::RANGE, range.clone());
        }
        if let Some(encoding) = accept_encoding {
            req = req.header(header::ACCEPT_ENCODING, encoding.clone());
        }

        let upstream = req.send().await.map_err(|e| {
            warn!(error = %e, video_id, "upstream request failed before headers");
            AppError::UpstreamUnavailable
        })?;

        let status = upstream.status();
        if status.as_u16() == 403 || status.as_u16() == 410 {
            return Ok(Err(StaleStream));
        }

        let mut response_headers = HeaderMap::new();
        for name in FORWARDED_RESPONSE_HEADERS {
            if let Some(value) = upstream.headers().get(name) {
                response_headers.insert(name.clone(), value.clone());
            }
        }
        let remaining = (handle.expires_at - chrono::Utc::now()).num_seconds().max(0);
        if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={remaining}")) {
            response_headers.insert(header::CACHE_CONTROL, value);
        }

        let axum_status = if PASSTHROUGH_STATUSES.contains(&status.as_u16()) {
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY)
        } else {
            StatusCode::BAD_GATEWAY
        };

        metrics.transfer_started(request_id, platform, video_id);

        let accounted = AccountedStream {
            inner: upstream.bytes_stream(),
            metrics,
            request_id,
            platform,
            started_at: Instant::now(),
            bytes_served: 0,
            outcome: TransferOutcome::Ok,
            completed: false,
        };

        Ok(Ok((axum_status, response_headers, Body::from_stream(accounted))))
    }
}

/// Wraps the upstream byte stream to count bytes and report exactly one
/// `transfer_ended` metrics event on drop. Axum drops the body stream both
/// on normal completion and on client disconnect, so `Drop` is the one
/// place that reliably fires in both cases.
struct AccountedStream<S> {
    inner: S,
    metrics: Arc<StreamingMetricsAggregator>,
    request_id: Uuid,
    platform: Platform,
    started_at: Instant,
    bytes_served: u64,
    outcome: TransferOutcome,
    /// Set once the inner stream reaches its natural end. If the wrapper is
    /// dropped before this is set and no error was observed, the client
    /// disconnected mid-transfer.
    completed: bool,
}

impl<S> Stream for AccountedStream<S>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                this.bytes_served += bytes.len() as u64;
                this.metrics.transfer_bytes(this.platform, bytes.len() as u64);
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => {
                error!(error = %e, "upstream stream error mid-transfer");
                this.outcome = if e.is_timeout() {
                    TransferOutcome::Timeout
                } else {
                    TransferOutcome::UpstreamError
                };
                Poll::Ready(Some(Err(std::io::Error::new(std::io::ErrorKind::Other, e))))
            }
            Poll::Ready(None) => {
                this.completed = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for AccountedStream<S> {
    fn drop(&mut self) {
        if !self.completed && self.outcome == TransferOutcome::Ok {
            self.outcome = TransferOutcome::ClientClosed;
        }
        let duration = self.started_at.elapsed().as_secs_f64();
        self.metrics.transfer_ended(
            self.request_id,
            self.platform,
            self.outcome,
            self.bytes_served,
            duration,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_headers_list_excludes_set_cookie() {
        assert!(!FORWARDED_RESPONSE_HEADERS.contains(&header::SET_COOKIE));
        assert!(FORWARDED_RESPONSE_HEADERS.contains(&header::CONTENT_TYPE));
    }
}
