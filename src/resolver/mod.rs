//! Video resolution: the cache-then-extractor policy layer between the web
//! handlers and the extractor adapter.
//!
//! Concurrent requests for the same (platform, video_id[, quality]) are
//! coalesced onto a single in-flight extractor call via `dashmap` plus a
//! `futures::future::Shared` future, mirroring the cache-check-then-fetch
//! shape the extractor adapter's grounding file uses, generalized to avoid
//! the duplicate-work race a plain read-then-write cache check leaves open.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::cache::{keys, CacheStore};
use crate::config::TtlConfig;
use crate::errors::AppError;
use crate::extractor::ExtractorAdapter;
use crate::models::{Platform, Quality, StreamHandle, VideoInfo};

type SharedInfoResult = Shared<BoxFuture<'static, Result<VideoInfo, AppErrorKey>>>;
type SharedStreamResult = Shared<BoxFuture<'static, Result<StreamHandle, AppErrorKey>>>;

/// `AppError` doesn't implement `Clone` (thiserror sources aren't generally
/// cloneable), but a `Shared` future's output must be. This carries just
/// enough to reconstruct an equivalent `AppError` for every waiter.
#[derive(Clone, Debug)]
struct AppErrorKey(String, ErrorShape);

#[derive(Clone, Debug)]
enum ErrorShape {
    BadRequest,
    NotFound,
    UnsupportedPlatform,
    Forbidden,
    UpstreamUnavailable,
    Timeout,
    RangeNotSatisfiable,
    ExtractorProtocol,
    ExtractorInternal,
    Internal,
}

impl From<AppError> for AppErrorKey {
    fn from(e: AppError) -> Self {
        let shape = match &e {
            AppError::BadRequest(_) => ErrorShape::BadRequest,
            AppError::NotFound => ErrorShape::NotFound,
            AppError::UnsupportedPlatform(_) => ErrorShape::UnsupportedPlatform,
            AppError::Forbidden(_) => ErrorShape::Forbidden,
            AppError::UpstreamUnavailable => ErrorShape::UpstreamUnavailable,
            AppError::Timeout => ErrorShape::Timeout,
            AppError::RangeNotSatisfiable => ErrorShape::RangeNotSatisfiable,
            AppError::ExtractorProtocolError(_) => ErrorShape::ExtractorProtocol,
            AppError::ExtractorInternalError(_) => ErrorShape::ExtractorInternal,
            AppError::CacheUnavailable => ErrorShape::Internal,
            AppError::Internal(_) => ErrorShape::Internal,
        };
        AppErrorKey(e.to_string(), shape)
    }
}

impl From<AppErrorKey> for AppError {
    fn from(k: AppErrorKey) -> Self {
        match k.1 {
            ErrorShape::BadRequest => AppError::BadRequest(k.0),
            ErrorShape::NotFound => AppError::NotFound,
            ErrorShape::UnsupportedPlatform => AppError::UnsupportedPlatform(k.0),
            ErrorShape::Forbidden => AppError::Forbidden(k.0),
            ErrorShape::UpstreamUnavailable => AppError::UpstreamUnavailable,
            ErrorShape::Timeout => AppError::Timeout,
            ErrorShape::RangeNotSatisfiable => AppError::RangeNotSatisfiable,
            ErrorShape::ExtractorProtocol => AppError::ExtractorProtocolError(k.0),
            ErrorShape::ExtractorInternal => AppError::ExtractorInternalError(k.0),
            ErrorShape::Internal => AppError::Internal(k.0),
        }
    }
}

pub struct VideoResolver {
    cache: Arc<dyn CacheStore>,
    extractor: Arc<ExtractorAdapter>,
    ttl: TtlConfig,
    info_inflight: DashMap<String, SharedInfoResult>,
    stream_inflight: DashMap<String, SharedStreamResult>,
}

impl VideoResolver {
    pub fn new(cache: Arc<dyn CacheStore>, extractor: Arc<ExtractorAdapter>, ttl: TtlConfig) -> Self {
        Self {
            cache,
            extractor,
            ttl,
            info_inflight: DashMap::new(),
            stream_inflight: DashMap::new(),
        }
    }

    pub async fn resolve_info(
        &self,
        platform: Platform,
        video_id: &str,
    ) -> Result<VideoInfo, AppError> {
        let cache_key = keys::video_info(platform, video_id);

        match self.cache.get(&cache_key).await {
            Ok(Some(raw)) => {
                if let Ok(info) = serde_json::from_str::<VideoInfo>(&raw) {
                    debug!(key = %cache_key, "video info cache hit");
                    return Ok(info);
                }
                warn!(key = %cache_key, "cached video info was unparseable, refetching");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cache unavailable on info lookup, bypassing"),
        }

        // `entry(...).or_insert_with(...)` is one atomic operation under the
        // shard lock, so two concurrent cold-cache callers for the same key
        // can never both build and insert their own extractor future.
        let fut = self
            .info_inflight
            .entry(cache_key.clone())
            .or_insert_with(|| {
                let extractor = self.extractor.clone();
                let cache = self.cache.clone();
                let ttl = self.ttl.get(platform).video_info_secs;
                let key_for_store = cache_key.clone();
                let video_id = video_id.to_string();

                async move {
                    let result = extractor.fetch_video_info(platform, &video_id).await;
                    if let Ok(info) = &result {
                        if let Ok(serialized) = serde_json::to_string(info) {
                            let _ = cache
                                .set(&key_for_store, &serialized, Duration::from_secs(ttl))
                                .await;
                        }
                    }
                    result.map_err(AppErrorKey::from)
                }
                .boxed()
                .shared()
            })
            .clone();

        let result = fut.await;
        self.info_inflight.remove(&cache_key);
        result.map_err(AppError::from)
    }

    pub async fn resolve_stream(
        &self,
        info: &VideoInfo,
        quality: &Quality,
    ) -> Result<StreamHandle, AppError> {
        let cache_key = keys::stream_handle(info.platform, &info.id, &quality.as_label());

        match self.cache.get(&cache_key).await {
            Ok(Some(raw)) => {
                if let Ok(handle) = serde_json::from_str::<StreamHandle>(&raw) {
                    if !handle.is_expired(chrono::Utc::now()) {
                        debug!(key = %cache_key, "stream handle cache hit");
                        return Ok(handle);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cache unavailable on stream lookup, bypassing"),
        }

        self.resolve_stream_uncached(info, quality, &cache_key).await
    }

    async fn resolve_stream_uncached(
        &self,
        info: &VideoInfo,
        quality: &Quality,
        cache_key: &str,
    ) -> Result<StreamHandle, AppError> {
        // Same atomic entry-or-insert as `resolve_info`, keyed on the stream
        // handle's cache key.
        let fut = self
            .stream_inflight
            .entry(cache_key.to_string())
            .or_insert_with(|| {
                let extractor = self.extractor.clone();
                let cache = self.cache.clone();
                let ttl = self.ttl.get(info.platform).stream_handle_secs;
                let info = info.clone();
                let quality = quality.clone();
                let key_for_store = cache_key.to_string();

                async move {
                    let result = extractor
                        .resolve_stream(&info, &quality, Duration::from_secs(ttl))
                        .await;
                    if let Ok(handle) = &result {
                        if let Ok(serialized) = serde_json::to_string(handle) {
                            let _ = cache
                                .set(&key_for_store, &serialized, Duration::from_secs(ttl))
                                .await;
                        }
                    }
                    result.map_err(AppErrorKey::from)
                }
                .boxed()
                .shared()
            })
            .clone();

        let result = fut.await;
        self.stream_inflight.remove(cache_key);
        result.map_err(AppError::from)
    }

    /// Invalidates a stale stream handle and resolves exactly once more, per
    /// the streaming engine's `StaleStream` recovery contract.
    pub async fn reresolve_stream(
        &self,
        info: &VideoInfo,
        quality: &Quality,
    ) -> Result<StreamHandle, AppError> {
        let cache_key = keys::stream_handle(info.platform, &info.id, &quality.as_label());
        let _ = self.cache.del(&cache_key).await;
        info!(video_id = %info.id, "re-resolving stale stream handle");
        self.resolve_stream_uncached(info, quality, &cache_key).await
    }
}
