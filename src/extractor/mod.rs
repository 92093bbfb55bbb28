//! Subprocess adapter over an external metadata extractor (yt-dlp or a
//! compatible binary), the boundary between this service and the platforms
//! it resolves videos from.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::config::ExtractorConfig;
use crate::errors::AppError;
use crate::models::{Platform, Quality, StreamHandle, VideoFormat, VideoInfo};

pub struct ExtractorAdapter {
    config: ExtractorConfig,
    concurrency: Arc<Semaphore>,
}

/// Raw shape of a single-video `yt-dlp --dump-json` report. Field names
/// follow yt-dlp's own JSON output, not ours.
#[derive(Debug, Deserialize)]
struct RawVideoInfo {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    uploader: String,
    #[serde(default)]
    upload_date: Option<String>,
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
    #[serde(default)]
    http_headers: std::collections::HashMap<String, String>,
    /// Unix timestamp the extractor says the resolved URLs expire at. Absent
    /// for most platforms; when present it clamps the cache TTL.
    #[serde(default)]
    expires_at: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: String,
    url: String,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    tbr: Option<f64>,
    #[serde(default)]
    filesize: Option<u64>,
}

impl ExtractorAdapter {
    pub fn new(config: ExtractorConfig) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent));
        Self { config, concurrency }
    }

    fn source_url(platform: Platform, video_id: &str) -> String {
        match platform {
            Platform::Youtube => format!("https://www.youtube.com/watch?v={video_id}"),
            Platform::Bilibili => format!("https://www.bilibili.com/video/{video_id}"),
            Platform::Twitter => format!("https://twitter.com/i/status/{video_id}"),
            Platform::Instagram => format!("https://www.instagram.com/p/{video_id}/"),
            Platform::Twitch => format!("https://www.twitch.tv/videos/{video_id}"),
        }
    }

    /// Runs the extractor and parses a full `VideoInfo`. Bounded by the
    /// semaphore (overall concurrency cap), a hard timeout, and a captured
    /// stdout size ceiling.
    pub async fn fetch_video_info(
        &self,
        platform: Platform,
        video_id: &str,
    ) -> Result<VideoInfo, AppError> {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| AppError::internal("extractor semaphore closed"))?;

        let url = Self::source_url(platform, video_id);
        let output = self
            .run(&["--dump-json", "--no-warnings", "--no-playlist", &url])
            .await?;

        let raw: RawVideoInfo = serde_json::from_slice(&output).map_err(|e| {
            AppError::ExtractorProtocolError(format!("unparseable extractor output: {e}"))
        })?;

        let extractor_expiry = raw
            .expires_at
            .and_then(|ts| chrono::DateTime::from_timestamp(ts as i64, 0));

        Ok(VideoInfo {
            id: raw.id,
            title: raw.title,
            description: raw.description,
            duration: raw.duration.max(0.0) as u64,
            uploader: raw.uploader,
            upload_date: raw.upload_date,
            view_count: raw.view_count,
            thumbnail_url: raw.thumbnail,
            platform,
            formats: raw
                .formats
                .into_iter()
                .map(|f| VideoFormat {
                    format_id: f.format_id,
                    url: f.url,
                    height: f.height,
                    ext: f.ext,
                    vcodec: f.vcodec,
                    acodec: f.acodec,
                    tbr: f.tbr,
                    filesize: f.filesize,
                })
                .collect(),
            upstream_headers_hint: raw.http_headers.into_iter().collect(),
            extractor_expiry,
        })
    }

    /// Resolves a direct, time-limited playable URL for the requested
    /// quality. `ttl` comes from the caller's TTL policy, not the extractor.
    pub async fn resolve_stream(
        &self,
        info: &VideoInfo,
        quality: &Quality,
        ttl: Duration,
    ) -> Result<StreamHandle, AppError> {
        let format = select_format(&info.formats, quality)
            .ok_or_else(|| AppError::BadRequest(format!("no format for quality {quality:?}")))?;

        let parsed = url::Url::parse(&format.url).map_err(|e| {
            AppError::ExtractorProtocolError(format!("unparseable format url: {e}"))
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(AppError::ExtractorProtocolError(format!(
                "unsupported format url scheme: {}",
                parsed.scheme()
            )));
        }

        let now = Utc::now();
        let policy_expiry = now + chrono::Duration::from_std(ttl).unwrap_or_default();
        let expires_at = match info.extractor_expiry {
            Some(extractor_expiry) => policy_expiry.min(extractor_expiry),
            None => policy_expiry,
        };

        Ok(StreamHandle {
            direct_url: format.url.clone(),
            quality_label: quality.as_label(),
            expires_at,
            resolved_at: now,
            upstream_headers_hint: info.upstream_headers_hint.clone(),
        })
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, AppError> {
        let mut command = Command::new(&self.config.binary_path);
        command
            .args(args)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            command.output(),
        )
        .await
        .map_err(|_| AppError::Timeout)?
        .map_err(|e| AppError::ExtractorInternalError(format!("failed to spawn extractor: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(map_extractor_failure(&stderr));
        }

        if output.stdout.len() > self.config.max_output_bytes {
            warn!(
                bytes = output.stdout.len(),
                "extractor output exceeded cap, truncating"
            );
            return Err(AppError::ExtractorProtocolError(
                "extractor output too large".to_string(),
            ));
        }

        debug!(bytes = output.stdout.len(), "extractor invocation succeeded");
        Ok(output.stdout)
    }
}

/// Maps extractor stderr text to the error taxonomy. yt-dlp has no
/// structured exit codes, so this is substring matching against its known
/// error message shapes. Raw stderr is logged for operators but never
/// carried into the returned `AppError` — it can contain upstream URLs or
/// other detail that must not reach a client response.
fn map_extractor_failure(stderr: &str) -> AppError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("video unavailable")
        || lower.contains("this video is private")
        || lower.contains("404")
    {
        AppError::NotFound
    } else if lower.contains("sign in to confirm")
        || lower.contains("age-restricted")
        || lower.contains("403")
    {
        AppError::Forbidden("upstream denied access".to_string())
    } else if lower.contains("unable to download webpage")
        || lower.contains("network")
        || lower.contains("timed out")
    {
        AppError::UpstreamUnavailable
    } else {
        error!(stderr = %stderr.chars().take(2000).collect::<String>(), "unrecognized extractor failure");
        AppError::ExtractorInternalError("extractor exited with an unrecognized error".to_string())
    }
}

/// Picks the format matching a requested quality, per spec §4.2's selection
/// rules: exact height match preferred, else nearest-below, else best
/// available; `audio` prefers a format with no video codec.
/// Ranks two formats of otherwise-equal standing: `Greater` means `a` wins.
/// Higher bitrate first, then smaller file size, then lexicographically
/// earlier format id.
fn tie_break(a: &VideoFormat, b: &VideoFormat) -> std::cmp::Ordering {
    a.tbr
        .unwrap_or(0.0)
        .partial_cmp(&b.tbr.unwrap_or(0.0))
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| {
            b.filesize
                .unwrap_or(u64::MAX)
                .cmp(&a.filesize.unwrap_or(u64::MAX))
        })
        .then_with(|| b.format_id.cmp(&a.format_id))
}

fn is_mp4_h264(f: &VideoFormat) -> bool {
    f.ext.as_deref() == Some("mp4")
        && f.vcodec
            .as_deref()
            .is_some_and(|v| v.starts_with("avc1") || v.starts_with("h264"))
}

/// Tie-break for `{N}p` height-bucket selection: mp4/h264 formats win over
/// everything else at the matched height before falling back to the
/// bitrate/filesize/format-id ordering.
fn height_tie_break(a: &VideoFormat, b: &VideoFormat) -> std::cmp::Ordering {
    is_mp4_h264(a)
        .cmp(&is_mp4_h264(b))
        .then_with(|| tie_break(a, b))
}

fn select_format<'a>(formats: &'a [VideoFormat], quality: &Quality) -> Option<&'a VideoFormat> {
    if formats.is_empty() {
        return None;
    }
    match quality {
        Quality::Best => formats.iter().max_by(|a, b| {
            a.height
                .unwrap_or(0)
                .cmp(&b.height.unwrap_or(0))
                .then_with(|| tie_break(a, b))
        }),
        Quality::Worst => formats.iter().min_by(|a, b| {
            a.height
                .unwrap_or(u32::MAX)
                .cmp(&b.height.unwrap_or(u32::MAX))
                .then_with(|| tie_break(b, a))
        }),
        Quality::Audio => formats
            .iter()
            .filter(|f| f.vcodec.as_deref() == Some("none") || f.vcodec.is_none())
            .max_by(|a, b| tie_break(a, b))
            .or_else(|| formats.iter().min_by_key(|f| f.height.unwrap_or(u32::MAX))),
        Quality::Height(target) => formats
            .iter()
            .filter(|f| f.height.map(|h| h <= *target).unwrap_or(false))
            .max_by(|a, b| {
                a.height
                    .unwrap_or(0)
                    .cmp(&b.height.unwrap_or(0))
                    .then_with(|| height_tie_break(a, b))
            })
            .or_else(|| formats.iter().min_by_key(|f| f.height.unwrap_or(u32::MAX))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fmt(height: u32, tbr: f64) -> VideoFormat {
        VideoFormat {
            format_id: format!("f{height}"),
            url: format!("https://example.com/{height}.mp4"),
            height: Some(height),
            ext: Some("mp4".to_string()),
            vcodec: Some("avc1".to_string()),
            acodec: Some("mp4a".to_string()),
            tbr: Some(tbr),
            filesize: None,
        }
    }

    #[test]
    fn selects_exact_or_nearest_below_height() {
        let formats = vec![fmt(360, 500.0), fmt(720, 1500.0), fmt(1080, 3000.0)];
        assert_eq!(
            select_format(&formats, &Quality::Height(720)).unwrap().format_id,
            "f720"
        );
        assert_eq!(
            select_format(&formats, &Quality::Height(1000)).unwrap().format_id,
            "f720"
        );
    }

    #[test]
    fn height_selection_prefers_mp4_h264_over_higher_bitrate_rival_at_same_height() {
        let mp4_h264 = fmt(720, 1500.0);
        let webm_vp9 = VideoFormat {
            format_id: "f720webm".to_string(),
            url: "https://example.com/720.webm".to_string(),
            height: Some(720),
            ext: Some("webm".to_string()),
            vcodec: Some("vp9".to_string()),
            acodec: Some("opus".to_string()),
            tbr: Some(2500.0),
            filesize: None,
        };
        let formats = vec![webm_vp9, mp4_h264];
        assert_eq!(
            select_format(&formats, &Quality::Height(720)).unwrap().format_id,
            "f720"
        );
    }

    #[test]
    fn best_picks_highest_height() {
        let formats = vec![fmt(360, 500.0), fmt(1080, 3000.0)];
        assert_eq!(select_format(&formats, &Quality::Best).unwrap().format_id, "f1080");
    }

    #[rstest]
    #[case(144, "f144")]
    #[case(480, "f360")]
    #[case(2160, "f1080")]
    fn nearest_below_height_resolves_for_various_targets(
        #[case] target: u32,
        #[case] expected: &str,
    ) {
        let formats = vec![fmt(144, 100.0), fmt(360, 500.0), fmt(1080, 3000.0)];
        assert_eq!(
            select_format(&formats, &Quality::Height(target)).unwrap().format_id,
            expected
        );
    }

    #[test]
    fn unrecognized_failure_never_carries_raw_stderr() {
        let err = map_extractor_failure("ERROR: some obscure internal traceback with /secret/path");
        match err {
            AppError::ExtractorInternalError(msg) => assert!(!msg.contains("/secret/path")),
            other => panic!("expected ExtractorInternalError, got {other:?}"),
        }
    }

    #[test]
    fn maps_known_stderr_substrings() {
        assert!(matches!(
            map_extractor_failure("ERROR: Video unavailable"),
            AppError::NotFound
        ));
        assert!(matches!(
            map_extractor_failure("ERROR: Sign in to confirm your age"),
            AppError::Forbidden(_)
        ));
        assert!(matches!(
            map_extractor_failure("ERROR: Unable to download webpage: timed out"),
            AppError::UpstreamUnavailable
        ));
    }
}
