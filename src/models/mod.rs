//! Core data types shared across the resolution-and-streaming pipeline.
//!
//! These are the types named in the data model: `Platform`, `VideoInfo`,
//! `StreamHandle`, `Quality`, plus the small request-scoped wrapper types
//! handlers pass down into the resolver and streaming engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A supported streaming platform.
///
/// Extending the supported set requires only a new variant here plus the
/// quality/URL-template mapping in the extractor adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Bilibili,
    Twitter,
    Instagram,
    Twitch,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Youtube,
        Platform::Bilibili,
        Platform::Twitter,
        Platform::Instagram,
        Platform::Twitch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Bilibili => "bilibili",
            Platform::Twitter => "twitter",
            Platform::Instagram => "instagram",
            Platform::Twitch => "twitch",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a platform string doesn't match the supported set.
#[derive(Debug, Clone)]
pub struct UnsupportedPlatformError(pub String);

impl FromStr for Platform {
    type Err = UnsupportedPlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "youtube" => Ok(Platform::Youtube),
            "bilibili" => Ok(Platform::Bilibili),
            "twitter" => Ok(Platform::Twitter),
            "instagram" => Ok(Platform::Instagram),
            "twitch" => Ok(Platform::Twitch),
            other => Err(UnsupportedPlatformError(other.to_string())),
        }
    }
}

/// A requested stream quality, as accepted on `quality=...` query params.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Quality {
    Best,
    Worst,
    Audio,
    Height(u32),
}

const VALID_HEIGHTS: [u32; 8] = [144, 240, 360, 480, 720, 1080, 1440, 2160];

impl Quality {
    pub fn as_label(&self) -> String {
        match self {
            Quality::Best => "best".to_string(),
            Quality::Worst => "worst".to_string(),
            Quality::Audio => "audio".to_string(),
            Quality::Height(h) => format!("{h}p"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvalidQualityError(pub String);

impl FromStr for Quality {
    type Err = InvalidQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best" => Ok(Quality::Best),
            "worst" => Ok(Quality::Worst),
            "audio" => Ok(Quality::Audio),
            other => {
                if let Some(digits) = other.strip_suffix('p') {
                    let height: u32 = digits
                        .parse()
                        .map_err(|_| InvalidQualityError(other.to_string()))?;
                    if VALID_HEIGHTS.contains(&height) {
                        return Ok(Quality::Height(height));
                    }
                }
                Err(InvalidQualityError(other.to_string()))
            }
        }
    }
}

/// A video format as reported by the extractor, used for quality selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFormat {
    pub format_id: String,
    pub url: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
}

/// Immutable snapshot of a video, produced by the extractor adapter and
/// cached by the resolver.
///
/// Invariant: `id` is the identifier the extractor reported, which is not
/// necessarily the request path parameter (platforms may normalize ids).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: u64,
    pub uploader: String,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub thumbnail_url: Option<String>,
    pub platform: Platform,
    pub formats: Vec<VideoFormat>,
    /// Extra headers the extractor says must accompany requests to the
    /// resolved URLs (e.g. a bilibili `Referer`). Forwarded verbatim by the
    /// streaming engine.
    pub upstream_headers_hint: Vec<(String, String)>,
    /// When the extractor-resolved URLs expire, if it reported one. Clamps
    /// the cached `StreamHandle`'s TTL.
    pub extractor_expiry: Option<DateTime<Utc>>,
}

/// Transient resolution of a playable URL.
///
/// Invariant: `expires_at > resolved_at`; `direct_url` scheme is http(s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHandle {
    pub direct_url: String,
    pub quality_label: String,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    /// Extra headers the extractor says must be sent upstream (e.g. a
    /// bilibili `Referer`). Forwarded verbatim by the streaming engine.
    pub upstream_headers_hint: Vec<(String, String)>,
}

impl StreamHandle {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a completed or aborted transfer, used for metrics accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Ok,
    ClientClosed,
    UpstreamError,
    Timeout,
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferOutcome::Ok => "ok",
            TransferOutcome::ClientClosed => "client_closed",
            TransferOutcome::UpstreamError => "upstream_error",
            TransferOutcome::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_platforms_case_insensitively() {
        assert_eq!("YouTube".parse::<Platform>().unwrap(), Platform::Youtube);
        assert_eq!("twitch".parse::<Platform>().unwrap(), Platform::Twitch);
        assert!("vimeo".parse::<Platform>().is_err());
    }

    #[test]
    fn parses_quality_labels() {
        assert_eq!("best".parse::<Quality>().unwrap(), Quality::Best);
        assert_eq!("audio".parse::<Quality>().unwrap(), Quality::Audio);
        assert_eq!("720p".parse::<Quality>().unwrap(), Quality::Height(720));
        assert!("1337p".parse::<Quality>().is_err());
        assert!("garbage".parse::<Quality>().is_err());
    }

    #[test]
    fn stream_handle_expiry() {
        let now = Utc::now();
        let handle = StreamHandle {
            direct_url: "https://example.com/video.mp4".to_string(),
            quality_label: "best".to_string(),
            expires_at: now + chrono::Duration::seconds(10),
            resolved_at: now,
            upstream_headers_hint: vec![],
        };
        assert!(!handle.is_expired(now));
        assert!(handle.is_expired(now + chrono::Duration::seconds(11)));
    }
}
