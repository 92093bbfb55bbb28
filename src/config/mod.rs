use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub extractor: ExtractorConfig,
    pub security: SecurityConfig,
    pub ttl: TtlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Include `AppError` detail strings in error responses. Off by default;
    /// local/dev deployments turn it on.
    pub detailed_errors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub redis_url: String,
    /// Timeout applied to every cache round-trip; a cache that can't answer
    /// this fast is treated as unavailable, not slow.
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub binary_path: PathBuf,
    pub max_concurrent: usize,
    pub timeout_secs: u64,
    /// Cap on captured stdout, to bound memory when the extractor misbehaves.
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// CIDR blocks allowed to reach the proxy. Empty means "allow all"
    /// except anything in `blocklist`.
    pub allowlist: Vec<String>,
    /// CIDR blocks denied regardless of `allowlist`.
    pub blocklist: Vec<String>,
    /// Reverse proxies whose `X-Forwarded-For` header is trusted.
    pub trusted_proxies: Vec<IpAddr>,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: u64,
    pub audit_log_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlatformTtl {
    pub video_info_secs: u64,
    pub stream_handle_secs: u64,
}

/// Per-platform cache lifetimes. Keyed by `Platform::as_str()` so the TOML
/// file reads as a plain table (`[ttl.youtube]`) instead of an array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    #[serde(flatten)]
    entries: HashMap<String, PlatformTtl>,
}

impl TtlConfig {
    pub fn get(&self, platform: Platform) -> PlatformTtl {
        self.entries
            .get(platform.as_str())
            .copied()
            .unwrap_or(PlatformTtl {
                video_info_secs: 900,
                stream_handle_secs: 300,
            })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                detailed_errors: false,
            },
            cache: CacheConfig {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                operation_timeout_ms: 250,
            },
            extractor: ExtractorConfig {
                binary_path: PathBuf::from("yt-dlp"),
                max_concurrent: 16,
                timeout_secs: 30,
                max_output_bytes: 8 * 1024 * 1024,
            },
            security: SecurityConfig {
                allowlist: Vec::new(),
                blocklist: Vec::new(),
                trusted_proxies: Vec::new(),
                rate_limit_window_secs: 60,
                rate_limit_max_requests: 120,
                audit_log_path: PathBuf::from("./data/audit.log"),
            },
            ttl: TtlConfig {
                entries: HashMap::from([
                    (
                        "youtube".to_string(),
                        PlatformTtl {
                            video_info_secs: 1800,
                            stream_handle_secs: 600,
                        },
                    ),
                    (
                        "bilibili".to_string(),
                        PlatformTtl {
                            video_info_secs: 3600,
                            stream_handle_secs: 900,
                        },
                    ),
                    (
                        "twitch".to_string(),
                        PlatformTtl {
                            video_info_secs: 1800,
                            stream_handle_secs: 600,
                        },
                    ),
                    (
                        "twitter".to_string(),
                        PlatformTtl {
                            video_info_secs: 900,
                            stream_handle_secs: 300,
                        },
                    ),
                    (
                        "instagram".to_string(),
                        PlatformTtl {
                            video_info_secs: 900,
                            stream_handle_secs: 300,
                        },
                    ),
                ]),
            },
        }
    }
}

impl Config {
    /// Loads from `CONFIG_FILE` (default `config.toml`), writing out the
    /// defaults on first run if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)
                .with_context(|| format!("reading config file {config_file}"))?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            if let Some(parent) = default_config.security.audit_log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_table_matches_policy() {
        let cfg = Config::default();
        let yt = cfg.ttl.get(Platform::Youtube);
        assert_eq!(yt.video_info_secs, 1800);
        assert_eq!(yt.stream_handle_secs, 600);

        let ig = cfg.ttl.get(Platform::Instagram);
        assert_eq!(ig.video_info_secs, 900);
        assert_eq!(ig.stream_handle_secs, 300);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, cfg.server.port);
        assert_eq!(parsed.ttl.get(Platform::Twitch).video_info_secs, 1800);
    }
}
