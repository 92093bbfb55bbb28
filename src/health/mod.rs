//! Aggregates dependency health into a single status for the health
//! endpoint: the cache store's `ping`, plus a lightweight probe that the
//! extractor binary is present and executable.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::process::Command;

use crate::cache::CacheStore;
use crate::config::ExtractorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub cache_ok: bool,
    pub extractor_ok: bool,
    pub uptime_secs: u64,
    pub version: &'static str,
}

pub struct SystemProbe {
    cache: Arc<dyn CacheStore>,
    extractor_binary: std::path::PathBuf,
    started_at: Instant,
}

impl SystemProbe {
    pub fn new(cache: Arc<dyn CacheStore>, extractor: &ExtractorConfig) -> Self {
        Self {
            cache,
            extractor_binary: extractor.binary_path.clone(),
            started_at: Instant::now(),
        }
    }

    pub async fn health(&self) -> HealthReport {
        let cache_ok = self.cache.ping().await.is_ok();
        let extractor_ok = self.probe_extractor().await;

        let status = if cache_ok && extractor_ok {
            HealthStatus::Healthy
        } else if extractor_ok {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport {
            status,
            cache_ok,
            extractor_ok,
            uptime_secs: self.started_at.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    async fn probe_extractor(&self) -> bool {
        tokio::time::timeout(
            std::time::Duration::from_secs(3),
            Command::new(&self.extractor_binary).arg("--version").output(),
        )
        .await
        .map(|res| res.map(|o| o.status.success()).unwrap_or(false))
        .unwrap_or(false)
    }
}
