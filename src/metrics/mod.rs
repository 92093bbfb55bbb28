//! Streaming metrics accounting.
//!
//! `StreamingMetricsAggregator` tracks transfer counters with atomics rather
//! than a lock, so a busy proxy never blocks a transfer loop on a metrics
//! update. `snapshot()` is a point-in-time read of each counter, not a
//! globally consistent one — two counters read a moment apart can disagree
//! slightly under load, which is acceptable for an operational dashboard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::models::{Platform, TransferOutcome};

#[derive(Default)]
struct PlatformCounters {
    transfers: AtomicU64,
    bytes: AtomicU64,
    failures: AtomicU64,
}

pub struct StreamingMetricsAggregator {
    active_transfers: AtomicI64,
    total_transfers: AtomicU64,
    total_bytes: AtomicU64,
    failed_transfers: AtomicU64,
    /// Running average throughput, updated with a simple exponential blend
    /// on each completed transfer rather than recomputed from history.
    average_throughput_bps: Mutex<f64>,
    per_platform: [PlatformCounters; 5],
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamingMetricsSnapshot {
    pub active_transfers: i64,
    pub total_transfers: u64,
    pub total_bytes: u64,
    pub failed_transfers: u64,
    pub average_throughput_bps: f64,
    pub per_platform: HashMap<String, PlatformSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformSnapshot {
    pub transfers: u64,
    pub bytes: u64,
    pub failures: u64,
}

impl Default for StreamingMetricsAggregator {
    fn default() -> Self {
        Self {
            active_transfers: AtomicI64::new(0),
            total_transfers: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            failed_transfers: AtomicU64::new(0),
            average_throughput_bps: Mutex::new(0.0),
            per_platform: Default::default(),
        }
    }
}

impl StreamingMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn platform_index(platform: Platform) -> usize {
        Platform::ALL.iter().position(|p| *p == platform).unwrap_or(0)
    }

    /// Call when a transfer begins, before the first upstream byte.
    pub fn transfer_started(&self, request_id: Uuid, platform: Platform, video_id: &str) {
        self.active_transfers.fetch_add(1, Ordering::Relaxed);
        info!(%request_id, %platform, video_id, "transfer started");
    }

    /// Call as bytes are relayed to the client, may be called many times
    /// per transfer.
    pub fn transfer_bytes(&self, platform: Platform, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.per_platform[Self::platform_index(platform)]
            .bytes
            .fetch_add(bytes, Ordering::Relaxed);
    }

    /// Call exactly once when a transfer ends, successfully or not.
    pub fn transfer_ended(
        &self,
        request_id: Uuid,
        platform: Platform,
        outcome: TransferOutcome,
        bytes_served: u64,
        duration_secs: f64,
    ) {
        self.active_transfers.fetch_sub(1, Ordering::Relaxed);
        self.total_transfers.fetch_add(1, Ordering::Relaxed);

        let idx = Self::platform_index(platform);
        self.per_platform[idx].transfers.fetch_add(1, Ordering::Relaxed);

        if outcome == TransferOutcome::UpstreamError || outcome == TransferOutcome::Timeout {
            self.failed_transfers.fetch_add(1, Ordering::Relaxed);
            self.per_platform[idx].failures.fetch_add(1, Ordering::Relaxed);
        }

        if duration_secs > 0.0 && bytes_served > 0 {
            let instantaneous = bytes_served as f64 / duration_secs;
            let mut avg = self.average_throughput_bps.lock().unwrap();
            *avg = if *avg == 0.0 {
                instantaneous
            } else {
                *avg * 0.8 + instantaneous * 0.2
            };
        }

        info!(
            %request_id,
            %platform,
            outcome = %outcome,
            bytes_served,
            duration_secs,
            "transfer ended"
        );
    }

    pub fn snapshot(&self) -> StreamingMetricsSnapshot {
        let mut per_platform = HashMap::new();
        for (platform, counters) in Platform::ALL.iter().zip(self.per_platform.iter()) {
            per_platform.insert(
                platform.as_str().to_string(),
                PlatformSnapshot {
                    transfers: counters.transfers.load(Ordering::Relaxed),
                    bytes: counters.bytes.load(Ordering::Relaxed),
                    failures: counters.failures.load(Ordering::Relaxed),
                },
            );
        }

        StreamingMetricsSnapshot {
            active_transfers: self.active_transfers.load(Ordering::Relaxed),
            total_transfers: self.total_transfers.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            failed_transfers: self.failed_transfers.load(Ordering::Relaxed),
            average_throughput_bps: *self.average_throughput_bps.lock().unwrap(),
            per_platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_active_and_total_transfers() {
        let m = StreamingMetricsAggregator::new();
        let id = Uuid::nil();
        m.transfer_started(id, Platform::Youtube, "abc");
        assert_eq!(m.snapshot().active_transfers, 1);

        m.transfer_bytes(Platform::Youtube, 1024);
        m.transfer_ended(id, Platform::Youtube, TransferOutcome::Ok, 1024, 1.0);

        let snap = m.snapshot();
        assert_eq!(snap.active_transfers, 0);
        assert_eq!(snap.total_transfers, 1);
        assert_eq!(snap.total_bytes, 1024);
        assert_eq!(snap.failed_transfers, 0);
        assert_eq!(snap.per_platform["youtube"].transfers, 1);
    }

    #[test]
    fn counts_failures_separately() {
        let m = StreamingMetricsAggregator::new();
        let id = Uuid::nil();
        m.transfer_started(id, Platform::Twitch, "abc");
        m.transfer_ended(id, Platform::Twitch, TransferOutcome::UpstreamError, 0, 0.5);
        let snap = m.snapshot();
        assert_eq!(snap.failed_transfers, 1);
        assert_eq!(snap.per_platform["twitch"].failures, 1);
    }
}
