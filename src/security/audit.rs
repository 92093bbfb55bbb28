//! Append-only audit log.
//!
//! Writes are non-blocking from the caller's perspective: `record` hands the
//! entry to a bounded channel drained by a background task, so a slow disk
//! never adds latency to a request. If the channel is full or the write
//! target can't be opened, entries fall back to an in-memory ring buffer so
//! audit coverage degrades instead of silently vanishing.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

const RING_BUFFER_CAPACITY: usize = 1024;
const RETENTION_DAYS: i64 = 14;

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    /// Bytes written to the client. Zero for denied or pre-handler-failed
    /// requests, and for JSON responses too small to matter operationally.
    pub bytes_out: u64,
    pub latency_ms: u64,
    /// Short error kind when the request was denied or failed (e.g.
    /// `ip_blocked`, `rate_limited`), matching the redacted response's
    /// `error` field. `None` for successful requests.
    pub redacted_error: Option<String>,
    pub platform: Option<String>,
}

pub struct AuditLog {
    sender: mpsc::Sender<AuditRecord>,
    ring_buffer: std::sync::Arc<Mutex<VecDeque<AuditRecord>>>,
}

impl AuditLog {
    /// Spawns the background writer task and returns a handle. `base_path`
    /// is the log file with no date suffix; the writer appends
    /// `.YYYY-MM-DD` for the current UTC day and rotates at midnight.
    pub fn spawn(base_path: PathBuf) -> Self {
        let (sender, receiver) = mpsc::channel(4096);
        let ring_buffer = std::sync::Arc::new(Mutex::new(VecDeque::with_capacity(
            RING_BUFFER_CAPACITY,
        )));

        tokio::spawn(run_writer(base_path, receiver, ring_buffer.clone()));

        Self { sender, ring_buffer }
    }

    pub fn record(&self, record: AuditRecord) {
        if self.sender.try_send(record.clone()).is_err() {
            warn!("audit channel full, falling back to ring buffer");
            let mut buffer = self.ring_buffer.lock().unwrap();
            if buffer.len() == RING_BUFFER_CAPACITY {
                buffer.pop_front();
            }
            buffer.push_back(record);
        }
    }

    /// Snapshot of whatever is currently held in the in-memory fallback.
    /// Used by the health probe to surface degraded audit coverage.
    pub fn ring_buffer_len(&self) -> usize {
        self.ring_buffer.lock().unwrap().len()
    }
}

async fn run_writer(
    base_path: PathBuf,
    mut receiver: mpsc::Receiver<AuditRecord>,
    ring_buffer: std::sync::Arc<Mutex<VecDeque<AuditRecord>>>,
) {
    let mut current_date = Utc::now().date_naive();
    let mut file = open_for_date(&base_path, current_date).await;
    let mut sweep_interval = tokio::time::interval(std::time::Duration::from_secs(3600));

    loop {
        tokio::select! {
            record = receiver.recv() => {
                let Some(record) = record else { break };
                let today = Utc::now().date_naive();
                if today != current_date {
                    current_date = today;
                    file = open_for_date(&base_path, current_date).await;
                    sweep_retention(&base_path).await;
                }
                write_record(&mut file, &record).await;
            }
            _ = sweep_interval.tick() => {
                sweep_retention(&base_path).await;
                drain_ring_buffer(&mut file, &ring_buffer).await;
            }
        }
    }

    drain_ring_buffer(&mut file, &ring_buffer).await;
}

async fn drain_ring_buffer(
    file: &mut Option<tokio::fs::File>,
    ring_buffer: &Mutex<VecDeque<AuditRecord>>,
) {
    if file.is_none() {
        return;
    }
    let records: Vec<AuditRecord> = ring_buffer.lock().unwrap().drain(..).collect();
    for record in &records {
        write_record(file, record).await;
    }
}

async fn open_for_date(
    base_path: &Path,
    date: NaiveDate,
) -> Option<tokio::fs::File> {
    let path = rotated_path(base_path, date);
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            error!(error = %e, "failed to create audit log directory");
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(&path).await {
        Ok(file) => Some(file),
        Err(e) => {
            error!(error = %e, path = %path.display(), "failed to open audit log file");
            None
        }
    }
}

fn rotated_path(base_path: &Path, date: NaiveDate) -> PathBuf {
    let mut name = base_path.as_os_str().to_os_string();
    name.push(format!(".{}", date.format("%Y-%m-%d")));
    PathBuf::from(name)
}

async fn write_record(file: &mut Option<tokio::fs::File>, record: &AuditRecord) {
    let Some(file) = file.as_mut() else { return };
    match serde_json::to_string(record) {
        Ok(line) => {
            if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                error!(error = %e, "failed to write audit record");
            }
        }
        Err(e) => error!(error = %e, "failed to serialize audit record"),
    }
}

async fn sweep_retention(base_path: &Path) {
    let Some(dir) = base_path.parent() else { return };
    let Some(stem) = base_path.file_name().and_then(|s| s.to_str()) else { return };
    let cutoff = Utc::now().date_naive() - chrono::Duration::days(RETENTION_DAYS);

    let Ok(mut entries) = tokio::fs::read_dir(dir).await else { return };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(suffix) = name.strip_prefix(stem).and_then(|s| s.strip_prefix('.')) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(suffix, "%Y-%m-%d") else {
            continue;
        };
        if date < cutoff {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!(error = %e, file = name, "failed to remove expired audit log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotated_path_appends_date_suffix() {
        let base = PathBuf::from("/var/log/audit.log");
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(
            rotated_path(&base, date),
            PathBuf::from("/var/log/audit.log.2026-08-01")
        );
    }

    #[tokio::test]
    async fn ring_buffer_accepts_overflow_records() {
        let log = AuditLog::spawn(PathBuf::from("/nonexistent/path/that/cannot/be/created/audit.log"));
        // The writer task will fail to open the file; records still queue
        // through the channel without panicking.
        log.record(AuditRecord {
            request_id: Uuid::nil(),
            timestamp: Utc::now(),
            client_ip: "203.0.113.1".to_string(),
            method: "GET".to_string(),
            path: "/api/v2/videos/youtube/abc".to_string(),
            status_code: 200,
            bytes_out: 0,
            latency_ms: 5,
            redacted_error: None,
            platform: Some("youtube".to_string()),
        });
    }
}
