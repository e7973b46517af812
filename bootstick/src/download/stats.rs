//! Persisted per-mirror reliability statistics.
//!
//! Statistics are advisory: a missing, unreadable or unwritable stats file
//! never fails a download, it only loses ranking history.

use crate::util;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Success rate at or above which a mirror is considered good.
pub const GOOD_SUCCESS_RATE: f64 = 0.8;

/// Success rate at or above which a mirror is only a warning.
pub const WARNING_SUCCESS_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorHealth {
    Good,
    Warning,
    Poor,
}

impl std::fmt::Display for MirrorHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MirrorHealth::Good => "good",
            MirrorHealth::Warning => "warning",
            MirrorHealth::Poor => "poor",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorRecord {
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    /// Sum of response latencies of successful transfers.
    #[serde(default)]
    pub total_response_ms: u64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl MirrorRecord {
    pub fn attempts(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Fraction of successful attempts; a mirror without history counts as
    /// fully reliable.
    pub fn success_rate(&self) -> f64 {
        match self.attempts() {
            0 => 1.0,
            n => self.success_count as f64 / n as f64,
        }
    }

    pub fn average_response_ms(&self) -> Option<u64> {
        (self.success_count > 0).then(|| self.total_response_ms / self.success_count)
    }

    pub fn health(&self) -> MirrorHealth {
        let rate = self.success_rate();
        if rate >= GOOD_SUCCESS_RATE {
            MirrorHealth::Good
        } else if rate >= WARNING_SUCCESS_RATE {
            MirrorHealth::Warning
        } else {
            MirrorHealth::Poor
        }
    }
}

pub struct MirrorStatsStore {
    path: Option<PathBuf>,
    records: Mutex<BTreeMap<String, MirrorRecord>>,
}

impl MirrorStatsStore {
    /// Load statistics from `path`. A missing or corrupt file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt mirror statistics");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read mirror statistics");
                BTreeMap::new()
            }
        };
        tracing::debug!(path = %path.display(), mirrors = records.len(), "Loaded mirror statistics");
        Self {
            path: Some(path),
            records: Mutex::new(records),
        }
    }

    /// Statistics kept only for the lifetime of the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record_success(&self, mirror: &str, latency: Duration) {
        let now = Utc::now();
        let mut records = self.records.lock();
        let record = records.entry(mirror.to_string()).or_default();
        record.success_count += 1;
        record.total_response_ms += latency.as_millis() as u64;
        record.last_used = Some(now);
        record.last_updated = Some(now);
        tracing::debug!(mirror, latency_ms = latency.as_millis() as u64, "Recorded mirror success");
        self.persist(&records);
    }

    pub fn record_failure(&self, mirror: &str) {
        let mut records = self.records.lock();
        let record = records.entry(mirror.to_string()).or_default();
        record.failure_count += 1;
        record.last_updated = Some(Utc::now());
        tracing::debug!(mirror, failures = record.failure_count, "Recorded mirror failure");
        self.persist(&records);
    }

    pub fn get(&self, mirror: &str) -> Option<MirrorRecord> {
        self.records.lock().get(mirror).cloned()
    }

    /// Success rate of `mirror`, `1.0` without history.
    pub fn success_rate(&self, mirror: &str) -> f64 {
        self.get(mirror).map(|r| r.success_rate()).unwrap_or(1.0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, MirrorRecord> {
        self.records.lock().clone()
    }

    /// Drop records not updated within `max_age`. Returns how many were
    /// removed.
    pub fn prune(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| r.last_updated.is_none_or(|t| t >= cutoff));
        let removed = before - records.len();
        if removed > 0 {
            tracing::info!(removed, "Pruned stale mirror statistics");
            self.persist(&records);
        }
        removed
    }

    fn persist(&self, records: &BTreeMap<String, MirrorRecord>) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_vec_pretty(records)
            .map_err(std::io::Error::other)
            .and_then(|data| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                util::atomic_write(path, &data)
            });
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to save mirror statistics");
        }
    }
}
