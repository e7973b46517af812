//! Resumable, checksum-verified downloads with mirror failover.
//!
//! ```text
//! fetch ─► destination already valid? ─► AlreadyPresent
//!   │
//!   ├─► rank candidates (concurrent HEAD probes + recorded success rate)
//!   │
//!   └─► for each candidate, up to attempts_per_mirror times:
//!         resume point from <dest>.part + <dest>.resume
//!         ranged GET, chunk loop (pause/cancel between chunks,
//!         periodic checkpoint, running sha256)
//!         verify digest ─► rename .part to destination
//! ```
//!
//! Only network failures move on to the next candidate. A checksum mismatch
//! removes every artifact of the transfer and stops. Invalid resume state is
//! discarded and retried from zero once.

mod control;
mod mirror;
mod progress;
mod resume;
mod stats;

pub use control::TransferControl;
pub use mirror::{ProbeResult, probe_all, rank};
pub use progress::DownloadProgress;
pub use resume::{ResumeSidecar, TransferPaths};
pub use stats::{MirrorHealth, MirrorRecord, MirrorStatsStore};

use crate::options::{DownloadOptions, MirrorOptions};
use bootstick_shared::errors::{BootstickError, BootstickResult, DownloadError};
use chrono::Utc;
use progress::ProgressTracker;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufWriter};

const WRITE_BUFFER: usize = 256 * 1024;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Progress callback invoked from the transfer loop.
pub type ProgressFn<'a> = &'a (dyn Fn(&DownloadProgress) + Send + Sync);

/// One artifact to fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Primary source. Also the identity recorded in resume state.
    pub url: String,
    /// Alternative sources serving the same bytes.
    pub mirrors: Vec<String>,
    pub destination: PathBuf,
    /// Expected SHA-256, hex encoded.
    pub sha256: String,
}

impl FetchRequest {
    /// Primary source followed by mirrors, duplicates removed.
    pub fn candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.mirrors.len() + 1);
        for url in std::iter::once(&self.url).chain(&self.mirrors) {
            if !out.contains(url) {
                out.push(url.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { bytes: u64, source: String },
    /// The destination already held the expected bytes.
    AlreadyPresent { bytes: u64 },
}

impl FetchOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            FetchOutcome::Downloaded { bytes, .. } | FetchOutcome::AlreadyPresent { bytes } => *bytes,
        }
    }
}

pub struct MirroredDownloader {
    client: reqwest::Client,
    options: DownloadOptions,
    mirrors: MirrorOptions,
    stats: Arc<MirrorStatsStore>,
    control: TransferControl,
}

impl MirroredDownloader {
    pub fn new(
        options: DownloadOptions,
        mirrors: MirrorOptions,
        stats: Arc<MirrorStatsStore>,
        control: TransferControl,
    ) -> BootstickResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout())
            .user_agent(concat!("bootstick/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BootstickError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            options,
            mirrors,
            stats,
            control,
        })
    }

    pub fn control(&self) -> &TransferControl {
        &self.control
    }

    pub fn stats(&self) -> &MirrorStatsStore {
        &self.stats
    }

    /// Fetch `request.destination`, resuming any compatible partial transfer.
    pub async fn fetch(&self, request: &FetchRequest, on_progress: ProgressFn<'_>) -> Result<FetchOutcome, DownloadError> {
        let expected = request.sha256.trim().to_ascii_lowercase();
        let paths = TransferPaths::for_destination(&request.destination);

        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("creating destination directory", parent, e))?;
        }

        if let Some(bytes) = self.existing_destination(&paths, &expected).await? {
            return Ok(FetchOutcome::AlreadyPresent { bytes });
        }

        let candidates = self.ranked_candidates(request).await;
        let attempts = self.options.attempts_per_mirror.max(1);
        let mut fresh_retry_used = false;
        let mut last_error: Option<DownloadError> = None;

        for source in &candidates {
            let mut attempt = 0;
            while attempt < attempts {
                attempt += 1;
                if self.control.is_cancelled() {
                    return Err(self.cancelled(&paths));
                }

                let started = Instant::now();
                match self.transfer(request, source, &paths, &expected, on_progress).await {
                    Ok(bytes) => {
                        self.stats.record_success(source, started.elapsed());
                        tracing::info!(
                            destination = %request.destination.display(),
                            source = %source,
                            bytes,
                            "Download verified"
                        );
                        return Ok(FetchOutcome::Downloaded {
                            bytes,
                            source: source.clone(),
                        });
                    }
                    Err(DownloadError::ResumeStateInvalid(reason)) if !fresh_retry_used => {
                        tracing::warn!(source = %source, reason = %reason, "Resume state rejected, restarting from zero");
                        fresh_retry_used = true;
                        paths
                            .discard()
                            .map_err(|e| io_error("discarding partial download", &paths.partial, e))?;
                        attempt -= 1;
                    }
                    Err(DownloadError::Cancelled) => return Err(self.cancelled(&paths)),
                    Err(e) if e.is_failover() => {
                        self.stats.record_failure(source);
                        tracing::warn!(source = %source, attempt, error = %e, "Transfer failed");
                        last_error = Some(e);
                        if attempt < attempts && !self.backoff().await {
                            return Err(self.cancelled(&paths));
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Err(DownloadError::MirrorsExhausted {
            attempted: candidates.len(),
            last: last_error.map(|e| e.to_string()).unwrap_or_else(|| "no sources".to_string()),
        })
    }

    /// Explicitly give up on `destination`: remove its partial file and
    /// resume sidecar.
    pub fn abandon(&self, destination: &Path) -> Result<(), DownloadError> {
        let paths = TransferPaths::for_destination(destination);
        paths
            .discard()
            .map_err(|e| io_error("abandoning partial download", &paths.partial, e))?;
        tracing::info!(destination = %destination.display(), "Abandoned partial download");
        Ok(())
    }

    async fn existing_destination(&self, paths: &TransferPaths, expected: &str) -> Result<Option<u64>, DownloadError> {
        if !paths.destination.exists() {
            return Ok(None);
        }
        let (hasher, bytes) = resume::hash_file(&paths.destination)
            .await
            .map_err(|e| io_error("hashing existing destination", &paths.destination, e))?;
        if hex::encode(hasher.finalize()) == expected {
            tracing::info!(destination = %paths.destination.display(), "Destination already verified, skipping download");
            return Ok(Some(bytes));
        }
        tracing::info!(destination = %paths.destination.display(), "Replacing destination with stale content");
        tokio::fs::remove_file(&paths.destination)
            .await
            .map_err(|e| io_error("removing stale destination", &paths.destination, e))?;
        Ok(None)
    }

    async fn ranked_candidates(&self, request: &FetchRequest) -> Vec<String> {
        let candidates = request.candidates();
        if !self.mirrors.enabled || candidates.len() < 2 {
            return candidates;
        }
        let probes = mirror::probe_all(&self.client, &candidates, self.mirrors.probe_timeout()).await;
        let ranked = mirror::rank(&probes, &self.stats, self.mirrors.min_success_rate);
        tracing::debug!(order = ?ranked, "Ranked download sources");
        ranked
    }

    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(RETRY_DELAY) => true,
            _ = self.control.cancelled() => false,
        }
    }

    fn cancelled(&self, paths: &TransferPaths) -> DownloadError {
        if self.options.discard_partial_on_cancel {
            if let Err(e) = paths.discard() {
                tracing::warn!(path = %paths.partial.display(), error = %e, "Failed to discard partial after cancel");
            }
        } else if paths.partial.exists() {
            tracing::info!(path = %paths.partial.display(), "Cancelled, partial download kept for resume");
        }
        DownloadError::Cancelled
    }

    /// One transfer attempt from `source`. Returns the verified byte count.
    async fn transfer(
        &self,
        request: &FetchRequest,
        source: &str,
        paths: &TransferPaths,
        expected: &str,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, DownloadError> {
        let resume_from = paths
            .resume_point(&request.url)
            .map_err(|e| io_error("inspecting resume state", &paths.partial, e))?;

        let (mut hasher, mut offset) = match &resume_from {
            Some(sidecar) => {
                let (hasher, len) = resume::hash_file(&paths.partial)
                    .await
                    .map_err(|e| io_error("re-reading partial download", &paths.partial, e))?;
                if len != sidecar.bytes_written {
                    return Err(DownloadError::ResumeStateInvalid(format!(
                        "partial holds {} bytes, checkpoint says {}",
                        len, sidecar.bytes_written
                    )));
                }
                tracing::info!(source = %source, offset = len, "Resuming download");
                (hasher, len)
            }
            None => (Sha256::new(), 0),
        };

        let mut builder = self.client.get(source);
        if offset > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", offset));
        }
        let mut response = tokio::select! {
            sent = tokio::time::timeout(self.options.stall_timeout(), builder.send()) => match sent {
                Ok(sent) => sent.map_err(|e| DownloadError::network(source, e.to_string()))?,
                Err(_) => {
                    return Err(DownloadError::network(
                        source,
                        format!("no response headers within {:?}", self.options.stall_timeout()),
                    ));
                }
            },
            _ = self.control.cancelled() => return Err(DownloadError::Cancelled),
        };

        let status = response.status();
        let total = match status {
            StatusCode::PARTIAL_CONTENT if offset > 0 => {
                let header = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                let (start, total) = parse_content_range(header).ok_or_else(|| {
                    DownloadError::ResumeStateInvalid(format!("unusable Content-Range {:?}", header))
                })?;
                if start != offset {
                    return Err(DownloadError::ResumeStateInvalid(format!(
                        "server resumed at {} instead of {}",
                        start, offset
                    )));
                }
                if let (Some(recorded), Some(total)) = (resume_from.as_ref().and_then(|s| s.total_size), total)
                    && recorded != total
                {
                    return Err(DownloadError::ResumeStateInvalid(format!(
                        "artifact size changed from {} to {}",
                        recorded, total
                    )));
                }
                total
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                return Err(DownloadError::ResumeStateInvalid(format!(
                    "server rejected range starting at {}",
                    offset
                )));
            }
            s if s.is_success() => {
                if offset > 0 {
                    tracing::info!(source = %source, "Server ignored range request, restarting from zero");
                    hasher = Sha256::new();
                    offset = 0;
                }
                response.content_length()
            }
            s => return Err(DownloadError::network(source, format!("HTTP {}", s))),
        };

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(offset > 0)
            .truncate(offset == 0)
            .open(&paths.partial)
            .await
            .map_err(|e| io_error("opening partial download", &paths.partial, e))?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);

        let mut checkpoint = Checkpoint {
            paths,
            sidecar: ResumeSidecar {
                source_url: request.url.clone(),
                mirror_url: source.to_string(),
                destination: request.destination.clone(),
                total_size: total,
                bytes_written: offset,
                updated_at: Utc::now(),
            },
        };
        checkpoint.save(&mut writer, offset).await?;

        let mut tracker = ProgressTracker::new(source, offset, self.options.progress_interval());
        let mut written = offset;
        let mut since_checkpoint = 0u64;

        loop {
            if self.control.is_paused() {
                checkpoint.save(&mut writer, written).await?;
                on_progress(&tracker.snapshot(written, total, true));
                if !self.control.wait_while_paused().await {
                    return Err(DownloadError::Cancelled);
                }
            }

            let next = tokio::select! {
                next = tokio::time::timeout(self.options.stall_timeout(), response.chunk()) => next,
                _ = self.control.cancelled() => {
                    checkpoint.save(&mut writer, written).await?;
                    return Err(DownloadError::Cancelled);
                }
            };

            let chunk = match next {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    checkpoint.save(&mut writer, written).await?;
                    return Err(DownloadError::network(source, e.to_string()));
                }
                Err(_) => {
                    checkpoint.save(&mut writer, written).await?;
                    return Err(DownloadError::network(
                        source,
                        format!("no data for {:?}", self.options.stall_timeout()),
                    ));
                }
            };

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| io_error("writing partial download", &paths.partial, e))?;
            hasher.update(&chunk);
            written += chunk.len() as u64;
            since_checkpoint += chunk.len() as u64;

            if since_checkpoint >= self.options.checkpoint_interval_bytes {
                checkpoint.save(&mut writer, written).await?;
                since_checkpoint = 0;
            }
            if let Some(progress) = tracker.tick(written, total) {
                on_progress(&progress);
            }
        }

        checkpoint.save(&mut writer, written).await?;
        if let Some(total) = total
            && written != total
        {
            return Err(DownloadError::network(
                source,
                format!("connection closed after {} of {} bytes", written, total),
            ));
        }

        let file = writer.into_inner();
        file.sync_all()
            .await
            .map_err(|e| io_error("syncing partial download", &paths.partial, e))?;
        drop(file);

        let actual = hex::encode(hasher.finalize());
        if actual != expected {
            tracing::error!(
                destination = %request.destination.display(),
                expected = %expected,
                actual = %actual,
                "Checksum mismatch, removing download"
            );
            paths
                .discard()
                .map_err(|e| io_error("removing corrupt download", &paths.partial, e))?;
            return Err(DownloadError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }

        tokio::fs::rename(&paths.partial, &paths.destination)
            .await
            .map_err(|e| io_error("moving verified download into place", &paths.destination, e))?;
        if let Err(e) = tokio::fs::remove_file(&paths.sidecar).await {
            tracing::debug!(path = %paths.sidecar.display(), error = %e, "Resume sidecar already gone");
        }

        on_progress(&tracker.snapshot(written, Some(written), false));
        Ok(written)
    }
}

/// Sidecar writer for the running transfer.
struct Checkpoint<'a> {
    paths: &'a TransferPaths,
    sidecar: ResumeSidecar,
}

impl Checkpoint<'_> {
    /// Flush `writer` and record `written` bytes as durable.
    async fn save(&mut self, writer: &mut BufWriter<tokio::fs::File>, written: u64) -> Result<(), DownloadError> {
        writer
            .flush()
            .await
            .map_err(|e| io_error("flushing partial download", &self.paths.partial, e))?;
        self.sidecar.bytes_written = written;
        self.sidecar.updated_at = Utc::now();
        self.paths
            .save_sidecar(&self.sidecar)
            .map_err(|e| io_error("writing resume sidecar", &self.paths.sidecar, e))?;
        tracing::trace!(bytes = written, "Checkpointed download");
        Ok(())
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> DownloadError {
    DownloadError::Io(format!("{} {}: {}", action, path.display(), e))
}

/// Parse `bytes <start>-<end>/<total|*>` into the start offset and total.
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let range = value.trim().strip_prefix("bytes ")?;
    let (span, total) = range.split_once('/')?;
    let (start, _end) = span.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("bytes 100-199/200"), Some((100, Some(200))));
        assert_eq!(parse_content_range("bytes 0-9/*"), Some((0, None)));
        assert_eq!(parse_content_range("items 0-9/10"), None);
        assert_eq!(parse_content_range("bytes x-9/10"), None);
        assert_eq!(parse_content_range(""), None);
    }

    #[test]
    fn test_candidates_dedup_and_order() {
        let request = FetchRequest {
            url: "http://a/x".into(),
            mirrors: vec!["http://b/x".into(), "http://a/x".into(), "http://c/x".into()],
            destination: PathBuf::from("/tmp/x"),
            sha256: String::new(),
        };
        assert_eq!(request.candidates(), vec!["http://a/x", "http://b/x", "http://c/x"]);
    }

    #[test]
    fn test_outcome_bytes() {
        assert_eq!(FetchOutcome::AlreadyPresent { bytes: 5 }.bytes(), 5);
        assert_eq!(
            FetchOutcome::Downloaded {
                bytes: 7,
                source: "s".into()
            }
            .bytes(),
            7
        );
    }

    #[test]
    fn test_abandon_removes_partial_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let destination = dir.path().join("x.iso");
        let paths = TransferPaths::for_destination(&destination);
        std::fs::write(&paths.partial, b"partial").unwrap();
        std::fs::write(&paths.sidecar, b"{}").unwrap();

        let downloader = MirroredDownloader::new(
            DownloadOptions::default(),
            MirrorOptions::default(),
            Arc::new(MirrorStatsStore::in_memory()),
            TransferControl::new(),
        )
        .unwrap();
        downloader.abandon(&destination).unwrap();
        assert!(!paths.partial.exists());
        assert!(!paths.sidecar.exists());
        downloader.abandon(&destination).unwrap();
    }
}
