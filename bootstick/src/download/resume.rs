//! Partial file and resume sidecar handling.
//!
//! ```text
//! <dest>.part     bytes received so far
//! <dest>.resume   JSON checkpoint: source, total, bytes confirmed written
//! ```
//!
//! The sidecar is written only after the partial file has been flushed up
//! to `bytes_written`, so a sidecar never claims bytes the partial lacks.

use crate::util;
use bootstick_shared::constants::download::{PARTIAL_SUFFIX, RESUME_SUFFIX};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

const HASH_BUFFER: usize = 1024 * 1024;

/// Checkpoint persisted next to an in-flight download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeSidecar {
    /// Logical source URL of the request. Mirrors serve the same artifact,
    /// so a transfer started on one mirror may resume on another.
    pub source_url: String,
    /// Mirror that produced the last checkpointed bytes.
    pub mirror_url: String,
    pub destination: PathBuf,
    pub total_size: Option<u64>,
    pub bytes_written: u64,
    pub updated_at: DateTime<Utc>,
}

/// File names used for one destination.
#[derive(Debug, Clone)]
pub struct TransferPaths {
    pub destination: PathBuf,
    pub partial: PathBuf,
    pub sidecar: PathBuf,
}

impl TransferPaths {
    pub fn for_destination(destination: &Path) -> Self {
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        Self {
            destination: destination.to_path_buf(),
            partial: destination.with_file_name(format!("{}{}", name, PARTIAL_SUFFIX)),
            sidecar: destination.with_file_name(format!("{}{}", name, RESUME_SUFFIX)),
        }
    }

    pub fn load_sidecar(&self) -> Option<ResumeSidecar> {
        let data = match std::fs::read(&self.sidecar) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.sidecar.display(), error = %e, "Cannot read resume sidecar");
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                tracing::warn!(path = %self.sidecar.display(), error = %e, "Ignoring corrupt resume sidecar");
                None
            }
        }
    }

    pub fn save_sidecar(&self, sidecar: &ResumeSidecar) -> io::Result<()> {
        let data = serde_json::to_vec_pretty(sidecar).map_err(io::Error::other)?;
        util::atomic_write(&self.sidecar, &data)
    }

    /// Remove the partial file and sidecar. Missing files are not an error.
    pub fn discard(&self) -> io::Result<()> {
        for path in [&self.partial, &self.sidecar] {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed transfer state"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Offset to resume `source_url` from, or `None` when the transfer must
    /// start over. Stale or inconsistent state is discarded.
    pub fn resume_point(&self, source_url: &str) -> io::Result<Option<ResumeSidecar>> {
        let sidecar = self.load_sidecar();
        let partial_len = match std::fs::metadata(&self.partial) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        let usable = match (&sidecar, partial_len) {
            (Some(s), Some(_)) if s.source_url != source_url => {
                tracing::info!(
                    recorded = %s.source_url,
                    requested = %source_url,
                    "Partial download belongs to another source, restarting"
                );
                false
            }
            (Some(s), Some(len)) if s.bytes_written != len => {
                tracing::info!(
                    recorded = s.bytes_written,
                    actual = len,
                    "Partial file size does not match checkpoint, restarting"
                );
                false
            }
            (Some(s), Some(_)) => s.bytes_written > 0,
            _ => false,
        };

        if usable {
            return Ok(sidecar);
        }
        if sidecar.is_some() || partial_len.is_some() {
            self.discard()?;
        }
        Ok(None)
    }
}

/// Hash `path` from the start, returning the digest state and byte count.
pub async fn hash_file(path: &Path) -> io::Result<(Sha256, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    Ok((hasher, total))
}
