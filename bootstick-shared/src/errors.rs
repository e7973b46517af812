//! Error taxonomy for provisioning.
//!
//! Errors are categorized by where they surface and how they recover:
//! - [`BootstickError::Validation`]: unsafe or unusable input, raised before
//!   any destructive call
//! - [`BootstickError::Partition`] / [`BootstickError::Bootloader`]: device
//!   mutation failures (fatal)
//! - [`DownloadError`]: network side, subdivided by recovery path
//! - [`BootstickError::ConfigGeneration`]: malformed entry data (fatal, a
//!   broken boot script bricks the menu)
//!
//! The workflow wraps stage failures in [`BootstickError::Stage`] so the
//! first fatal error always carries the stage it came from.

use crate::progress::Stage;
use thiserror::Error;

/// Result alias used across bootstick crates.
pub type BootstickResult<T> = Result<T, BootstickError>;

// ============================================================================
// Top-Level Error
// ============================================================================

#[derive(Debug, Error)]
pub enum BootstickError {
    /// Bad or unsafe target device, bad selection. Caught before any
    /// destructive call.
    #[error("validation: {0}")]
    Validation(String),

    /// Partition table mutation, read-back or formatting failed.
    #[error("partition: {0}")]
    Partition(String),

    /// Firmware bootloader installation failed.
    #[error("bootloader: {0}")]
    Bootloader(String),

    #[error("download: {0}")]
    Download(#[from] DownloadError),

    /// Entry data cannot be rendered into a valid boot script.
    #[error("config generation: {0}")]
    ConfigGeneration(String),

    /// Manifest could not be read or written.
    #[error("manifest: {0}")]
    Manifest(String),

    /// Local file operation failed (copy, write, mount point).
    #[error("storage: {0}")]
    Storage(String),

    /// Invalid user configuration.
    #[error("config: {0}")]
    Config(String),

    /// Cooperative cancellation observed at a suspension point.
    #[error("cancelled during {stage}")]
    Cancelled { stage: Stage },

    /// A workflow stage failed; `source` is the underlying error.
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<BootstickError>,
    },

    #[error("internal: {0}")]
    Internal(String),
}

// ============================================================================
// Download Errors
// ============================================================================

/// Errors produced by the mirrored downloader.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Connection-level failure. Retried through mirror failover.
    #[error("network error from {url}: {message}")]
    Network { url: String, message: String },

    /// Every candidate source failed with a network error.
    #[error("all {attempted} source(s) failed, last error: {last}")]
    MirrorsExhausted { attempted: usize, last: String },

    /// Digest of the transferred bytes does not match. The destination is
    /// removed and the fetch is not retried.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Partial file or sidecar cannot be trusted. The partial is discarded
    /// and a fresh transfer is attempted once.
    #[error("resume state invalid: {0}")]
    ResumeStateInvalid(String),

    #[error("download cancelled")]
    Cancelled,

    /// Local write of the partial file, sidecar or destination failed.
    #[error("io: {0}")]
    Io(String),
}

/// Coarse classification used by front ends to tell a device problem from a
/// network problem from a logic problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Device,
    Network,
    Logic,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Device => "device problem",
            ErrorKind::Network => "network problem",
            ErrorKind::Logic => "logic problem",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl BootstickError {
    /// Attach the stage that produced this error. Already wrapped errors and
    /// cancellations keep their original stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            BootstickError::Stage { .. } | BootstickError::Cancelled { .. } => self,
            other => BootstickError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage this error was raised in, if known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BootstickError::Stage { stage, .. } | BootstickError::Cancelled { stage } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    /// Innermost error, with stage wrappers removed.
    pub fn root(&self) -> &BootstickError {
        match self {
            BootstickError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            BootstickError::Validation(_)
            | BootstickError::Partition(_)
            | BootstickError::Bootloader(_)
            | BootstickError::Manifest(_)
            | BootstickError::Storage(_) => ErrorKind::Device,
            BootstickError::Download(e) => e.kind(),
            BootstickError::ConfigGeneration(_)
            | BootstickError::Config(_)
            | BootstickError::Internal(_) => ErrorKind::Logic,
            BootstickError::Cancelled { .. } => ErrorKind::Cancelled,
            // root() never returns a Stage wrapper
            BootstickError::Stage { .. } => ErrorKind::Logic,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.root(),
            BootstickError::Cancelled { .. } | BootstickError::Download(DownloadError::Cancelled)
        )
    }
}

impl DownloadError {
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        DownloadError::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::Network { .. }
            | DownloadError::MirrorsExhausted { .. }
            | DownloadError::ChecksumMismatch { .. }
            | DownloadError::ResumeStateInvalid(_) => ErrorKind::Network,
            DownloadError::Io(_) => ErrorKind::Device,
            DownloadError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the next mirror should be tried after this error.
    pub fn is_failover(&self) -> bool {
        matches!(self, DownloadError::Network { .. })
    }
}
