//! User-supplied image files.

use crate::download::TransferControl;
use bootstick_shared::constants::{download::PARTIAL_SUFFIX, units::{GIB, MIB}};
use bootstick_shared::errors::{BootstickError, BootstickResult};
use bootstick_shared::progress::Stage;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const MIN_CUSTOM_BYTES: u64 = 10 * MIB;
pub const MAX_CUSTOM_BYTES: u64 = 10 * GIB;

const ISO9660_MAGIC_OFFSET: u64 = 0x8001;
const ISO9660_MAGIC: &[u8] = b"CD001";
const MBR_SIGNATURE_OFFSET: u64 = 510;
const MBR_SIGNATURE: &[u8] = &[0x55, 0xAA];

const COPY_CHUNK: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// ISO 9660 volume descriptor present.
    Iso9660,
    /// Raw disk image with an MBR boot signature.
    DiskImage,
}

/// Check a custom image file before anything destructive happens.
pub fn inspect(path: &Path) -> BootstickResult<(u64, ImageFormat)> {
    let invalid = |reason: String| BootstickError::Validation(format!("custom image {}: {}", path.display(), reason));

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if extension != "iso" && extension != "img" {
        return Err(invalid("extension must be .iso or .img".into()));
    }

    let meta = std::fs::metadata(path).map_err(|e| invalid(e.to_string()))?;
    if !meta.is_file() {
        return Err(invalid("not a regular file".into()));
    }
    let size = meta.len();
    if size < MIN_CUSTOM_BYTES {
        return Err(invalid(format!("{} bytes is below the {} MiB minimum", size, MIN_CUSTOM_BYTES / MIB)));
    }
    if size > MAX_CUSTOM_BYTES {
        return Err(invalid(format!("{} bytes exceeds the {} GiB maximum", size, MAX_CUSTOM_BYTES / GIB)));
    }

    let mut file = std::fs::File::open(path).map_err(|e| invalid(e.to_string()))?;
    if has_bytes_at(&mut file, ISO9660_MAGIC_OFFSET, ISO9660_MAGIC).map_err(|e| invalid(e.to_string()))? {
        return Ok((size, ImageFormat::Iso9660));
    }
    if has_bytes_at(&mut file, MBR_SIGNATURE_OFFSET, MBR_SIGNATURE).map_err(|e| invalid(e.to_string()))? {
        return Ok((size, ImageFormat::DiskImage));
    }
    Err(invalid("neither an ISO 9660 image nor a bootable disk image".into()))
}

fn has_bytes_at(file: &mut std::fs::File, offset: u64, expected: &[u8]) -> std::io::Result<bool> {
    let mut buf = vec![0u8; expected.len()];
    file.seek(SeekFrom::Start(offset))?;
    match file.read_exact(&mut buf) {
        Ok(()) => Ok(buf == expected),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Copy `source` to `destination` through a partial file, checking for
/// cancellation between chunks. A cancelled copy leaves nothing behind.
pub async fn copy_image(
    source: &Path,
    destination: &Path,
    control: &TransferControl,
    on_progress: &(dyn Fn(u64, u64) + Send + Sync),
) -> BootstickResult<u64> {
    let storage = |action: &str, path: &Path, e: std::io::Error| {
        BootstickError::Storage(format!("{} {}: {}", action, path.display(), e))
    };
    let partial = partial_path(destination);
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| storage("creating", parent, e))?;
    }

    let mut input = tokio::fs::File::open(source).await.map_err(|e| storage("opening", source, e))?;
    let total = input.metadata().await.map_err(|e| storage("inspecting", source, e))?.len();
    let mut output = tokio::fs::File::create(&partial)
        .await
        .map_err(|e| storage("creating", &partial, e))?;

    let mut buffer = vec![0u8; COPY_CHUNK];
    let mut copied = 0u64;
    loop {
        if control.is_cancelled() || !control.wait_while_paused().await {
            drop(output);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(BootstickError::Cancelled { stage: Stage::Download });
        }
        let n = input.read(&mut buffer).await.map_err(|e| storage("reading", source, e))?;
        if n == 0 {
            break;
        }
        output
            .write_all(&buffer[..n])
            .await
            .map_err(|e| storage("writing", &partial, e))?;
        copied += n as u64;
        on_progress(copied, total);
    }

    output.sync_all().await.map_err(|e| storage("syncing", &partial, e))?;
    drop(output);
    tokio::fs::rename(&partial, destination)
        .await
        .map_err(|e| storage("moving into place", destination, e))?;
    tracing::info!(source = %source.display(), destination = %destination.display(), bytes = copied, "Copied custom image");
    Ok(copied)
}

fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".into());
    destination.with_file_name(format!("{}{}", name, PARTIAL_SUFFIX))
}
