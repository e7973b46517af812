pub mod process;

use bootstick_shared::errors::{BootstickError, BootstickResult};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directories searched for system tools after `$PATH`.
const SYSTEM_TOOL_DIRS: &[&str] = &["/usr/sbin", "/sbin", "/usr/bin", "/bin"];

/// Locate the first available binary among `names`.
///
/// `BOOTSTICK_TOOLS_DIR` is searched first so packagers can pin tool
/// versions, then `$PATH`, then the usual sbin directories.
pub fn find_binary(names: &[&str]) -> BootstickResult<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Ok(dir) = std::env::var("BOOTSTICK_TOOLS_DIR") {
        dirs.push(PathBuf::from(dir));
    }
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    dirs.extend(SYSTEM_TOOL_DIRS.iter().map(PathBuf::from));

    for name in names {
        for dir in &dirs {
            let candidate = dir.join(name);
            if candidate.is_file() {
                tracing::debug!(binary = %candidate.display(), "Found binary");
                return Ok(candidate);
            }
        }
    }

    Err(BootstickError::Config(format!(
        "None of [{}] found in PATH or {}",
        names.join(", "),
        SYSTEM_TOOL_DIRS.join(":")
    )))
}

/// First path in `candidates` that exists.
pub fn first_existing<P: AsRef<Path>>(candidates: &[P]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|p| p.as_ref())
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

/// Reduce a file name to `[A-Za-z0-9._+-]`, replacing everything else with
/// `_`. Leading dots are stripped so the result is never hidden or `..`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write `contents` to `path` atomically.
///
/// The data goes to a temp file in the same directory, is synced, then
/// renamed over `path`. Readers see either the old or the new file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Bytes available to unprivileged writers on the file system holding
/// `path`.
pub fn available_space(path: &Path) -> std::io::Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("ubuntu-24.04-desktop-amd64.iso"), "ubuntu-24.04-desktop-amd64.iso");
        assert_eq!(sanitize_file_name("my image (v2).iso"), "my_image__v2_.iso");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name("..."), "image");
    }

    #[test]
    fn test_atomic_write_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/state.json");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_available_space() {
        let temp_dir = TempDir::new().unwrap();
        assert!(available_space(temp_dir.path()).unwrap() > 0);
        assert!(available_space(&temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_first_existing() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("b");
        std::fs::write(&present, b"x").unwrap();

        let found = first_existing(&[temp_dir.path().join("a"), present.clone()]);
        assert_eq!(found, Some(present));
        assert_eq!(first_existing(&[temp_dir.path().join("c")]), None);
    }
}
