//! Device manifest persistence.
//!
//! The manifest is the only record of what a device holds. It lives on the
//! data partition, is replaced atomically, and is read back by append runs
//! and front ends.

use crate::util;
use bootstick_shared::constants::{data_paths, download, manifest::FORMAT_VERSION};
use bootstick_shared::errors::{BootstickError, BootstickResult};
use bootstick_shared::manifest::{BootEntry, Manifest};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Differences between a manifest and the images actually on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreshnessReport {
    /// Entries whose image file is gone.
    pub missing: Vec<String>,
    /// Image files under the images directory no entry refers to.
    pub orphaned: Vec<String>,
}

impl FreshnessReport {
    pub fn is_fresh(&self) -> bool {
        self.missing.is_empty() && self.orphaned.is_empty()
    }
}

/// Manifest store rooted at a mounted data partition.
pub struct ManifestStore {
    data_mount: PathBuf,
}

impl ManifestStore {
    pub fn new(data_mount: impl Into<PathBuf>) -> Self {
        Self {
            data_mount: data_mount.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.data_mount
            .join(data_paths::STATE_DIR)
            .join(data_paths::MANIFEST_FILE)
    }

    /// Read the manifest, `None` if the device has none.
    pub fn load(&self) -> BootstickResult<Option<Manifest>> {
        let path = self.path();
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BootstickError::Manifest(format!("reading {}: {}", path.display(), e))),
        };
        let manifest: Manifest = serde_json::from_slice(&data)
            .map_err(|e| BootstickError::Manifest(format!("parsing {}: {}", path.display(), e)))?;
        if manifest.format_version > FORMAT_VERSION {
            return Err(BootstickError::Manifest(format!(
                "manifest format {} is newer than supported format {}",
                manifest.format_version, FORMAT_VERSION
            )));
        }
        tracing::debug!(path = %path.display(), entries = manifest.entries.len(), "Loaded manifest");
        Ok(Some(manifest))
    }

    /// Stamp and atomically replace the manifest.
    pub fn save(&self, manifest: &mut Manifest) -> BootstickResult<()> {
        manifest.touch();
        let path = self.path();
        let data = serde_json::to_vec_pretty(manifest)
            .map_err(|e| BootstickError::Manifest(format!("serializing manifest: {}", e)))?;
        util::atomic_write(&path, &data)
            .map_err(|e| BootstickError::Manifest(format!("writing {}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), entries = manifest.entries.len(), "Saved manifest");
        Ok(())
    }

    /// Image file on the device for a manifest path like `/isos/a/b.iso`.
    pub fn image_file(&self, image_path: &str) -> PathBuf {
        self.data_mount.join(image_path.trim_start_matches('/'))
    }

    pub fn freshness(&self, manifest: &Manifest) -> FreshnessReport {
        let missing = manifest
            .entries
            .iter()
            .filter(|e| !self.image_file(&e.image_path).is_file())
            .map(|e| e.image_path.clone())
            .collect();

        let referenced: BTreeSet<&str> = manifest.entries.iter().map(|e| e.image_path.as_str()).collect();
        let images_dir = self.data_mount.join(data_paths::IMAGES_DIR);
        let orphaned = WalkDir::new(&images_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let relative = e.path().strip_prefix(&self.data_mount).ok()?;
                let name = e.file_name().to_string_lossy();
                if name.ends_with(download::PARTIAL_SUFFIX) || name.ends_with(download::RESUME_SUFFIX) {
                    return None;
                }
                let image_path = format!("/{}", relative.to_string_lossy());
                (!referenced.contains(image_path.as_str())).then_some(image_path)
            })
            .collect();

        FreshnessReport { missing, orphaned }
    }

    /// Drop entries whose image file is gone. Returns the dropped entries.
    pub fn prune_missing(&self, manifest: &mut Manifest) -> Vec<BootEntry> {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut manifest.entries)
            .into_iter()
            .partition(|e| self.image_file(&e.image_path).is_file());
        manifest.entries = kept;
        for entry in &dropped {
            tracing::warn!(image = %entry.image_path, name = %entry.name, "Image missing from device, dropping entry");
        }
        dropped
    }

    pub fn data_mount(&self) -> &Path {
        &self.data_mount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootstick_shared::manifest::{EntryOrigin, Family, LayoutRecord};
    use tempfile::TempDir;

    fn layout() -> LayoutRecord {
        LayoutRecord {
            data_label: "BOOTSTICK".into(),
            system_boot_label: "BSEFI".into(),
            data_partition_index: 3,
            system_boot_size_bytes: 1022 << 20,
            data_start_bytes: 1 << 30,
            data_size_bytes: 14 << 30,
            sector_size: 512,
        }
    }

    fn entry(path: &str) -> BootEntry {
        BootEntry {
            name: path.rsplit('/').next().unwrap_or(path).into(),
            hotkey: None,
            image_path: path.into(),
            family: Family::Generic,
            size_bytes: 4,
            ram_boot: false,
            persistence: None,
            origin: EntryOrigin::Custom {
                source_path: "/tmp/x".into(),
            },
        }
    }

    fn place(dir: &Path, image_path: &str) {
        let path = dir.join(image_path.trim_start_matches('/'));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"data").unwrap();
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(ManifestStore::new(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_roundtrip_stamps_update() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut manifest = Manifest::new(layout(), true, "0.3.0");
        manifest.entries.push(entry("/isos/a/a.iso"));
        let created = manifest.updated_at;

        store.save(&mut manifest).unwrap();
        assert!(manifest.updated_at >= created);
        assert!(dir.path().join(".bootstick/manifest.json").exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_corrupt_manifest_is_error() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{\"format_version\": 1").unwrap();
        assert!(matches!(store.load(), Err(BootstickError::Manifest(_))));
    }

    #[test]
    fn test_newer_format_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut manifest = Manifest::new(layout(), false, "9.0.0");
        manifest.format_version = FORMAT_VERSION + 1;
        let data = serde_json::to_vec(&manifest).unwrap();
        util::atomic_write(&store.path(), &data).unwrap();

        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("newer"));
    }

    #[test]
    fn test_freshness_and_prune() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut manifest = Manifest::new(layout(), false, "0.3.0");
        manifest.entries.push(entry("/isos/a/present.iso"));
        manifest.entries.push(entry("/isos/b/gone.iso"));

        place(dir.path(), "/isos/a/present.iso");
        place(dir.path(), "/isos/custom/stray.iso");
        place(dir.path(), "/isos/c/inflight.iso.part");
        place(dir.path(), "/isos/c/inflight.iso.resume");

        let report = store.freshness(&manifest);
        assert_eq!(report.missing, vec!["/isos/b/gone.iso"]);
        assert_eq!(report.orphaned, vec!["/isos/custom/stray.iso"]);
        assert!(!report.is_fresh());

        let dropped = store.prune_missing(&mut manifest);
        assert_eq!(dropped.len(), 1);
        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(manifest.entries[0].image_path, "/isos/a/present.iso");
    }
}
