//! Image selections and their placement on the data partition.
//!
//! A selection is either a curated catalog image, fetched over the network,
//! or a custom image file supplied by the user. Both are checked up front
//! by [`ImageSelection::prepare`] so that nothing destructive happens for a
//! selection that cannot succeed, and both end up as a [`BootEntry`].
//!
//! Either kind may ask for a persistence overlay file. It is placed under
//! `/persistence/<image>/` and sized into the space checks along with the
//! image itself.

pub mod custom;

pub use custom::{ImageFormat, MAX_CUSTOM_BYTES, MIN_CUSTOM_BYTES};

use crate::bootcfg::{HotkeyAllocator, persistence_overlay, validate_display_name, validate_image_path};
use crate::download::FetchRequest;
use crate::util;
use bootstick_shared::constants::data_paths;
use bootstick_shared::constants::units::MIB;
use bootstick_shared::errors::{BootstickError, BootstickResult};
use bootstick_shared::manifest::{BootEntry, EntryOrigin, Family};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest persistence overlay worth creating.
pub const MIN_PERSISTENCE_MIB: u64 = 64;

fn default_family() -> Family {
    Family::Generic
}

/// Curated installer image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogImage {
    /// Stable identifier, also the directory under `/isos`.
    pub id: String,
    pub name: String,
    #[serde(default = "default_family")]
    pub family: Family,
    #[serde(default)]
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
    /// Expected SHA-256, hex encoded.
    pub sha256: String,
    pub size_bytes: u64,
    /// File name on the device; defaults to the last URL path segment.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Size of a persistence overlay to create, in MiB.
    #[serde(default)]
    pub persistence_mib: Option<u64>,
}

/// Image file supplied by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomImage {
    pub path: PathBuf,
    /// Menu name; defaults to the file stem.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_family")]
    pub family: Family,
    #[serde(default)]
    pub persistence_mib: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImageSelection {
    Catalog(CatalogImage),
    Custom(CustomImage),
}

/// How a prepared image reaches the device.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Download {
        url: String,
        mirrors: Vec<String>,
        sha256: String,
    },
    Copy {
        path: PathBuf,
        format: ImageFormat,
    },
}

/// Persistence overlay file, an ext4 file system in a sparse file.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceFile {
    /// Absolute path on the data partition.
    pub path: String,
    pub size_bytes: u64,
    /// Volume label the live system looks for.
    pub label: &'static str,
}

impl PersistenceFile {
    pub fn destination(&self, data_mount: &Path) -> PathBuf {
        data_mount.join(self.path.trim_start_matches('/'))
    }
}

/// A validated selection with its placement decided.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub name: String,
    pub family: Family,
    pub size_bytes: u64,
    /// Absolute path on the data partition.
    pub image_path: String,
    pub source: ImageSource,
    pub persistence: Option<PersistenceFile>,
    origin: EntryOrigin,
}

impl ImageSelection {
    pub fn display_name(&self) -> String {
        match self {
            ImageSelection::Catalog(c) => c.name.clone(),
            ImageSelection::Custom(c) => c
                .name
                .clone()
                .or_else(|| c.path.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .unwrap_or_else(|| c.path.display().to_string()),
        }
    }

    /// Validate the selection and decide where it lands on the device.
    pub fn prepare(&self) -> BootstickResult<PreparedImage> {
        match self {
            ImageSelection::Catalog(catalog) => prepare_catalog(catalog),
            ImageSelection::Custom(custom) => prepare_custom(custom, self.display_name()),
        }
    }
}

fn prepare_catalog(image: &CatalogImage) -> BootstickResult<PreparedImage> {
    let invalid = |reason: String| BootstickError::Validation(format!("catalog image {:?}: {}", image.id, reason));

    let id = util::sanitize_file_name(&image.id);
    if image.id.trim().is_empty() {
        return Err(invalid("empty id".into()));
    }
    validate_display_name(image.name.trim()).map_err(invalid)?;
    for url in std::iter::once(&image.url).chain(&image.mirrors) {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid(format!("unsupported source {:?}", url)));
        }
    }
    let sha256 = image.sha256.trim().to_ascii_lowercase();
    if sha256.len() != 64 || !sha256.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("sha256 must be 64 hex characters".into()));
    }
    if image.size_bytes == 0 {
        return Err(invalid("size must be known".into()));
    }

    let file_name = image
        .file_name
        .clone()
        .unwrap_or_else(|| url_file_name(&image.url));
    let image_path = format!(
        "/{}/{}/{}",
        data_paths::IMAGES_DIR,
        id,
        util::sanitize_file_name(&file_name)
    );
    validate_image_path(&image_path).map_err(invalid)?;
    let persistence = plan_persistence(image.family, &id, image.persistence_mib).map_err(invalid)?;

    Ok(PreparedImage {
        name: image.name.trim().to_string(),
        family: image.family,
        size_bytes: image.size_bytes,
        image_path,
        persistence,
        source: ImageSource::Download {
            url: image.url.clone(),
            mirrors: image.mirrors.clone(),
            sha256: sha256.clone(),
        },
        origin: EntryOrigin::Catalog {
            id: image.id.clone(),
            version: image.version.clone(),
            source_url: image.url.clone(),
            sha256,
        },
    })
}

fn prepare_custom(image: &CustomImage, name: String) -> BootstickResult<PreparedImage> {
    let invalid = |reason: String| BootstickError::Validation(format!("custom image {}: {}", image.path.display(), reason));

    validate_display_name(&name).map_err(invalid)?;
    let stem = image
        .path
        .file_stem()
        .map(|s| util::sanitize_file_name(&s.to_string_lossy()))
        .unwrap_or_default();
    let persistence = plan_persistence(image.family, &stem, image.persistence_mib).map_err(invalid)?;
    let (size_bytes, format) = custom::inspect(&image.path)?;
    let file_name = image
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let image_path = format!(
        "/{}/{}/{}",
        data_paths::IMAGES_DIR,
        data_paths::CUSTOM_DIR,
        util::sanitize_file_name(&file_name)
    );
    validate_image_path(&image_path).map_err(BootstickError::Validation)?;

    Ok(PreparedImage {
        name,
        family: image.family,
        size_bytes,
        image_path,
        persistence,
        source: ImageSource::Copy {
            path: image.path.clone(),
            format,
        },
        origin: EntryOrigin::Custom {
            source_path: image.path.display().to_string(),
        },
    })
}

/// Place a persistence overlay of `mib` MiB for an image stored as `stem`.
fn plan_persistence(family: Family, stem: &str, mib: Option<u64>) -> Result<Option<PersistenceFile>, String> {
    let Some(mib) = mib else {
        return Ok(None);
    };
    let Some((file_name, label)) = persistence_overlay(family) else {
        return Err(format!("{} images cannot boot with a persistence file", family));
    };
    if mib < MIN_PERSISTENCE_MIB {
        return Err(format!("persistence needs at least {} MiB (got {})", MIN_PERSISTENCE_MIB, mib));
    }
    let size_bytes = mib
        .checked_mul(MIB)
        .ok_or_else(|| format!("persistence size {} MiB is out of range", mib))?;
    let path = format!("/{}/{}/{}", data_paths::PERSISTENCE_DIR, stem, file_name);
    validate_image_path(&path)?;
    Ok(Some(PersistenceFile { path, size_bytes, label }))
}

/// Last path segment of `url`, without query or fragment.
fn url_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("image.iso")
        .to_string()
}

impl PreparedImage {
    /// Bytes this image occupies on the data partition, overlay included.
    pub fn required_bytes(&self) -> u64 {
        self.size_bytes
            .saturating_add(self.persistence.as_ref().map_or(0, |p| p.size_bytes))
    }

    /// Where the image file lives under `data_mount`.
    pub fn destination(&self, data_mount: &Path) -> PathBuf {
        data_mount.join(self.image_path.trim_start_matches('/'))
    }

    pub fn fetch_request(&self, data_mount: &Path) -> Option<FetchRequest> {
        match &self.source {
            ImageSource::Download { url, mirrors, sha256 } => Some(FetchRequest {
                url: url.clone(),
                mirrors: mirrors.clone(),
                destination: self.destination(data_mount),
                sha256: sha256.clone(),
            }),
            ImageSource::Copy { .. } => None,
        }
    }

    /// Resolve into a menu entry. Images at or below `ram_boot_threshold`
    /// bytes also get a RAM boot variant.
    pub fn to_entry(&self, hotkeys: &mut HotkeyAllocator, ram_boot_threshold: u64) -> BootEntry {
        BootEntry {
            name: self.name.clone(),
            hotkey: hotkeys.next_key(),
            image_path: self.image_path.clone(),
            family: self.family,
            size_bytes: self.size_bytes,
            ram_boot: self.size_bytes <= ram_boot_threshold,
            persistence: self.persistence.as_ref().map(|p| p.path.clone()),
            origin: self.origin.clone(),
        }
    }
}

/// Check that no two prepared images land on the same path, and that no
/// two persistence overlays share a file.
pub fn ensure_distinct(images: &[PreparedImage]) -> BootstickResult<()> {
    for (i, image) in images.iter().enumerate() {
        if let Some(other) = images[..i].iter().find(|o| o.image_path == image.image_path) {
            return Err(BootstickError::Validation(format!(
                "{:?} and {:?} would both be stored at {}",
                other.name, image.name, image.image_path
            )));
        }
        let Some(overlay) = &image.persistence else {
            continue;
        };
        if let Some(other) = images[..i]
            .iter()
            .find(|o| o.persistence.as_ref().is_some_and(|p| p.path == overlay.path))
        {
            return Err(BootstickError::Validation(format!(
                "{:?} and {:?} would share the persistence file {}",
                other.name, image.name, overlay.path
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SHA: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn catalog(id: &str, url: &str) -> CatalogImage {
        CatalogImage {
            id: id.into(),
            name: "Ubuntu".into(),
            family: Family::Debian,
            version: "24.04".into(),
            url: url.into(),
            mirrors: vec![],
            sha256: SHA.into(),
            size_bytes: 100 * MIB,
            file_name: None,
            persistence_mib: None,
        }
    }

    #[test]
    fn test_catalog_placement() {
        let image = ImageSelection::Catalog(catalog("ubuntu", "https://a.example/rel/ubuntu-24.04.iso?x=1"))
            .prepare()
            .unwrap();
        assert_eq!(image.image_path, "/isos/ubuntu/ubuntu-24.04.iso");
        assert_eq!(
            image.destination(Path::new("/mnt/data")),
            Path::new("/mnt/data/isos/ubuntu/ubuntu-24.04.iso")
        );
        let request = image.fetch_request(Path::new("/mnt/data")).unwrap();
        assert_eq!(request.sha256, SHA);
    }

    #[test]
    fn test_catalog_validation() {
        let mut bad_sha = catalog("u", "https://a/u.iso");
        bad_sha.sha256 = "abc".into();
        let bad_url = catalog("u", "ftp://a/u.iso");
        let mut no_size = catalog("u", "https://a/u.iso");
        no_size.size_bytes = 0;
        let mut bad_mirror = catalog("u", "https://a/u.iso");
        bad_mirror.mirrors.push("file:///etc/passwd".into());

        for image in [bad_sha, bad_url, no_size, bad_mirror] {
            let err = ImageSelection::Catalog(image).prepare().unwrap_err();
            assert!(matches!(err, BootstickError::Validation(_)));
        }
    }

    #[test]
    fn test_menu_title_checked_before_any_work() {
        let mut long = catalog("u", "https://a/u.iso");
        long.name = "x".repeat(200);
        let mut newline = catalog("u", "https://a/u.iso");
        newline.name = "Ubuntu\nmenuentry evil".into();
        let mut blank = catalog("u", "https://a/u.iso");
        blank.name = "   ".into();

        for image in [long, newline, blank] {
            let err = ImageSelection::Catalog(image).prepare().unwrap_err();
            assert!(matches!(err, BootstickError::Validation(_)));
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rescue.iso");
        custom::tests::sparse_image(&path, 16 * MIB, 0x8001, b"CD001");
        let err = ImageSelection::Custom(CustomImage {
            path,
            name: Some("a".repeat(129)),
            family: Family::Generic,
            persistence_mib: None,
        })
        .prepare()
        .unwrap_err();
        assert!(err.to_string().contains("longer than 128"));
    }

    #[test]
    fn test_uppercase_checksum_normalized() {
        let mut image = catalog("u", "https://a/u.iso");
        image.sha256 = SHA.to_ascii_uppercase();
        let prepared = ImageSelection::Catalog(image).prepare().unwrap();
        assert!(matches!(prepared.source, ImageSource::Download { ref sha256, .. } if sha256 == SHA));
    }

    #[test]
    fn test_custom_placement_and_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("My Rescue.iso");
        custom::tests::sparse_image(&path, 16 * MIB, 0x8001, b"CD001");

        let selection = ImageSelection::Custom(CustomImage {
            path: path.clone(),
            name: None,
            family: Family::Generic,
            persistence_mib: None,
        });
        assert_eq!(selection.display_name(), "My Rescue");
        let image = selection.prepare().unwrap();
        assert_eq!(image.image_path, "/isos/custom/My_Rescue.iso");
        assert_eq!(image.size_bytes, 16 * MIB);
        assert!(image.fetch_request(dir.path()).is_none());
    }

    #[test]
    fn test_to_entry_ram_threshold_and_hotkeys() {
        let small = ImageSelection::Catalog(catalog("small", "https://a/small.iso")).prepare().unwrap();
        let mut big_image = catalog("big", "https://a/big.iso");
        big_image.size_bytes = 2000 * MIB;
        let big = ImageSelection::Catalog(big_image).prepare().unwrap();

        let mut hotkeys = HotkeyAllocator::new(vec!['a']);
        let first = small.to_entry(&mut hotkeys, 128 * MIB);
        let second = big.to_entry(&mut hotkeys, 128 * MIB);
        assert!(first.ram_boot);
        assert!(!second.ram_boot);
        assert_eq!(first.hotkey, Some('b'));
        assert_eq!(second.hotkey, Some('d'));
        assert!(matches!(first.origin, EntryOrigin::Catalog { ref id, .. } if id == "small"));
    }

    #[test]
    fn test_persistence_placement_and_size() {
        let mut image = catalog("ubuntu", "https://a/ubuntu.iso");
        image.persistence_mib = Some(4096);
        let prepared = ImageSelection::Catalog(image).prepare().unwrap();
        let overlay = prepared.persistence.clone().unwrap();
        assert_eq!(overlay.path, "/persistence/ubuntu/casper-rw");
        assert_eq!(overlay.label, "casper-rw");
        assert_eq!(prepared.required_bytes(), 100 * MIB + 4096 * MIB);

        let entry = prepared.to_entry(&mut HotkeyAllocator::new(Vec::new()), 0);
        assert_eq!(entry.persistence.as_deref(), Some("/persistence/ubuntu/casper-rw"));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Fedora-Live.iso");
        custom::tests::sparse_image(&path, 16 * MIB, 0x8001, b"CD001");
        let fedora = ImageSelection::Custom(CustomImage {
            path,
            name: None,
            family: Family::Redhat,
            persistence_mib: Some(512),
        })
        .prepare()
        .unwrap();
        assert_eq!(fedora.persistence.unwrap().path, "/persistence/Fedora-Live/overlay.img");
    }

    #[test]
    fn test_persistence_rejected_where_unsupported() {
        let mut arch = catalog("arch", "https://a/arch.iso");
        arch.family = Family::Arch;
        arch.persistence_mib = Some(1024);
        let err = ImageSelection::Catalog(arch).prepare().unwrap_err();
        assert!(err.to_string().contains("cannot boot with a persistence file"));

        let mut tiny = catalog("ubuntu", "https://a/ubuntu.iso");
        tiny.persistence_mib = Some(8);
        assert!(matches!(
            ImageSelection::Catalog(tiny).prepare(),
            Err(BootstickError::Validation(_))
        ));
    }

    #[test]
    fn test_ensure_distinct_overlays() {
        let dir = TempDir::new().unwrap();
        let mut selections = Vec::new();
        for file in ["live.iso", "live.img"] {
            let path = dir.path().join(file);
            custom::tests::sparse_image(&path, 16 * MIB, 0x8001, b"CD001");
            selections.push(ImageSelection::Custom(CustomImage {
                path,
                name: None,
                family: Family::Debian,
                persistence_mib: Some(128),
            }));
        }
        let prepared: Vec<PreparedImage> = selections.iter().map(|s| s.prepare().unwrap()).collect();
        let err = ensure_distinct(&prepared).unwrap_err();
        assert!(err.to_string().contains("persistence file"));
    }

    #[test]
    fn test_ensure_distinct() {
        let a = ImageSelection::Catalog(catalog("same", "https://a/x.iso")).prepare().unwrap();
        let b = ImageSelection::Catalog(catalog("same", "https://b/x.iso")).prepare().unwrap();
        assert!(ensure_distinct(std::slice::from_ref(&a)).is_ok());
        assert!(ensure_distinct(&[a, b]).is_err());
    }

    #[test]
    fn test_selection_serde_shape() {
        let json = r#"{"kind": "catalog", "id": "arch", "name": "Arch Linux", "family": "arch",
            "url": "https://a/arch.iso", "sha256": "00", "size_bytes": 5}"#;
        let selection: ImageSelection = serde_json::from_str(json).unwrap();
        assert!(matches!(selection, ImageSelection::Catalog(ref c) if c.family == Family::Arch && c.mirrors.is_empty()));
    }

    #[test]
    fn test_url_file_name() {
        assert_eq!(url_file_name("https://a/b/c.iso"), "c.iso");
        assert_eq!(url_file_name("https://a/b/c.iso#frag"), "c.iso");
        assert_eq!(url_file_name("https://a/b/"), "b");
    }
}
