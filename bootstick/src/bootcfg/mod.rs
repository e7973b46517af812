//! Boot menu generation.
//!
//! ```text
//!  Manifest entries ──► validate ──► preamble ──► entries ──► power entries
//!                                       │            │
//!                                       │            └─ family strategy table
//!                                       └─ modules, rmmod tpm, font, search
//!                                                        │
//!                                            conformance self-check ──► grub.cfg
//! ```
//!
//! Output is a pure function of (layout, entries, options): no timestamps,
//! no host state. Regenerating from the same manifest yields identical
//! bytes, so the workflow regenerates on every image set change instead of
//! patching.

pub mod conformance;
mod entry;
mod family;
pub mod hotkey;
mod preamble;
mod script;

pub use conformance::{Violation, ViolationKind, check, ensure_conformant};
pub use hotkey::HotkeyAllocator;

use crate::options::BootMenuOptions;
use crate::util;
use bootstick_shared::constants::data_paths;
use bootstick_shared::errors::{BootstickError, BootstickResult};
use bootstick_shared::manifest::{BootEntry, Family, LayoutRecord, Manifest};
use script::ScriptWriter;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Script variable holding the located data partition.
pub(crate) const DATA_VAR: &str = "bootstick_data";

/// Script variable holding the font path.
pub(crate) const FONT_VAR: &str = "bootstick_font";

/// Script variable holding the theme path.
pub(crate) const THEME_VAR: &str = "bootstick_theme";

/// Pause so diagnostics stay readable before returning to the menu.
pub(crate) const PAUSE: &str = "sleep --verbose --interruptible 10";

const MAX_NAME_LEN: usize = 128;

pub struct BootConfigGenerator {
    options: BootMenuOptions,
}

impl BootConfigGenerator {
    pub fn new(options: BootMenuOptions) -> Self {
        Self { options }
    }

    /// Render the boot script for `entries` on a device with `layout`.
    pub fn generate(&self, layout: &LayoutRecord, entries: &[BootEntry]) -> BootstickResult<String> {
        validate_label(&layout.data_label)?;
        validate_entries(entries)?;

        let mut w = ScriptWriter::new();
        preamble::render(&mut w, layout, &self.options, entries.len());
        for entry in entries {
            entry::render(&mut w, entry, layout, &self.options);
        }
        entry::render_power_entries(&mut w);

        let text = w
            .finish()
            .map_err(|e| BootstickError::ConfigGeneration(format!("block structure: {}", e)))?;
        conformance::ensure_conformant(&text)?;
        Ok(text)
    }

    pub fn generate_from_manifest(&self, manifest: &Manifest) -> BootstickResult<String> {
        self.generate(&manifest.layout, &manifest.entries)
    }

    /// Atomically write `text` to `<data_mount>/boot/grub/grub.cfg`.
    pub fn write(&self, data_mount: &Path, text: &str) -> BootstickResult<PathBuf> {
        let path = data_mount.join(data_paths::GRUB_CONFIG);
        util::atomic_write(&path, text.as_bytes())
            .map_err(|e| BootstickError::Storage(format!("writing {}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), bytes = text.len(), "Wrote boot configuration");
        Ok(path)
    }
}

fn validate_label(label: &str) -> BootstickResult<()> {
    if label.is_empty() || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(BootstickError::ConfigGeneration(format!(
            "data partition label {:?} cannot be searched for safely",
            label
        )));
    }
    Ok(())
}

/// Check that a menu title is non-empty, bounded and free of control
/// characters.
pub fn validate_display_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("empty display name".into());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("display name longer than {} characters", MAX_NAME_LEN));
    }
    if name.chars().any(char::is_control) {
        return Err("display name contains control characters".into());
    }
    Ok(())
}

/// Check that an image path is absolute, normalized and made only of
/// characters that survive GRUB quoting and kernel command lines.
pub fn validate_image_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("{:?} is not absolute", path));
    }
    for component in path[1..].split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(format!("{:?} is not a normalized path", path));
        }
    }
    if let Some(bad) = path
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+')))
    {
        return Err(format!("{:?} contains unsupported character {:?}", path, bad));
    }
    Ok(())
}

/// Overlay file name and ext4 label for families whose live system can
/// keep persistent changes in a file on the data partition.
pub fn persistence_overlay(family: Family) -> Option<(&'static str, &'static str)> {
    family::strategy_for(family)
        .persistence
        .map(|p| (p.file_name, p.label))
}

fn validate_entries(entries: &[BootEntry]) -> BootstickResult<()> {
    let mut paths = HashSet::new();
    let mut hotkeys = HashSet::new();

    for entry in entries {
        let invalid = |reason: String| BootstickError::ConfigGeneration(format!("entry {:?}: {}", entry.name, reason));

        validate_display_name(&entry.name).map_err(invalid)?;
        validate_image_path(&entry.image_path).map_err(invalid)?;
        if !paths.insert(entry.image_path.as_str()) {
            return Err(invalid(format!("duplicate image path {}", entry.image_path)));
        }
        if let Some(overlay) = &entry.persistence {
            if persistence_overlay(entry.family).is_none() {
                return Err(invalid(format!("{} images cannot boot with a persistence file", entry.family)));
            }
            validate_image_path(overlay).map_err(invalid)?;
            if !paths.insert(overlay.as_str()) {
                return Err(invalid(format!("duplicate persistence path {}", overlay)));
            }
        }
        if let Some(key) = entry.hotkey {
            if !hotkey::is_assignable(key) {
                return Err(invalid(format!("hotkey {:?} is reserved or unsupported", key)));
            }
            if !hotkeys.insert(key) {
                return Err(invalid(format!("hotkey {:?} is already used", key)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootstick_shared::manifest::{EntryOrigin, Family};
    use proptest::prelude::*;

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

    fn entry(name: &str, path: &str, family: Family, hotkey: Option<char>, ram_boot: bool) -> BootEntry {
        BootEntry {
            name: name.into(),
            hotkey,
            image_path: path.into(),
            family,
            size_bytes: 1 << 30,
            ram_boot,
            persistence: None,
            origin: EntryOrigin::Custom {
                source_path: format!("/home/user{}", path),
            },
        }
    }

    fn sample_entries() -> Vec<BootEntry> {
        vec![
            entry("Ubuntu 24.04", "/isos/ubuntu/ubuntu-24.04.iso", Family::Debian, Some('a'), false),
            entry("Fedora 40", "/isos/fedora/Fedora-40.iso", Family::Redhat, Some('b'), false),
            entry("Arch Linux", "/isos/arch/archlinux.iso", Family::Arch, Some('d'), false),
            entry("Rescue", "/isos/custom/rescue.iso", Family::Generic, Some('f'), true),
        ]
    }

    fn generator() -> BootConfigGenerator {
        BootConfigGenerator::new(BootMenuOptions::default())
    }

    fn position(text: &str, needle: &str) -> usize {
        text.find(needle).unwrap_or_else(|| panic!("{:?} not in output", needle))
    }

    #[test]
    fn test_preamble_order() {
        let text = generator().generate(&layout(), &sample_entries()).unwrap();

        let modules = position(&text, "insmod loopback");
        let tpm = position(&text, "rmmod tpm");
        let font = position(&text, "loadfont");
        let search = position(&text, "search --no-floppy");
        let first_entry = position(&text, "menuentry");
        let first_loopback = position(&text, "loopback loop");

        assert!(modules < tpm && tpm < font && font < search && search < first_entry);
        assert!(tpm < first_loopback);
        assert_eq!(text.matches("rmmod tpm").count(), 1);
    }

    #[test]
    fn test_font_referenced_by_full_path_with_existence_check() {
        let text = generator().generate(&layout(), &[]).unwrap();
        assert!(text.contains("set bootstick_font=\"${prefix}/fonts/unicode.pf2\""));
        assert!(text.contains("if [ -f \"${bootstick_font}\" ]; then"));
        assert!(text.contains("terminal_output console"));
    }

    #[test]
    fn test_theme_set_only_when_present() {
        let text = generator().generate(&layout(), &[]).unwrap();
        assert!(text.contains("set bootstick_theme=\"${prefix}/themes/bootstick/theme.txt\""));
        let exists = position(&text, "if [ -f \"${bootstick_theme}\" ]; then");
        let set = position(&text, "set theme=\"${bootstick_theme}\"");
        assert!(exists < set);
        assert!(text.contains("theme ${bootstick_theme} not found, using plain menu"));

        let options = BootMenuOptions {
            theme: false,
            ..Default::default()
        };
        let plain = BootConfigGenerator::new(options).generate(&layout(), &[]).unwrap();
        assert!(!plain.contains("bootstick_theme"));
        assert!(!plain.contains("set theme="));
        assert!(check(&plain).is_empty());
    }

    #[test]
    fn test_persistent_entry_boots_kernel_with_overlay() {
        let mut ubuntu = entry("Ubuntu 24.04", "/isos/ubuntu/ubuntu-24.04.iso", Family::Debian, Some('a'), false);
        ubuntu.persistence = Some("/persistence/ubuntu/casper-rw".into());
        let mut fedora = entry("Fedora 40", "/isos/fedora/Fedora-40.iso", Family::Redhat, Some('b'), false);
        fedora.persistence = Some("/persistence/fedora/overlay.img".into());
        let text = generator().generate(&layout(), &[ubuntu, fedora]).unwrap();

        assert!(!text.contains("configfile (loop)/boot/grub/loopback.cfg"));
        assert!(text.contains(
            "linux (loop)/casper/vmlinuz boot=casper iso-scan/filename=${isofile} quiet splash persistent persistent-path=/persistence/ubuntu"
        ));
        assert!(text.contains("rd.live.overlay=LABEL=BOOTSTICK:/persistence/fedora/overlay.img rd.live.overlay.overlayfs=1"));
        assert!(text.contains("if [ ! -f \"(${bootstick_data})/persistence/ubuntu/casper-rw\" ]; then"));
        assert!(check(&text).is_empty(), "{:?}", check(&text));
    }

    #[test]
    fn test_rejects_persistence_for_unsupported_family() {
        let mut arch = entry("Arch Linux", "/isos/arch/archlinux.iso", Family::Arch, Some('a'), false);
        arch.persistence = Some("/persistence/arch/overlay.img".into());
        let err = generator().generate(&layout(), &[arch]).unwrap_err();
        assert!(matches!(err, BootstickError::ConfigGeneration(_)));

        let mut clash = entry("Ubuntu", "/isos/ubuntu/u.iso", Family::Debian, None, false);
        clash.persistence = Some("/isos/ubuntu/u.iso".into());
        assert!(generator().generate(&layout(), &[clash]).is_err());
    }

    #[test]
    fn test_search_hint_order() {
        let text = generator().generate(&layout(), &[]).unwrap();
        let first = position(&text, "--label BOOTSTICK --hint hd0,gpt3");
        let second = position(&text, "--label BOOTSTICK --hint hd1,gpt3");
        let unhinted = position(&text, "search --no-floppy --set=bootstick_data --label BOOTSTICK\n");
        assert!(first < second && second < unhinted);
    }

    #[test]
    fn test_hotkey_precedes_title() {
        let text = generator().generate(&layout(), &sample_entries()).unwrap();
        assert!(text.contains("menuentry --hotkey=a --class debian '[A] Ubuntu 24.04' {"));
        assert!(text.contains("menuentry --hotkey=b --class redhat '[B] Fedora 40' {"));
    }

    #[test]
    fn test_family_dispatch() {
        let text = generator().generate(&layout(), &sample_entries()).unwrap();
        assert!(text.contains("configfile (loop)/boot/grub/loopback.cfg"));
        assert!(text.contains("linux (loop)/images/pxeboot/vmlinuz iso-scan/filename=${isofile} root=live:CDLABEL=${iso_label}"));
        assert!(text.contains("img_dev=/dev/disk/by-label/BOOTSTICK img_loop=${isofile}"));
        assert!(text.contains("no known generic boot layout found"));
        assert!(text.contains("probe --set=iso_label --label (loop)"));
    }

    #[test]
    fn test_missing_image_diagnostics() {
        let text = generator().generate(&layout(), &sample_entries()).unwrap();
        assert!(text.contains("elif [ ! -f \"(${bootstick_data})${isofile}\" ]; then"));
        assert!(text.contains("ls \"(${bootstick_data})/isos/ubuntu/\""));
    }

    #[test]
    fn test_ram_variant_only_for_flagged_entries() {
        let text = generator().generate(&layout(), &sample_entries()).unwrap();
        assert_eq!(text.matches("(load into RAM)").count(), 1);
        assert!(text.contains("menuentry --class generic 'Rescue (load into RAM)' {"));
        assert!(text.contains("linux16 \"(${bootstick_data})/boot/memdisk\" iso raw"));
        assert!(text.contains("initrd16 \"(${bootstick_data})${isofile}\""));
    }

    #[test]
    fn test_safe_graphics_variants() {
        let options = BootMenuOptions {
            safe_graphics_variants: true,
            ..Default::default()
        };
        let text = BootConfigGenerator::new(options)
            .generate(&layout(), &sample_entries())
            .unwrap();
        assert_eq!(text.matches("(safe graphics)").count(), 4);
        assert!(text.contains("nomodeset i915.modeset=0"));
        assert!(check(&text).is_empty());
    }

    #[test]
    fn test_generated_text_is_conformant() {
        let text = generator().generate(&layout(), &sample_entries()).unwrap();
        assert!(check(&text).is_empty(), "{:?}", check(&text));
        assert!(!text.lines().any(|l| l.trim() == "return"));
    }

    #[test]
    fn test_generate_is_idempotent() {
        let first = generator().generate(&layout(), &sample_entries()).unwrap();
        let second = generator().generate(&layout(), &sample_entries()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_timeout_option() {
        let options = BootMenuOptions {
            timeout_secs: 3,
            ..Default::default()
        };
        let text = BootConfigGenerator::new(options).generate(&layout(), &[]).unwrap();
        assert!(text.contains("set timeout=3\n"));
    }

    #[test]
    fn test_title_with_quote() {
        let entries = vec![entry("Bob's Rescue", "/isos/custom/bob.iso", Family::Generic, Some('a'), false)];
        let text = generator().generate(&layout(), &entries).unwrap();
        assert!(text.contains("'[A] Bob'\\''s Rescue'"));
    }

    #[test]
    fn test_rejects_malformed_entries() {
        let cases = vec![
            entry("", "/isos/a.iso", Family::Debian, None, false),
            entry("Line\nBreak", "/isos/a.iso", Family::Debian, None, false),
            entry("Relative", "isos/a.iso", Family::Debian, None, false),
            entry("Traversal", "/isos/../etc/a.iso", Family::Debian, None, false),
            entry("Spaces", "/isos/my image.iso", Family::Debian, None, false),
            entry("Quote", "/isos/a\".iso", Family::Debian, None, false),
            entry("Reserved", "/isos/a.iso", Family::Debian, Some('e'), false),
        ];
        for bad in cases {
            let err = generator().generate(&layout(), &[bad.clone()]).unwrap_err();
            assert!(matches!(err, BootstickError::ConfigGeneration(_)), "{:?} accepted", bad.name);
        }
    }

    #[test]
    fn test_rejects_duplicates() {
        let a = entry("A", "/isos/a.iso", Family::Debian, Some('a'), false);
        let same_path = entry("B", "/isos/a.iso", Family::Debian, Some('b'), false);
        let same_key = entry("C", "/isos/c.iso", Family::Debian, Some('a'), false);
        assert!(generator().generate(&layout(), &[a.clone(), same_path]).is_err());
        assert!(generator().generate(&layout(), &[a, same_key]).is_err());
    }

    #[test]
    fn test_rejects_unsafe_label() {
        let mut layout = layout();
        layout.data_label = "BOOT STICK".into();
        assert!(generator().generate(&layout, &[]).is_err());
    }

    fn arb_entries() -> impl Strategy<Value = Vec<BootEntry>> {
        let family = prop::sample::select(vec![
            Family::Debian,
            Family::Redhat,
            Family::Arch,
            Family::Suse,
            Family::Generic,
        ]);
        prop::collection::vec(("[A-Za-z0-9 '()!$\"-]{1,40}", "[a-z0-9_-]{1,20}", family, any::<bool>()), 0..12).prop_map(
            |specs| {
                let mut alloc = HotkeyAllocator::new(Vec::new());
                specs
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, file, family, ram_boot))| {
                        let name = if name.trim().is_empty() { format!("Image {}", i) } else { name };
                        entry(&name, &format!("/isos/{}/{}-{}.iso", family, file, i), family, alloc.next_key(), ram_boot)
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_generated_config_conformant_and_idempotent(entries in arb_entries(), safe in any::<bool>()) {
            let options = BootMenuOptions { safe_graphics_variants: safe, ..Default::default() };
            let generator = BootConfigGenerator::new(options);
            let first = generator.generate(&layout(), &entries).unwrap();
            let second = generator.generate(&layout(), &entries).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert!(check(&first).is_empty());
            prop_assert_eq!(first.matches("rmmod tpm").count(), 1);
            for entry in entries.iter().filter(|e| e.hotkey.is_some()) {
                let key = entry.hotkey.unwrap();
                let marker = format!("menuentry --hotkey={} ", key);
                prop_assert!(first.contains(&marker));
            }
        }
    }
}
