#![allow(dead_code)]

use assert_cmd::Command;
use bootstick::manifest::ManifestStore;
use bootstick::{BootEntry, EntryOrigin, Family, LayoutRecord, Manifest};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestContext {
    pub dir: TempDir,
}

impl TestContext {
    /// `bootstick` with an empty options file and logs inside the scratch dir.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_bootstick"));
        cmd.timeout(Duration::from_secs(30));
        cmd.env("BOOTSTICK_LOG_DIR", self.dir.path().join("logs"));
        cmd.env_remove("BOOTSTICK_CONFIG");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A data partition tree holding a manifest with `names` as entries.
    pub fn data_mount(&self, names: &[&str]) -> std::path::PathBuf {
        let data = self.dir.path().join("data");
        let layout = LayoutRecord {
            data_label: "BOOTSTICK".into(),
            system_boot_label: "BSEFI".into(),
            data_partition_index: 3,
            system_boot_size_bytes: 1022 << 20,
            data_start_bytes: 1 << 30,
            data_size_bytes: 14 << 30,
            sector_size: 512,
        };
        let mut manifest = Manifest::new(layout, false, "0.3.0");
        for (i, name) in names.iter().enumerate() {
            let id = name.to_ascii_lowercase().replace(' ', "-");
            let image_path = format!("/isos/{}/{}.iso", id, id);
            let file = data.join(image_path.trim_start_matches('/'));
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(&file, b"iso").unwrap();
            manifest.entries.push(BootEntry {
                name: name.to_string(),
                hotkey: Some(['a', 'b', 'd'][i % 3]),
                image_path,
                family: Family::Debian,
                size_bytes: 50 << 20,
                ram_boot: i == 0,
                persistence: None,
                origin: EntryOrigin::Custom {
                    source_path: format!("/srv/{}.iso", id),
                },
            });
        }
        ManifestStore::new(&data).save(&mut manifest).unwrap();
        data
    }
}

pub fn bootstick() -> TestContext {
    TestContext {
        dir: TempDir::new().expect("Failed to create temp dir"),
    }
}
