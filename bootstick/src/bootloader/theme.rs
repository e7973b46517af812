//! Menu theme installed under `boot/grub/themes/bootstick`.
//!
//! A user theme directory is copied as a whole so its images and fonts keep
//! their relative paths. Without one, a text-only theme is written.

use bootstick_shared::constants::data_paths;
use std::path::Path;
use walkdir::WalkDir;

/// Built-in theme. Uses only the loaded unicode font and solid colors so it
/// needs no image modules.
pub(crate) const DEFAULT_THEME: &str = r##"# bootstick menu theme
title-text: "bootstick"
title-color: "#d0d0d0"
title-font: "Unifont Regular 16"
desktop-color: "#101418"
message-color: "#a0a0a0"
message-font: "Unifont Regular 16"
terminal-font: "Unifont Regular 16"

+ boot_menu {
  left = 10%
  top = 20%
  width = 80%
  height = 60%
  item_font = "Unifont Regular 16"
  item_color = "#c8c8c8"
  selected_item_font = "Unifont Regular 16"
  selected_item_color = "#ffffff"
  item_height = 24
  item_spacing = 4
}

+ label {
  left = 10%
  top = 85%
  width = 80%
  align = "center"
  color = "#808080"
  font = "Unifont Regular 16"
  text = "Enter: boot   e: edit   c: command line"
}
"##;

/// Install the theme, replacing any previous one. Returns a reason on
/// failure; the menu falls back to the plain style at boot.
pub(crate) fn install(data_mount: &Path, custom: Option<&Path>) -> Result<(), String> {
    if let Some(source) = custom
        && !source.join("theme.txt").is_file()
    {
        return Err(format!("{} has no theme.txt", source.display()));
    }

    let target = data_mount.join(data_paths::THEME_DIR);
    if target.exists() {
        std::fs::remove_dir_all(&target).map_err(|e| format!("removing {}: {}", target.display(), e))?;
    }
    std::fs::create_dir_all(&target).map_err(|e| format!("creating {}: {}", target.display(), e))?;

    let Some(source) = custom else {
        let file = data_mount.join(data_paths::THEME_FILE);
        std::fs::write(&file, DEFAULT_THEME).map_err(|e| format!("writing {}: {}", file.display(), e))?;
        tracing::debug!(path = %file.display(), "Wrote built-in menu theme");
        return Ok(());
    };

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| format!("reading {}: {}", source.display(), e))?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination).map_err(|e| format!("creating {}: {}", destination.display(), e))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &destination)
                .map_err(|e| format!("copying {}: {}", entry.path().display(), e))?;
        }
    }
    tracing::info!(source = %source.display(), "Installed menu theme");
    Ok(())
}
