//! Menu entries.
//!
//! Every entry checks, in order, that the data partition was found and that
//! the image exists before touching it, and prints a diagnostic with a
//! directory listing instead of failing silently. There are no early
//! returns: the checks form one `if/elif/else` chain.
//!
//! Entries with a persistence file boot through kernel paths only, since a
//! chained image config cannot take extra kernel parameters. A missing
//! overlay file is reported but does not stop the boot.

use super::family::{BootPath, FamilyStrategy, expand_params, persistence_params, strategy_for};
use super::script::{ScriptWriter, double_quote_literal, single_quote};
use super::{DATA_VAR, PAUSE};
use crate::options::BootMenuOptions;
use bootstick_shared::constants::data_paths;
use bootstick_shared::manifest::{BootEntry, LayoutRecord};

/// Kernel parameters appended by the safe-graphics variant.
const SAFE_GRAPHICS_PARAMS: &str = "nomodeset i915.modeset=0 nouveau.modeset=0 radeon.modeset=0 amdgpu.modeset=0";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Variant {
    Normal,
    SafeGraphics,
}

pub(crate) fn render(w: &mut ScriptWriter, entry: &BootEntry, layout: &LayoutRecord, options: &BootMenuOptions) {
    let strategy = strategy_for(entry.family);

    render_loopback_item(w, entry, layout, strategy, Variant::Normal);
    if options.safe_graphics_variants {
        render_loopback_item(w, entry, layout, strategy, Variant::SafeGraphics);
    }
    if entry.ram_boot {
        render_ram_item(w, entry, layout);
    }
}

fn header(entry: &BootEntry, title: &str, hotkey: Option<char>) -> String {
    let mut header = String::from("menuentry");
    if let Some(key) = hotkey {
        header.push_str(&format!(" --hotkey={}", key));
    }
    header.push_str(&format!(" --class {}", entry.family));
    header.push(' ');
    header.push_str(&single_quote(title));
    header
}

fn main_title(entry: &BootEntry) -> String {
    match entry.hotkey {
        Some(key) => format!("[{}] {}", key.to_ascii_uppercase(), entry.name),
        None => entry.name.clone(),
    }
}

fn image_dir(entry: &BootEntry) -> &str {
    match entry.image_path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &entry.image_path[..idx],
    }
}

/// Opening checks shared by every variant. Leaves the writer inside the
/// final `else` branch; the caller renders the boot commands and closes.
fn open_checks(w: &mut ScriptWriter, entry: &BootEntry, layout: &LayoutRecord, extra: &[(String, Vec<String>)]) {
    w.line(format!("set isofile={}", double_quote_literal(&entry.image_path)));

    w.open_if(format!("[ -z \"${{{}}}\" ]", DATA_VAR));
    w.line(format!(
        "echo \"bootstick: data partition {} was not found, cannot boot this entry\"",
        layout.data_label
    ));
    w.line(PAUSE);

    for (condition, messages) in extra {
        w.elif(condition);
        for message in messages {
            w.line(message);
        }
        w.line(PAUSE);
    }

    let dir = image_dir(entry);
    w.elif(format!("[ ! -f \"(${{{}}})${{isofile}}\" ]", DATA_VAR));
    w.line("echo \"bootstick: image ${isofile} not found\"");
    w.line(format!("echo \"bootstick: contents of {}:\"", dir));
    let listing = if dir == "/" {
        format!("ls \"(${{{}}})/\"", DATA_VAR)
    } else {
        format!("ls \"(${{{}}}){}/\"", DATA_VAR, dir)
    };
    w.line(listing);
    w.line(PAUSE);

    w.else_branch();
}

fn render_loopback_item(
    w: &mut ScriptWriter,
    entry: &BootEntry,
    layout: &LayoutRecord,
    strategy: &FamilyStrategy,
    variant: Variant,
) {
    let (title, hotkey) = match variant {
        Variant::Normal => (main_title(entry), entry.hotkey),
        Variant::SafeGraphics => (format!("{} (safe graphics)", entry.name), None),
    };

    w.open_brace(header(entry, &title, hotkey));
    open_checks(w, entry, layout, &[]);

    w.open_if("[ -d (loop)/ ]");
    w.line("loopback -d loop");
    w.close_if();
    w.line(format!("loopback loop \"(${{{}}})${{isofile}}\"", DATA_VAR));
    if strategy.uses_iso_label() {
        w.line("probe --set=iso_label --label (loop)");
    }
    if let Some(overlay) = &entry.persistence {
        w.open_if(format!("[ ! -f \"(${{{}}}){}\" ]", DATA_VAR, overlay));
        w.line(format!(
            "echo \"bootstick: persistence file {} not found, changes will not be kept\"",
            overlay
        ));
        w.close_if();
    }
    render_dispatch(w, entry, strategy, layout, variant);

    w.close_if();
    w.close_brace();
    w.blank();
}

fn render_dispatch(
    w: &mut ScriptWriter,
    entry: &BootEntry,
    strategy: &FamilyStrategy,
    layout: &LayoutRecord,
    variant: Variant,
) {
    let persist = entry
        .persistence
        .as_deref()
        .zip(strategy.persistence)
        .map(|(file, persistence)| persistence_params(&persistence, file, &layout.data_label));
    let paths = strategy
        .paths
        .iter()
        .filter(|p| persist.is_none() || matches!(p, BootPath::Kernel { .. }));

    for (i, path) in paths.enumerate() {
        let condition = path
            .probe_files()
            .iter()
            .map(|f| format!("-f (loop){}", f))
            .collect::<Vec<_>>()
            .join(" -a ");
        let condition = format!("[ {} ]", condition);
        if i == 0 {
            w.open_if(condition);
        } else {
            w.elif(condition);
        }

        match path {
            BootPath::LoopbackConfig { config } => {
                w.line("set iso_path=\"${isofile}\"");
                w.line("export iso_path");
                w.line(format!("configfile (loop){}", config));
            }
            BootPath::Kernel { kernel, initrd, params } => {
                let mut params = expand_params(params, &layout.data_label);
                if let Some(extra) = &persist {
                    params.push(' ');
                    params.push_str(extra);
                }
                if variant == Variant::SafeGraphics {
                    params.push(' ');
                    params.push_str(SAFE_GRAPHICS_PARAMS);
                }
                w.line(format!("linux (loop){} {}", kernel, params));
                w.line(format!("initrd (loop){}", initrd));
            }
        }
    }

    w.else_branch();
    w.line(format!(
        "echo \"bootstick: no known {} boot layout found in ${{isofile}}\"",
        strategy.family
    ));
    w.line("echo \"bootstick: image root contains:\"");
    w.line("ls (loop)/");
    w.line(PAUSE);
    w.close_if();
}

/// Whole-image RAM boot through memdisk (BIOS only).
fn render_ram_item(w: &mut ScriptWriter, entry: &BootEntry, layout: &LayoutRecord) {
    let title = format!("{} (load into RAM)", entry.name);
    w.open_brace(header(entry, &title, None));

    let memdisk = format!("(${{{}}})/{}", DATA_VAR, data_paths::MEMDISK);
    let extra = vec![
        (
            "[ \"${grub_platform}\" != \"pc\" ]".to_string(),
            vec!["echo \"bootstick: RAM boot needs legacy BIOS firmware, this is ${grub_platform}\"".to_string()],
        ),
        (
            format!("[ ! -f \"{}\" ]", memdisk),
            vec![format!(
                "echo \"bootstick: /{} is missing, RAM boot unavailable\"",
                data_paths::MEMDISK
            )],
        ),
    ];
    open_checks(w, entry, layout, &extra);

    w.line(format!("linux16 \"{}\" iso raw", memdisk));
    w.line(format!("initrd16 \"(${{{}}})${{isofile}}\"", DATA_VAR));

    w.close_if();
    w.close_brace();
    w.blank();
}

/// Reboot, power off and firmware setup entries closing the menu.
pub(crate) fn render_power_entries(w: &mut ScriptWriter) {
    w.open_brace("menuentry --class reboot 'Reboot'");
    w.line("reboot");
    w.close_brace();
    w.blank();

    w.open_brace("menuentry --class shutdown 'Power off'");
    w.line("halt");
    w.close_brace();
    w.blank();

    w.open_if("[ \"${grub_platform}\" = \"efi\" ]");
    w.open_brace("menuentry --class settings 'UEFI firmware settings'");
    w.line("fwsetup");
    w.close_brace();
    w.close_if();
}
