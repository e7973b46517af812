//! Script preamble: modules, TPM workaround, graphics, theme, data partition search.

use super::script::ScriptWriter;
use super::{DATA_VAR, FONT_VAR, PAUSE, THEME_VAR};
use crate::options::BootMenuOptions;
use bootstick_shared::manifest::LayoutRecord;

/// Modules loaded up front, in load order.
const MODULES: &[&str] = &[
    "part_gpt",
    "part_msdos",
    "fat",
    "ext2",
    "iso9660",
    "udf",
    "loopback",
    "linux",
    "probe",
    "search",
    "search_label",
    "search_fs_file",
    "regexp",
    "test",
    "echo",
    "ls",
    "sleep",
    "all_video",
    "gfxterm",
    "font",
];

/// Disks the data partition is hinted on before the unhinted search.
const SEARCH_HINT_DISKS: &[&str] = &["hd0", "hd1"];

pub(crate) fn render(w: &mut ScriptWriter, layout: &LayoutRecord, options: &BootMenuOptions, entry_count: usize) {
    w.comment("bootstick boot menu");
    w.comment("Generated from the device manifest. Regenerated whenever the image set changes.");
    w.comment(format!("Images: {}", entry_count));
    w.blank();

    for module in MODULES {
        w.line(format!("insmod {}", module));
    }
    // linux16 only exists on the BIOS platform
    w.open_if("[ \"${grub_platform}\" = \"pc\" ]");
    w.line("insmod linux16");
    w.close_if();
    w.blank();

    w.comment("The TPM verifier hangs loopback mounts on some firmware, disable it before any loopback use.");
    w.line("rmmod tpm");
    w.blank();

    render_graphics(w);
    w.blank();

    w.line(format!("set timeout={}", options.timeout_secs));
    w.line("set timeout_style=menu");
    w.line("set default=0");
    w.line("set menu_color_normal=white/black");
    w.line("set menu_color_highlight=black/light-gray");
    if options.theme {
        render_theme(w);
    }
    w.blank();

    render_locate(w, layout);
    w.blank();
}

fn render_graphics(w: &mut ScriptWriter) {
    w.line(format!("set {}=\"${{prefix}}/fonts/unicode.pf2\"", FONT_VAR));
    w.line("set gfxmode=auto");
    w.line("set gfxpayload=keep");
    w.open_if(format!("[ -f \"${{{}}}\" ]", FONT_VAR));
    w.open_if(format!("loadfont \"${{{}}}\"", FONT_VAR));
    w.line("terminal_output gfxterm");
    w.else_branch();
    w.line(format!("echo \"bootstick: font ${{{}}} failed to load, using text console\"", FONT_VAR));
    w.line("terminal_output console");
    w.close_if();
    w.else_branch();
    w.line(format!("echo \"bootstick: font ${{{}}} not found, using text console\"", FONT_VAR));
    w.line("terminal_output console");
    w.close_if();
}

/// Theme is only set when its file exists; a missing theme keeps the plain menu.
fn render_theme(w: &mut ScriptWriter) {
    w.line(format!("set {}=\"${{prefix}}/themes/bootstick/theme.txt\"", THEME_VAR));
    w.open_if(format!("[ -f \"${{{}}}\" ]", THEME_VAR));
    w.line(format!("set theme=\"${{{}}}\"", THEME_VAR));
    w.line("export theme");
    w.else_branch();
    w.line(format!("echo \"bootstick: theme ${{{}}} not found, using plain menu\"", THEME_VAR));
    w.close_if();
}

fn render_locate(w: &mut ScriptWriter, layout: &LayoutRecord) {
    let label = &layout.data_label;
    let search = format!("search --no-floppy --set={} --label {}", DATA_VAR, label);
    let unset = format!("[ -z \"${{{}}}\" ]", DATA_VAR);

    w.line(format!("set {}=\"\"", DATA_VAR));
    for (i, disk) in SEARCH_HINT_DISKS.iter().enumerate() {
        let hinted = format!("{} --hint {},gpt{}", search, disk, layout.data_partition_index);
        if i == 0 {
            w.line(hinted);
        } else {
            w.open_if(&unset);
            w.line(hinted);
            w.close_if();
        }
    }
    w.open_if(&unset);
    w.line(&search);
    w.close_if();

    w.open_if(format!("[ -n \"${{{}}}\" ]", DATA_VAR));
    w.line(format!("set root=\"${{{}}}\"", DATA_VAR));
    w.else_branch();
    w.line(format!("echo \"bootstick: no partition labelled {} was found\"", label));
    w.line(PAUSE);
    w.close_if();
    w.line(format!("export {}", DATA_VAR));
}
