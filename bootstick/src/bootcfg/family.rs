//! Boot strategies per distribution family.
//!
//! Each family lists the on-image boot layouts it may use, probed in order
//! at boot time. Adding a family means adding a row to [`STRATEGIES`]; the
//! entry renderer only walks the table.
//!
//! Kernel parameter templates understand three placeholders:
//! - `{iso}`: image path on the data partition (`${isofile}` at boot)
//! - `{iso_label}`: volume label of the image (`${iso_label}` at boot)
//! - `{data_label}`: label of the data partition
//! - `{persist}`: persistence overlay file on the data partition
//! - `{persist_dir}`: directory holding that file

use bootstick_shared::manifest::Family;

/// One way an installer image can be booted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BootPath {
    /// The image ships a loopback-aware GRUB config.
    LoopbackConfig { config: &'static str },
    /// Boot a kernel/initrd pair from the mounted image.
    Kernel {
        kernel: &'static str,
        initrd: &'static str,
        params: &'static str,
    },
}

impl BootPath {
    /// Files that must exist inside the image for this path to apply.
    pub fn probe_files(&self) -> Vec<&'static str> {
        match self {
            BootPath::LoopbackConfig { config } => vec![*config],
            BootPath::Kernel { kernel, initrd, .. } => vec![*kernel, *initrd],
        }
    }

    pub fn uses_iso_label(&self) -> bool {
        matches!(self, BootPath::Kernel { params, .. } if params.contains("{iso_label}"))
    }
}

/// How a family's live system finds a persistence overlay file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Persistence {
    /// Overlay file name the live system looks for.
    pub file_name: &'static str,
    /// Volume label of the ext4 file system inside the overlay.
    pub label: &'static str,
    /// Kernel parameters appended to every kernel path.
    pub params: &'static str,
}

#[derive(Debug)]
pub(crate) struct FamilyStrategy {
    pub family: Family,
    pub paths: &'static [BootPath],
    /// `None` when the family cannot keep its overlay in a file.
    pub persistence: Option<Persistence>,
}

impl FamilyStrategy {
    pub fn uses_iso_label(&self) -> bool {
        self.paths.iter().any(BootPath::uses_iso_label)
    }
}

// ============================================================================
// Layouts
// ============================================================================

const LOOPBACK_CFG: BootPath = BootPath::LoopbackConfig {
    config: "/boot/grub/loopback.cfg",
};

const CASPER: BootPath = BootPath::Kernel {
    kernel: "/casper/vmlinuz",
    initrd: "/casper/initrd",
    params: "boot=casper iso-scan/filename={iso} quiet splash",
};

const CASPER_LZ: BootPath = BootPath::Kernel {
    kernel: "/casper/vmlinuz",
    initrd: "/casper/initrd.lz",
    params: "boot=casper iso-scan/filename={iso} quiet splash",
};

const DEBIAN_LIVE: BootPath = BootPath::Kernel {
    kernel: "/live/vmlinuz",
    initrd: "/live/initrd.img",
    params: "boot=live findiso={iso} components quiet splash",
};

const REDHAT_PXEBOOT: BootPath = BootPath::Kernel {
    kernel: "/images/pxeboot/vmlinuz",
    initrd: "/images/pxeboot/initrd.img",
    params: "iso-scan/filename={iso} root=live:CDLABEL={iso_label} rd.live.image quiet",
};

const REDHAT_ISOLINUX: BootPath = BootPath::Kernel {
    kernel: "/isolinux/vmlinuz",
    initrd: "/isolinux/initrd.img",
    params: "iso-scan/filename={iso} root=live:CDLABEL={iso_label} rd.live.image quiet",
};

const ARCH: BootPath = BootPath::Kernel {
    kernel: "/arch/boot/x86_64/vmlinuz-linux",
    initrd: "/arch/boot/x86_64/initramfs-linux.img",
    params: "archisobasedir=arch img_dev=/dev/disk/by-label/{data_label} img_loop={iso} earlymodules=loop",
};

const SUSE: BootPath = BootPath::Kernel {
    kernel: "/boot/x86_64/loader/linux",
    initrd: "/boot/x86_64/loader/initrd",
    params: "isofrom_device=/dev/disk/by-label/{data_label} isofrom_system={iso} splash=silent",
};

const CASPER_PERSISTENCE: Persistence = Persistence {
    file_name: "casper-rw",
    label: "casper-rw",
    params: "persistent persistent-path={persist_dir}",
};

const DRACUT_PERSISTENCE: Persistence = Persistence {
    file_name: "overlay.img",
    label: "overlay",
    params: "rd.live.overlay=LABEL={data_label}:{persist} rd.live.overlay.overlayfs=1",
};

/// Strategy table. [`Family::Generic`] probes every known layout.
pub(crate) static STRATEGIES: &[FamilyStrategy] = &[
    FamilyStrategy {
        family: Family::Debian,
        paths: &[LOOPBACK_CFG, CASPER, CASPER_LZ, DEBIAN_LIVE],
        persistence: Some(CASPER_PERSISTENCE),
    },
    FamilyStrategy {
        family: Family::Redhat,
        paths: &[REDHAT_PXEBOOT, REDHAT_ISOLINUX],
        persistence: Some(DRACUT_PERSISTENCE),
    },
    FamilyStrategy {
        family: Family::Arch,
        paths: &[ARCH],
        persistence: None,
    },
    FamilyStrategy {
        family: Family::Suse,
        paths: &[SUSE],
        persistence: None,
    },
    FamilyStrategy {
        family: Family::Generic,
        paths: &[
            LOOPBACK_CFG,
            CASPER,
            CASPER_LZ,
            DEBIAN_LIVE,
            REDHAT_PXEBOOT,
            REDHAT_ISOLINUX,
            ARCH,
            SUSE,
        ],
        persistence: None,
    },
];

/// Strategy for `family`, falling back to the generic row.
pub(crate) fn strategy_for(family: Family) -> &'static FamilyStrategy {
    STRATEGIES
        .iter()
        .find(|s| s.family == family)
        .or_else(|| STRATEGIES.iter().find(|s| s.family == Family::Generic))
        .unwrap_or(&STRATEGIES[STRATEGIES.len() - 1])
}

/// Expand a parameter template for boot-time evaluation.
pub(crate) fn expand_params(template: &str, data_label: &str) -> String {
    template
        .replace("{iso}", "${isofile}")
        .replace("{iso_label}", "${iso_label}")
        .replace("{data_label}", data_label)
}

/// Expand the persistence parameters for an overlay stored at `file`.
pub(crate) fn persistence_params(persistence: &Persistence, file: &str, data_label: &str) -> String {
    let dir = match file.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &file[..idx],
    };
    persistence
        .params
        .replace("{persist_dir}", dir)
        .replace("{persist}", file)
        .replace("{data_label}", data_label)
}
