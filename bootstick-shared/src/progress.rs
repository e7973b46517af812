//! Workflow stages and the progress events emitted to front ends.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provisioning stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Partition,
    Mount,
    InstallBootloader,
    Download,
    GenerateConfig,
    PersistManifest,
    Unmount,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Partition,
        Stage::Mount,
        Stage::InstallBootloader,
        Stage::Download,
        Stage::GenerateConfig,
        Stage::PersistManifest,
        Stage::Unmount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Partition => "partition",
            Stage::Mount => "mount",
            Stage::InstallBootloader => "install-bootloader",
            Stage::Download => "download",
            Stage::GenerateConfig => "generate-config",
            Stage::PersistManifest => "persist-manifest",
            Stage::Unmount => "unmount",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress report.
///
/// `percent` is on the overall 0-100 scale and never decreases within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub percent: f64,
    pub detail: String,
}

impl ProgressEvent {
    pub fn new(stage: Stage, percent: f64, detail: impl Into<String>) -> Self {
        Self {
            stage,
            percent,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_execution() {
        let mut sorted = Stage::ALL;
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
    }

    #[test]
    fn test_stage_serde_name() {
        let json = serde_json::to_string(&Stage::InstallBootloader).unwrap();
        assert_eq!(json, "\"install-bootloader\"");
        assert_eq!(Stage::GenerateConfig.to_string(), "generate-config");
    }
}
