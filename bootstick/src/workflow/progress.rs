//! Overall progress scale.
//!
//! Each stage owns a fixed slice of 0-100. Downloads split their slice
//! evenly between selections. Reported percentages never decrease, even
//! when a stage is skipped or a transfer restarts.

use bootstick_shared::progress::{ProgressEvent, Stage};
use parking_lot::Mutex;
use std::sync::Arc;

/// Receives workflow progress. Called from the workflow task.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

fn range(stage: Stage) -> (f64, f64) {
    match stage {
        Stage::Partition => (0.0, 12.0),
        Stage::Mount => (12.0, 15.0),
        Stage::InstallBootloader => (15.0, 25.0),
        Stage::Download => (25.0, 85.0),
        Stage::GenerateConfig => (85.0, 92.0),
        Stage::PersistManifest => (92.0, 95.0),
        Stage::Unmount => (95.0, 100.0),
    }
}

pub(crate) struct ProgressReporter {
    sink: Option<ProgressCallback>,
    downloads: usize,
    last: Mutex<f64>,
}

impl ProgressReporter {
    pub fn new(sink: Option<ProgressCallback>, downloads: usize) -> Self {
        Self {
            sink,
            downloads,
            last: Mutex::new(0.0),
        }
    }

    /// Mark the start of `stage`.
    pub fn enter(&self, stage: Stage, detail: impl Into<String>) {
        tracing::info!(stage = %stage, "Stage started");
        self.emit(stage, range(stage).0, detail.into());
    }

    /// Report `fraction` of `stage` done.
    pub fn within(&self, stage: Stage, fraction: f64, detail: impl Into<String>) {
        let (start, end) = range(stage);
        self.emit(stage, start + (end - start) * fraction.clamp(0.0, 1.0), detail.into());
    }

    /// Report `fraction` of download `index` done.
    pub fn download(&self, index: usize, fraction: f64, detail: impl Into<String>) {
        if self.downloads == 0 {
            return;
        }
        let share = 1.0 / self.downloads as f64;
        let overall = (index as f64 + fraction.clamp(0.0, 1.0)) * share;
        self.within(Stage::Download, overall, detail);
    }

    pub fn finish(&self) {
        self.emit(Stage::Unmount, 100.0, "Done".to_string());
    }

    fn emit(&self, stage: Stage, percent: f64, detail: String) {
        let percent = {
            let mut last = self.last.lock();
            let percent = percent.clamp(*last, 100.0);
            *last = percent;
            percent
        };
        if let Some(sink) = &self.sink {
            sink(&ProgressEvent::new(stage, percent, detail));
        }
    }
}
