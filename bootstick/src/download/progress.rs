use std::time::{Duration, Instant};

/// Snapshot of a running transfer, handed to the progress callback.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Bytes present in the partial file, including resumed bytes.
    pub bytes_done: u64,
    pub total_bytes: Option<u64>,
    /// Average rate of this session, in bytes per second.
    pub bytes_per_sec: f64,
    pub eta: Option<Duration>,
    /// Source currently being read.
    pub source: String,
    pub paused: bool,
}

impl DownloadProgress {
    /// Completion in `0.0..=1.0`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_done as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Rate bookkeeping and callback throttling for one transfer session.
pub(crate) struct ProgressTracker {
    source: String,
    started: Instant,
    start_offset: u64,
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressTracker {
    pub fn new(source: &str, start_offset: u64, interval: Duration) -> Self {
        Self {
            source: source.to_string(),
            started: Instant::now(),
            start_offset,
            interval,
            last_emit: None,
        }
    }

    pub fn snapshot(&self, bytes_done: u64, total_bytes: Option<u64>, paused: bool) -> DownloadProgress {
        let elapsed = self.started.elapsed().as_secs_f64();
        let session_bytes = bytes_done.saturating_sub(self.start_offset);
        let bytes_per_sec = if elapsed > 0.0 { session_bytes as f64 / elapsed } else { 0.0 };
        let eta = match total_bytes {
            Some(total) if bytes_per_sec > 0.0 => {
                Some(Duration::from_secs_f64(total.saturating_sub(bytes_done) as f64 / bytes_per_sec))
            }
            _ => None,
        };
        DownloadProgress {
            bytes_done,
            total_bytes,
            bytes_per_sec,
            eta,
            source: self.source.clone(),
            paused,
        }
    }

    /// Snapshot if the throttle interval has elapsed since the last one.
    pub fn tick(&mut self, bytes_done: u64, total_bytes: Option<u64>) -> Option<DownloadProgress> {
        let now = Instant::now();
        if let Some(last) = self.last_emit
            && now.duration_since(last) < self.interval
        {
            return None;
        }
        self.last_emit = Some(now);
        Some(self.snapshot(bytes_done, total_bytes, false))
    }
}
