use std::fmt;

/// Which half of the exchange a progress report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Raw byte counters reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSample {
    pub loaded_bytes: u64,

    /// Expected size; 0 when the transport does not know it.
    pub total_bytes: u64,
}

impl ProgressSample {
    pub fn new(loaded_bytes: u64, total_bytes: u64) -> Self {
        Self { loaded_bytes, total_bytes }
    }
}

/// Derived transfer metrics produced by the
/// [`ProgressMonitor`](crate::ProgressMonitor).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressSnapshot {
    pub loaded_bytes: u64,
    pub total_bytes: u64,

    /// 0..=100; 0 when the total is unknown.
    pub progress_percent: f64,

    pub bytes_since_last: u64,

    /// Bytes per second since the previous sample.
    pub transfer_rate: f64,

    pub estimated_seconds_remaining: f64,
}

impl ProgressSnapshot {
    /// Completion percentage, or `None` when the total is unknown.
    #[must_use]
    pub fn percentage(&self) -> Option<f64> {
        (self.total_bytes > 0).then_some(self.progress_percent)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.loaded_bytes >= self.total_bytes
    }

    /// Transfer rate formatted as a human-readable string.
    pub fn rate_string(&self) -> String {
        let rate = self.transfer_rate;
        if rate >= 1_000_000.0 {
            format!("{:.1} MB/s", rate / 1_000_000.0)
        } else if rate >= 1000.0 {
            format!("{:.1} kB/s", rate / 1000.0)
        } else {
            format!("{:.0} B/s", rate)
        }
    }

    /// Estimated time remaining formatted as a human-readable string.
    pub fn eta_string(&self) -> String {
        let eta = self.estimated_seconds_remaining.ceil() as u64;
        if eta >= 3600 {
            format!("{}h {}m", eta / 3600, (eta % 3600) / 60)
        } else if eta >= 60 {
            format!("{}m {}s", eta / 60, eta % 60)
        } else {
            format!("{}s", eta)
        }
    }
}
