use tokio::time::Instant;

use crate::data::{ProgressSample, ProgressSnapshot};

/// Turns raw byte counters into percentage, rate and ETA.
///
/// Only the previous sample is retained, so memory stays constant however
/// long the transfer runs.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    last_loaded: u64,
    last_at: Instant,
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(at: Instant) -> Self {
        Self { last_loaded: 0, last_at: at }
    }

    pub fn on_progress(&mut self, sample: ProgressSample) -> ProgressSnapshot {
        self.on_progress_at(sample, Instant::now())
    }

    /// Same as [`on_progress`](Self::on_progress) with an explicit timestamp.
    pub fn on_progress_at(&mut self, sample: ProgressSample, now: Instant) -> ProgressSnapshot {
        let ProgressSample { loaded_bytes, total_bytes } = sample;

        let bytes_since_last = loaded_bytes.saturating_sub(self.last_loaded);
        let elapsed = now.saturating_duration_since(self.last_at).as_secs_f64();
        let transfer_rate = if elapsed > 0.0 { bytes_since_last as f64 / elapsed } else { 0.0 };

        let estimated_seconds_remaining = if transfer_rate > 0.0 {
            total_bytes.saturating_sub(loaded_bytes) as f64 / transfer_rate
        } else {
            0.0
        };

        let progress_percent = if total_bytes > 0 {
            ((loaded_bytes as f64 * 100.0) / total_bytes as f64).min(100.0)
        } else {
            0.0
        };

        self.last_loaded = loaded_bytes;
        self.last_at = now;

        ProgressSnapshot {
            loaded_bytes,
            total_bytes,
            progress_percent,
            bytes_since_last,
            transfer_rate,
            estimated_seconds_remaining,
        }
    }

    /// Re-base the previous sample to zero bytes at the current time.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rate_and_percent_from_two_samples() {
        let start = Instant::now();
        let mut monitor = ProgressMonitor::starting_at(start);

        monitor.on_progress_at(ProgressSample::new(100, 1000), start);
        let snapshot =
            monitor.on_progress_at(ProgressSample::new(300, 1000), start + Duration::from_secs(1));

        assert_eq!(snapshot.bytes_since_last, 200);
        assert_eq!(snapshot.transfer_rate, 200.0);
        assert_eq!(snapshot.progress_percent, 30.0);
        assert_eq!(snapshot.estimated_seconds_remaining, 3.5);
    }

    #[test]
    fn zero_elapsed_time_yields_zero_rate() {
        let start = Instant::now();
        let mut monitor = ProgressMonitor::starting_at(start);

        let snapshot = monitor.on_progress_at(ProgressSample::new(500, 1000), start);
        assert_eq!(snapshot.bytes_since_last, 500);
        assert_eq!(snapshot.transfer_rate, 0.0);
        assert_eq!(snapshot.estimated_seconds_remaining, 0.0);
        assert_eq!(snapshot.progress_percent, 50.0);
    }

    #[test]
    fn unknown_total() {
        let start = Instant::now();
        let mut monitor = ProgressMonitor::starting_at(start);

        let snapshot =
            monitor.on_progress_at(ProgressSample::new(4096, 0), start + Duration::from_secs(2));
        assert_eq!(snapshot.progress_percent, 0.0);
        assert_eq!(snapshot.transfer_rate, 2048.0);
        assert_eq!(snapshot.estimated_seconds_remaining, 0.0);
        assert_eq!(snapshot.percentage(), None);
    }

    #[test]
    fn counter_going_backwards_does_not_underflow() {
        let start = Instant::now();
        let mut monitor = ProgressMonitor::starting_at(start);

        monitor.on_progress_at(ProgressSample::new(800, 1000), start + Duration::from_secs(1));
        let snapshot =
            monitor.on_progress_at(ProgressSample::new(100, 1000), start + Duration::from_secs(2));
        assert_eq!(snapshot.bytes_since_last, 0);
        assert_eq!(snapshot.transfer_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_rebases_to_now() {
        let mut monitor = ProgressMonitor::new();
        monitor.on_progress(ProgressSample::new(900, 1000));

        tokio::time::advance(Duration::from_secs(10)).await;
        monitor.reset();
        tokio::time::advance(Duration::from_secs(1)).await;

        let snapshot = monitor.on_progress(ProgressSample::new(100, 1000));
        assert_eq!(snapshot.bytes_since_last, 100);
        assert_eq!(snapshot.transfer_rate, 100.0);
    }
}
