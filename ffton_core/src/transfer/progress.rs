/// Cumulative byte counter with an observability-only watermark
///
/// The watermark moves to the actual cumulative count each time the counter
/// has advanced past it by more than the interval, so chunk-size variance
/// never makes it drift.
#[derive(Debug, Clone)]
pub struct ProgressCheckpoint {
    interval: u64,
    last: u64,
    total: u64,
}

impl ProgressCheckpoint {
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            last: 0,
            total: 0,
        }
    }

    /// Count `bytes` more; returns the new total when a checkpoint is crossed
    pub fn advance(&mut self, bytes: u64) -> Option<u64> {
        self.total += bytes;
        if self.total > self.last.saturating_add(self.interval) {
            self.last = self.total;
            Some(self.total)
        } else {
            None
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Whole-percent progress, 100 for empty files
pub fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        return 100;
    }
    (u128::from(done) * 100 / u128::from(total)) as u64
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "n/a".to_string();
    }

    let speed_bps = bytes_transferred as f64 / elapsed_secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_requires_strictly_more_than_interval() {
        let mut checkpoint = ProgressCheckpoint::new(16);
        assert_eq!(checkpoint.advance(16), None);
        assert_eq!(checkpoint.advance(1), Some(17));
        assert_eq!(checkpoint.total(), 17);
    }

    #[test]
    fn test_checkpoint_moves_to_actual_total() {
        let mut checkpoint = ProgressCheckpoint::new(10);
        assert_eq!(checkpoint.advance(25), Some(25));
        // Next report only once the total passes 35, not 30
        assert_eq!(checkpoint.advance(10), None);
        assert_eq!(checkpoint.advance(1), Some(36));
    }

    #[test]
    fn test_checkpoint_is_monotonic() {
        let mut checkpoint = ProgressCheckpoint::new(3);
        let reports: Vec<u64> = (0..20).filter_map(|_| checkpoint.advance(2)).collect();
        assert!(reports.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(reports, vec![4, 8, 12, 16, 20, 24, 28, 32, 36, 40]);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(50, 200), 25);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
    }

    #[test]
    fn test_format_transfer_speed() {
        assert_eq!(format_transfer_speed(100, 0.0), "n/a");
        assert_eq!(format_transfer_speed(500, 1.0), "500 B/s");
        assert_eq!(format_transfer_speed(2_500, 1.0), "2.5 KB/s");
        assert_eq!(format_transfer_speed(3_000_000, 1.0), "3.00 MB/s");
    }
}
