use kestrel_core::info;
use std::time::{Duration, Instant};

/// Minimum number of items to report
const REPORT_BATCH_GRANULARITY: usize = 500;
/// Maximum time to go without report
const REPORT_TIME_GRANULARITY: Duration = Duration::from_secs(2);

/// Logs the progress of an IBD stage in percents of the DAA score range being synced
pub struct ProgressReporter {
    low_daa_score: u64,
    high_daa_score: u64,
    object_name: &'static str,
    last_reported_percent: i32,
    last_log_time: Instant,
    current_batch: usize,
    processed: usize,
}

impl ProgressReporter {
    pub fn new(low_daa_score: u64, mut high_daa_score: u64, object_name: &'static str) -> Self {
        if high_daa_score <= low_daa_score {
            // Avoid a zero or negative diff
            high_daa_score = low_daa_score + 1;
        }
        Self {
            low_daa_score,
            high_daa_score,
            object_name,
            last_reported_percent: 0,
            last_log_time: Instant::now(),
            current_batch: 0,
            processed: 0,
        }
    }

    pub fn report(&mut self, processed_delta: usize, current_daa_score: u64) {
        self.current_batch += processed_delta;
        let now = Instant::now();
        if now - self.last_log_time < REPORT_TIME_GRANULARITY && self.current_batch < REPORT_BATCH_GRANULARITY && self.processed > 0 {
            return;
        }
        self.processed += self.current_batch;
        self.current_batch = 0;
        if current_daa_score > self.high_daa_score {
            self.high_daa_score = current_daa_score + 1; // + 1 for keeping it at 99%
        }
        let percent = self.percent(current_daa_score);
        if percent > self.last_reported_percent {
            info!("IBD: Processed {} {} ({}%) last DAA score: {}", self.processed, self.object_name, percent, current_daa_score);
            self.last_reported_percent = percent;
        }
        self.last_log_time = now;
    }

    pub fn report_completion(mut self, processed_delta: usize) {
        self.processed += self.current_batch + processed_delta;
        info!("IBD: Processed {} {} (100%)", self.processed, self.object_name);
    }

    fn percent(&self, current_daa_score: u64) -> i32 {
        let relative_daa_score = current_daa_score.saturating_sub(self.low_daa_score);
        ((relative_daa_score as f64 / (self.high_daa_score - self.low_daa_score) as f64) * 100.0) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        let mut reporter = ProgressReporter::new(100, 200, "blocks");
        assert_eq!(reporter.percent(150), 50);
        assert_eq!(reporter.percent(50), 0);

        // A score beyond the announced high end keeps the progress below 100%
        reporter.report(10, 300);
        assert_eq!(reporter.high_daa_score, 301);
        assert_eq!(reporter.last_reported_percent, 99);
        assert_eq!(reporter.processed, 10);

        let degenerate = ProgressReporter::new(7, 7, "headers");
        assert_eq!(degenerate.high_daa_score, 8);
    }
}
