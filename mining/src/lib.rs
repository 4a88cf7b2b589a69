use std::sync::atomic::{AtomicU64, Ordering};

use mempool::tx::Priority;

mod block_template;
pub(crate) mod cache;
pub mod errors;
pub mod manager;
#[cfg(test)]
mod manager_tests;
pub mod mempool;
pub mod model;

#[cfg(test)]
pub(crate) mod testutils;

#[derive(Default)]
pub struct MiningCounters {
    pub high_priority_tx_counts: AtomicU64,
    pub low_priority_tx_counts: AtomicU64,
    pub block_tx_counts: AtomicU64,
    pub tx_accepted_counts: AtomicU64,
    pub tx_rejected_counts: AtomicU64,
    pub rate_limited_counts: AtomicU64,
    pub input_counts: AtomicU64,
    pub output_counts: AtomicU64,
}

impl MiningCounters {
    pub fn snapshot(&self) -> MempoolCountersSnapshot {
        MempoolCountersSnapshot {
            high_priority_tx_counts: self.high_priority_tx_counts.load(Ordering::Relaxed),
            low_priority_tx_counts: self.low_priority_tx_counts.load(Ordering::Relaxed),
            block_tx_counts: self.block_tx_counts.load(Ordering::Relaxed),
            tx_accepted_counts: self.tx_accepted_counts.load(Ordering::Relaxed),
            tx_rejected_counts: self.tx_rejected_counts.load(Ordering::Relaxed),
            rate_limited_counts: self.rate_limited_counts.load(Ordering::Relaxed),
            input_counts: self.input_counts.load(Ordering::Relaxed),
            output_counts: self.output_counts.load(Ordering::Relaxed),
        }
    }

    pub fn increase_tx_counts(&self, value: u64, priority: Priority) {
        match priority {
            Priority::Low => {
                self.low_priority_tx_counts.fetch_add(value, Ordering::Relaxed);
            }
            Priority::High => {
                self.high_priority_tx_counts.fetch_add(value, Ordering::Relaxed);
            }
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MempoolCountersSnapshot {
    pub high_priority_tx_counts: u64,
    pub low_priority_tx_counts: u64,
    pub block_tx_counts: u64,
    pub tx_accepted_counts: u64,
    pub tx_rejected_counts: u64,
    pub rate_limited_counts: u64,
    pub input_counts: u64,
    pub output_counts: u64,
}

impl MempoolCountersSnapshot {
    pub fn in_tx_counts(&self) -> u64 {
        self.high_priority_tx_counts + self.low_priority_tx_counts
    }
}

impl core::ops::Sub for &MempoolCountersSnapshot {
    type Output = MempoolCountersSnapshot;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::Output {
            high_priority_tx_counts: self.high_priority_tx_counts.saturating_sub(rhs.high_priority_tx_counts),
            low_priority_tx_counts: self.low_priority_tx_counts.saturating_sub(rhs.low_priority_tx_counts),
            block_tx_counts: self.block_tx_counts.saturating_sub(rhs.block_tx_counts),
            tx_accepted_counts: self.tx_accepted_counts.saturating_sub(rhs.tx_accepted_counts),
            tx_rejected_counts: self.tx_rejected_counts.saturating_sub(rhs.tx_rejected_counts),
            rate_limited_counts: self.rate_limited_counts.saturating_sub(rhs.rate_limited_counts),
            input_counts: self.input_counts.saturating_sub(rhs.input_counts),
            output_counts: self.output_counts.saturating_sub(rhs.output_counts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot_delta() {
        let counters = MiningCounters::default();
        counters.increase_tx_counts(3, Priority::Low);
        counters.increase_tx_counts(1, Priority::High);
        let first = counters.snapshot();
        assert_eq!(first.in_tx_counts(), 4);

        counters.increase_tx_counts(2, Priority::Low);
        counters.tx_accepted_counts.fetch_add(5, Ordering::Relaxed);
        let delta = &counters.snapshot() - &first;
        assert_eq!(delta.low_priority_tx_counts, 2);
        assert_eq!(delta.high_priority_tx_counts, 0);
        assert_eq!(delta.tx_accepted_counts, 5);
        assert_eq!(&first - &counters.snapshot(), MempoolCountersSnapshot::default());
    }
}
