pub mod body_processor;
pub mod header_processor;
pub mod monitor;
pub mod pruning_processor;
pub mod virtual_processor;

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! processing_counters {
    ($($(#[$doc:meta])* $field:ident),+ $(,)?) => {
        /// Monotonic counters bumped by the processors and sampled by [`monitor::ConsensusMonitor`]
        #[derive(Default)]
        pub struct ProcessingCounters {
            $($(#[$doc])* pub $field: AtomicU64,)+
        }

        impl ProcessingCounters {
            pub fn snapshot(&self) -> ProcessingCountersSnapshot {
                ProcessingCountersSnapshot { $($field: self.$field.load(Ordering::Relaxed),)+ }
            }
        }

        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct ProcessingCountersSnapshot {
            $(pub $field: u64,)+
        }

        impl std::ops::Sub for &ProcessingCountersSnapshot {
            type Output = ProcessingCountersSnapshot;

            fn sub(self, rhs: Self) -> Self::Output {
                ProcessingCountersSnapshot { $($field: self.$field.saturating_sub(rhs.$field),)+ }
            }
        }
    };
}

processing_counters!(
    /// Blocks handed to `validate_and_insert_block`, valid or not
    blocks_submitted,
    header_counts,
    /// Direct parent references of accepted headers
    dep_counts,
    body_counts,
    txs_counts,
    /// Chain blocks whose UTXO state was resolved
    chain_block_counts,
    mass_counts,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_delta() {
        let counters = ProcessingCounters::default();
        counters.body_counts.fetch_add(4, Ordering::Relaxed);
        let before = counters.snapshot();
        counters.body_counts.fetch_add(3, Ordering::Relaxed);
        counters.txs_counts.fetch_add(9, Ordering::Relaxed);
        let delta = &counters.snapshot() - &before;
        assert_eq!(delta, ProcessingCountersSnapshot { body_counts: 3, txs_counts: 9, ..Default::default() });
        // Saturates instead of wrapping when sampled out of order
        assert_eq!((&before - &counters.snapshot()).body_counts, 0);
    }
}
