use super::ProcessingCounters;
use kestrel_core::{info, trace};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Periodically logs the processing rates derived from the consensus counters. Intervals without
/// any progress are not reported
pub struct ConsensusMonitor {
    counters: Arc<ProcessingCounters>,
    interval: Duration,
}

impl ConsensusMonitor {
    pub fn new(counters: Arc<ProcessingCounters>, interval: Duration) -> Self {
        Self { counters, interval }
    }

    /// Runs until `shutdown` is triggered
    pub async fn run(self, shutdown: triggered::Listener) {
        let mut last_snapshot = self.counters.snapshot();
        let mut last_log_time = Instant::now();
        loop {
            tokio::select! {
                _ = shutdown.clone() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let snapshot = self.counters.snapshot();
            if snapshot == last_snapshot {
                last_log_time = Instant::now();
                continue;
            }

            let delta = &snapshot - &last_snapshot;
            let now = Instant::now();
            info!(
                "Processed {} blocks and {} headers in the last {:.2}s ({} transactions; {} UTXO-validated blocks; {:.2} avg txs per block; {} avg block mass)",
                delta.body_counts,
                delta.header_counts,
                (now - last_log_time).as_secs_f64(),
                delta.txs_counts,
                delta.chain_block_counts,
                if delta.body_counts != 0 { delta.txs_counts as f64 / delta.body_counts as f64 } else { 0f64 },
                if delta.body_counts != 0 { delta.mass_counts / delta.body_counts } else { 0 },
            );

            last_snapshot = snapshot;
            last_log_time = now;
        }
        trace!("Consensus monitor exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_monitor_stops_on_shutdown() {
        let counters = Arc::new(ProcessingCounters::default());
        counters.body_counts.fetch_add(3, Ordering::Relaxed);
        let (trigger, listener) = triggered::trigger();
        let handle = tokio::spawn(ConsensusMonitor::new(counters, Duration::from_millis(5)).run(listener));
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
