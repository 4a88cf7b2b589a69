use super::process_queue::ProcessQueue;
use kestrel_consensus_core::tx::TransactionId;
use kestrel_core::debug;
use kestrel_p2p_lib::{
    Hub, make_message,
    messages::{InvTransactionsMessage, Payload},
};
use std::time::{Duration, Instant};

const CLEANING_TASK_INTERVAL: Duration = Duration::from_secs(10);
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(500);
pub(crate) const MAX_INV_PER_TX_INV_MSG: usize = 131_072;

/// Batches transaction ids for propagation and paces the mempool cleaning task
pub struct TransactionsSpread {
    hub: Hub,
    last_cleaning_time: Instant,
    cleaning_task_running: bool,
    transaction_ids: ProcessQueue<TransactionId>,
    last_broadcast_time: Instant,
}

impl TransactionsSpread {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            last_cleaning_time: Instant::now(),
            cleaning_task_running: false,
            transaction_ids: ProcessQueue::new(),
            last_broadcast_time: Instant::now(),
        }
    }

    /// Returns true if the mempool cleaning task is due, in which case it is marked as running
    pub fn should_run_cleaning_task(&mut self) -> bool {
        let now = Instant::now();
        if self.cleaning_task_running || now < self.last_cleaning_time + CLEANING_TASK_INTERVAL {
            return false;
        }
        self.last_cleaning_time = now;
        self.cleaning_task_running = true;
        true
    }

    pub fn cleaning_is_done(&mut self) {
        assert!(self.cleaning_task_running, "no stop without a matching start");
        self.cleaning_task_running = false;
    }

    /// Queues the ids for propagation. Queued ids are sent in `InvTransactions` messages at most once every
    /// [`BROADCAST_INTERVAL`], or right away once a full message is pending
    pub async fn broadcast_transactions<I: IntoIterator<Item = TransactionId>>(&mut self, transaction_ids: I) {
        self.transaction_ids.enqueue_chunk(transaction_ids);
        if Instant::now() < self.last_broadcast_time + BROADCAST_INTERVAL && self.transaction_ids.len() < MAX_INV_PER_TX_INV_MSG {
            return;
        }
        self.flush().await;
    }

    /// Sends all queued ids regardless of pacing
    pub async fn flush(&mut self) {
        while !self.transaction_ids.is_empty() {
            let ids = self.transaction_ids.dequeue_chunk(MAX_INV_PER_TX_INV_MSG);
            debug!("Transaction propagation: broadcasting {} transactions", ids.len());
            self.hub.broadcast(make_message!(Payload::InvTransactions, InvTransactionsMessage { ids })).await;
        }
        self.last_broadcast_time = Instant::now();
    }

    pub fn pending(&self) -> usize {
        self.transaction_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_p2p_lib::{Adaptor, config::P2pConfig};

    #[tokio::test]
    async fn test_broadcast_pacing() {
        let mut spread = TransactionsSpread::new(Adaptor::new_hub(&P2pConfig::default()));
        spread.broadcast_transactions([1u64.into(), 2u64.into()]).await;
        // Within the interval the ids stay queued
        assert_eq!(spread.pending(), 2);
        spread.broadcast_transactions([2u64.into()]).await;
        assert_eq!(spread.pending(), 2);
        spread.flush().await;
        assert_eq!(spread.pending(), 0);
    }

    #[test]
    fn test_cleaning_task_pacing() {
        let mut spread = TransactionsSpread::new(Adaptor::new_hub(&P2pConfig::default()));
        assert!(!spread.should_run_cleaning_task());
        spread.last_cleaning_time -= CLEANING_TASK_INTERVAL;
        assert!(spread.should_run_cleaning_task());
        assert!(!spread.should_run_cleaning_task());
        spread.cleaning_is_done();
    }
}
