use crate::{block::Block, utxo::utxo_diff::UtxoDiff};
use async_channel::{Receiver, Sender, unbounded};
use kestrel_hashes::Hash;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum ConsensusNotification {
    BlockAdded(BlockAddedNotification),
    NewBlockTemplate(NewBlockTemplateNotification),
    VirtualChainChanged(VirtualChainChangedNotification),
    VirtualDaaScoreChanged(VirtualDaaScoreChangedNotification),
    PruningPointUtxoSetOverride(PruningPointUtxoSetOverrideNotification),
}

#[derive(Debug, Clone)]
pub struct BlockAddedNotification {
    pub block: Block,
}

#[derive(Debug, Clone)]
pub struct NewBlockTemplateNotification {}

#[derive(Debug, Clone)]
pub struct VirtualChainChangedNotification {
    pub added_chain_block_hashes: Arc<Vec<Hash>>,
    pub removed_chain_block_hashes: Arc<Vec<Hash>>,
    pub virtual_utxo_diff: Arc<UtxoDiff>,
}

#[derive(Debug, Clone)]
pub struct VirtualDaaScoreChangedNotification {
    pub virtual_daa_score: u64,
}

#[derive(Debug, Clone)]
pub struct PruningPointUtxoSetOverrideNotification {
    pub pruning_point: Hash,
}

/// Fan-out point for consensus notifications. Every subscriber gets its own unbounded channel,
/// so a slow subscriber never blocks consensus processing
#[derive(Default)]
pub struct ConsensusNotificationRoot {
    subscribers: Mutex<Vec<Sender<ConsensusNotification>>>,
}

impl ConsensusNotificationRoot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ConsensusNotification> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Sends the notification to all live subscribers and drops the closed ones
    pub fn notify(&self, notification: ConsensusNotification) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| sender.try_send(notification.clone()).is_ok());
    }
}
