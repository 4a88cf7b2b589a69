use kestrel_hashes::Hash;
use serde::{Deserialize, Serialize};

use crate::tx::{TransactionId, UtxoEntry};

/// Index of a transaction within its block
pub type TransactionIndexType = u32;

/// Acceptance data of a chain block: one entry per mergeset block, in mergeset order
pub type AcceptanceData = Vec<MergesetBlockAcceptanceData>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergesetBlockAcceptanceData {
    pub block_hash: Hash,
    pub transactions: Vec<TxAcceptanceEntry>,
}

/// The acceptance verdict of a single mergeset transaction. Accepted transactions carry their
/// fee and the UTXO entries they spent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAcceptanceEntry {
    pub transaction_id: TransactionId,
    pub index_within_block: TransactionIndexType,
    pub accepted: bool,
    pub fee: u64,
    pub input_entries: Vec<UtxoEntry>,
}

impl MergesetBlockAcceptanceData {
    pub fn accepted_transactions(&self) -> impl Iterator<Item = &TxAcceptanceEntry> {
        self.transactions.iter().filter(|entry| entry.accepted)
    }

    pub fn total_fees(&self) -> u64 {
        self.accepted_transactions().map(|entry| entry.fee).sum()
    }
}

/// Ids of all accepted transactions of a chain block, in acceptance order
pub fn accepted_transaction_ids(data: &AcceptanceData) -> impl Iterator<Item = TransactionId> + '_ {
    data.iter().flat_map(|block| block.accepted_transactions().map(|entry| entry.transaction_id))
}
