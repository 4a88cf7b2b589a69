use std::sync::Arc;

use crate::{
    BlueWorkType,
    coinbase::MinerData,
    header::Header,
    tx::{Transaction, TransactionId},
};
use kestrel_hashes::Hash;
use serde::{Deserialize, Serialize};

/// A mutable block structure where header and transactions within can still be mutated.
#[derive(Debug, Clone)]
pub struct MutableBlock {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl MutableBlock {
    pub fn new(header: Header, txs: Vec<Transaction>) -> Self {
        Self { header, transactions: txs }
    }

    pub fn from_header(header: Header) -> Self {
        Self::new(header, vec![])
    }

    pub fn to_immutable(self) -> Block {
        Block::new(self.header, self.transactions)
    }
}

/// A block structure where the inner header and transactions are wrapped by Arcs for
/// cheap cloning and for cross-thread safety and immutability. The block optionally carries
/// the memoized PoW hash which peers attach on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Arc<Header>,
    pub transactions: Arc<Vec<Transaction>>,
    pub pow_hash: Option<Hash>,
}

impl Block {
    pub fn new(header: Header, txs: Vec<Transaction>) -> Self {
        Self { header: Arc::new(header), transactions: Arc::new(txs), pow_hash: None }
    }

    pub fn from_arcs(header: Arc<Header>, transactions: Arc<Vec<Transaction>>) -> Self {
        Self { header, transactions, pow_hash: None }
    }

    pub fn from_header_arc(header: Arc<Header>) -> Self {
        Self { header, transactions: Arc::new(Vec::new()), pow_hash: None }
    }

    pub fn from_header(header: Header) -> Self {
        Self::from_header_arc(Arc::new(header))
    }

    pub fn with_pow_hash(mut self, pow_hash: Hash) -> Self {
        self.pow_hash = Some(pow_hash);
        self
    }

    pub fn is_header_only(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn hash(&self) -> Hash {
        self.header.hash
    }

    /// WARNING: To be used for test purposes only
    pub fn from_precomputed_hash(hash: Hash, parents: Vec<Hash>) -> Block {
        Block::from_header(Header::from_precomputed_hash(hash, parents))
    }
}

/// A block template for miners.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: MutableBlock,
    pub miner_data: MinerData,
    pub coinbase_has_red_reward: bool,
    pub selected_parent_timestamp: u64,
    pub selected_parent_daa_score: u64,
    pub selected_parent_hash: Hash,
    /// Expected length is one less than txs length due to lack of coinbase transaction
    pub calculated_fees: Vec<u64>,
}

impl BlockTemplate {
    pub fn new(
        block: MutableBlock,
        miner_data: MinerData,
        coinbase_has_red_reward: bool,
        selected_parent_timestamp: u64,
        selected_parent_daa_score: u64,
        selected_parent_hash: Hash,
        calculated_fees: Vec<u64>,
    ) -> Self {
        Self {
            block,
            miner_data,
            coinbase_has_red_reward,
            selected_parent_timestamp,
            selected_parent_daa_score,
            selected_parent_hash,
            calculated_fees,
        }
    }

    pub fn to_virtual_state_approx_id(&self) -> VirtualStateApproxId {
        VirtualStateApproxId::new(self.block.header.daa_score, self.block.header.blue_work, self.selected_parent_hash)
    }
}

/// An opaque data structure representing a unique approximate identifier for virtual state. Note that it is
/// approximate in the sense that in rare cases a slightly different virtual state might produce the same identifier,
/// hence it should be used for cache-like heuristics only
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct VirtualStateApproxId {
    daa_score: u64,
    blue_work: BlueWorkType,
    sink: Hash,
}

impl VirtualStateApproxId {
    pub fn new(daa_score: u64, blue_work: BlueWorkType, sink: Hash) -> Self {
        Self { daa_score, blue_work, sink }
    }
}

/// Ids of transactions of a block, in block order
pub fn transaction_ids(block: &Block) -> impl Iterator<Item = TransactionId> + '_ {
    block.transactions.iter().map(|tx| tx.id())
}
