//! Wire messages exchanged between Kestrel peers.
//!
//! Every message travels as a single bincode-encoded [`KestrelMessage`] inside a length-prefixed frame
//! (see [`crate::codec`]). The inner [`Payload`] variant determines the route the message is dispatched to.

use crate::core::peer::PeerId;
use kestrel_consensus_core::{
    block::Block,
    header::Header,
    pruning::PruningPointProof,
    trusted::{PruningPointTrustedData, TrustedBlock},
    tx::{Transaction, TransactionId, TransactionOutpoint, UtxoEntry},
};
use kestrel_hashes::Hash;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KestrelMessage {
    pub payload: Payload,
}

impl KestrelMessage {
    pub fn new(payload: Payload) -> Self {
        Self { payload }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    // Handshake
    Version(VersionMessage),
    Verack(VerackMessage),
    Ready(ReadyMessage),
    Reject(RejectMessage),

    // Addressing
    Addresses(AddressesMessage),
    RequestAddresses(RequestAddressesMessage),

    // Relay
    InvRelayBlock(InvRelayBlockMessage),
    RequestRelayBlocks(RequestRelayBlocksMessage),
    Block(BlockMessage),
    InvTransactions(InvTransactionsMessage),
    RequestTransactions(RequestTransactionsMessage),
    Transaction(TransactionMessage),
    TransactionNotFound(TransactionNotFoundMessage),
    RequestBlockLocator(RequestBlockLocatorMessage),
    BlockLocator(BlockLocatorMessage),

    // IBD
    IbdBlockLocator(IbdBlockLocatorMessage),
    IbdBlockLocatorHighestHash(IbdBlockLocatorHighestHashMessage),
    IbdBlockLocatorHighestHashNotFound(IbdBlockLocatorHighestHashNotFoundMessage),
    RequestHeaders(RequestHeadersMessage),
    BlockHeaders(BlockHeadersMessage),
    RequestNextHeaders(RequestNextHeadersMessage),
    DoneHeaders(DoneHeadersMessage),
    RequestAnticone(RequestAnticoneMessage),
    RequestIbdBlocks(RequestIbdBlocksMessage),
    IbdBlock(IbdBlockMessage),
    RequestPruningPointProof(RequestPruningPointProofMessage),
    PruningPointProof(PruningPointProofMessage),
    RequestPruningPointAndItsAnticone(RequestPruningPointAndItsAnticoneMessage),
    TrustedData(TrustedDataMessage),
    BlockWithTrustedData(BlockWithTrustedDataMessage),
    RequestNextPruningPointAndItsAnticoneBlocks(RequestNextPruningPointAndItsAnticoneBlocksMessage),
    DoneBlocksWithTrustedData(DoneBlocksWithTrustedDataMessage),
    RequestPruningPointUtxoSet(RequestPruningPointUtxoSetMessage),
    PruningPointUtxoSetChunk(PruningPointUtxoSetChunkMessage),
    RequestNextPruningPointUtxoSetChunk(RequestNextPruningPointUtxoSetChunkMessage),
    DonePruningPointUtxoSetChunks(DonePruningPointUtxoSetChunksMessage),
    UnexpectedPruningPoint(UnexpectedPruningPointMessage),

    // Control
    Ping(PingMessage),
    Pong(PongMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub protocol_version: u32,
    pub network: String,
    pub id: PeerId,
    pub user_agent: String,
    pub disable_relay_tx: bool,
    /// Sender wall clock in milliseconds
    pub timestamp: u64,
    /// The address the sender accepts connections on, if any
    pub address: Option<SocketAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerackMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectMessage {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressesMessage {
    pub addresses: Vec<SocketAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAddressesMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvRelayBlockMessage {
    pub hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRelayBlocksMessage {
    pub hashes: Vec<Hash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMessage {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvTransactionsMessage {
    pub ids: Vec<TransactionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTransactionsMessage {
    pub ids: Vec<TransactionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMessage {
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionNotFoundMessage {
    pub id: TransactionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBlockLocatorMessage {
    pub high_hash: Hash,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockLocatorMessage {
    pub hashes: Vec<Hash>,
}

/// Sent by the syncee: a locator over its own headers chain, to be matched against the chain of `target_hash`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbdBlockLocatorMessage {
    pub target_hash: Hash,
    pub block_locator_hashes: Vec<Hash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbdBlockLocatorHighestHashMessage {
    pub highest_hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbdBlockLocatorHighestHashNotFoundMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHeadersMessage {
    pub low_hash: Hash,
    pub high_hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeadersMessage {
    pub headers: Vec<Arc<Header>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestNextHeadersMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoneHeadersMessage {}

/// Requests the headers in the past of `context_hash` and the anticone of `block_hash`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAnticoneMessage {
    pub block_hash: Hash,
    pub context_hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestIbdBlocksMessage {
    pub hashes: Vec<Hash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbdBlockMessage {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPruningPointProofMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningPointProofMessage {
    pub proof: PruningPointProof,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPruningPointAndItsAnticoneMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedDataMessage {
    pub data: PruningPointTrustedData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockWithTrustedDataMessage {
    pub block: TrustedBlock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestNextPruningPointAndItsAnticoneBlocksMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoneBlocksWithTrustedDataMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPruningPointUtxoSetMessage {
    pub pruning_point_hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningPointUtxoSetChunkMessage {
    pub outpoint_and_utxo_entry_pairs: Vec<(TransactionOutpoint, UtxoEntry)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestNextPruningPointUtxoSetChunkMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonePruningPointUtxoSetChunksMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnexpectedPruningPointMessage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    pub nonce: u64,
}
