use crate::messages::Payload;

/// The message type of a [`Payload`], used as the routing key of incoming messages
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum KestrelMessagePayloadType {
    Version,
    Verack,
    Ready,
    Reject,
    Addresses,
    RequestAddresses,
    InvRelayBlock,
    RequestRelayBlocks,
    Block,
    InvTransactions,
    RequestTransactions,
    Transaction,
    TransactionNotFound,
    RequestBlockLocator,
    BlockLocator,
    IbdBlockLocator,
    IbdBlockLocatorHighestHash,
    IbdBlockLocatorHighestHashNotFound,
    RequestHeaders,
    BlockHeaders,
    RequestNextHeaders,
    DoneHeaders,
    RequestAnticone,
    RequestIbdBlocks,
    IbdBlock,
    RequestPruningPointProof,
    PruningPointProof,
    RequestPruningPointAndItsAnticone,
    TrustedData,
    BlockWithTrustedData,
    RequestNextPruningPointAndItsAnticoneBlocks,
    DoneBlocksWithTrustedData,
    RequestPruningPointUtxoSet,
    PruningPointUtxoSetChunk,
    RequestNextPruningPointUtxoSetChunk,
    DonePruningPointUtxoSetChunks,
    UnexpectedPruningPoint,
    Ping,
    Pong,
}

impl From<&Payload> for KestrelMessagePayloadType {
    fn from(payload: &Payload) -> Self {
        match payload {
            Payload::Version(_) => KestrelMessagePayloadType::Version,
            Payload::Verack(_) => KestrelMessagePayloadType::Verack,
            Payload::Ready(_) => KestrelMessagePayloadType::Ready,
            Payload::Reject(_) => KestrelMessagePayloadType::Reject,
            Payload::Addresses(_) => KestrelMessagePayloadType::Addresses,
            Payload::RequestAddresses(_) => KestrelMessagePayloadType::RequestAddresses,
            Payload::InvRelayBlock(_) => KestrelMessagePayloadType::InvRelayBlock,
            Payload::RequestRelayBlocks(_) => KestrelMessagePayloadType::RequestRelayBlocks,
            Payload::Block(_) => KestrelMessagePayloadType::Block,
            Payload::InvTransactions(_) => KestrelMessagePayloadType::InvTransactions,
            Payload::RequestTransactions(_) => KestrelMessagePayloadType::RequestTransactions,
            Payload::Transaction(_) => KestrelMessagePayloadType::Transaction,
            Payload::TransactionNotFound(_) => KestrelMessagePayloadType::TransactionNotFound,
            Payload::RequestBlockLocator(_) => KestrelMessagePayloadType::RequestBlockLocator,
            Payload::BlockLocator(_) => KestrelMessagePayloadType::BlockLocator,
            Payload::IbdBlockLocator(_) => KestrelMessagePayloadType::IbdBlockLocator,
            Payload::IbdBlockLocatorHighestHash(_) => KestrelMessagePayloadType::IbdBlockLocatorHighestHash,
            Payload::IbdBlockLocatorHighestHashNotFound(_) => KestrelMessagePayloadType::IbdBlockLocatorHighestHashNotFound,
            Payload::RequestHeaders(_) => KestrelMessagePayloadType::RequestHeaders,
            Payload::BlockHeaders(_) => KestrelMessagePayloadType::BlockHeaders,
            Payload::RequestNextHeaders(_) => KestrelMessagePayloadType::RequestNextHeaders,
            Payload::DoneHeaders(_) => KestrelMessagePayloadType::DoneHeaders,
            Payload::RequestAnticone(_) => KestrelMessagePayloadType::RequestAnticone,
            Payload::RequestIbdBlocks(_) => KestrelMessagePayloadType::RequestIbdBlocks,
            Payload::IbdBlock(_) => KestrelMessagePayloadType::IbdBlock,
            Payload::RequestPruningPointProof(_) => KestrelMessagePayloadType::RequestPruningPointProof,
            Payload::PruningPointProof(_) => KestrelMessagePayloadType::PruningPointProof,
            Payload::RequestPruningPointAndItsAnticone(_) => KestrelMessagePayloadType::RequestPruningPointAndItsAnticone,
            Payload::TrustedData(_) => KestrelMessagePayloadType::TrustedData,
            Payload::BlockWithTrustedData(_) => KestrelMessagePayloadType::BlockWithTrustedData,
            Payload::RequestNextPruningPointAndItsAnticoneBlocks(_) => {
                KestrelMessagePayloadType::RequestNextPruningPointAndItsAnticoneBlocks
            }
            Payload::DoneBlocksWithTrustedData(_) => KestrelMessagePayloadType::DoneBlocksWithTrustedData,
            Payload::RequestPruningPointUtxoSet(_) => KestrelMessagePayloadType::RequestPruningPointUtxoSet,
            Payload::PruningPointUtxoSetChunk(_) => KestrelMessagePayloadType::PruningPointUtxoSetChunk,
            Payload::RequestNextPruningPointUtxoSetChunk(_) => KestrelMessagePayloadType::RequestNextPruningPointUtxoSetChunk,
            Payload::DonePruningPointUtxoSetChunks(_) => KestrelMessagePayloadType::DonePruningPointUtxoSetChunks,
            Payload::UnexpectedPruningPoint(_) => KestrelMessagePayloadType::UnexpectedPruningPoint,
            Payload::Ping(_) => KestrelMessagePayloadType::Ping,
            Payload::Pong(_) => KestrelMessagePayloadType::Pong,
        }
    }
}
