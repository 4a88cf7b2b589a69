use self::{
    address::{ReceiveAddressesFlow, SendAddressesFlow},
    blockrelay::{flow::HandleRelayInvsFlow, handle_requests::HandleRelayBlockRequests},
    ibd::IbdFlow,
    ibd_block_locator::HandleIbdBlockLocatorFlow,
    ping::{ReceivePingsFlow, SendPingsFlow},
    pruning_point_and_its_anticone_requests::PruningPointAndItsAnticoneRequestsFlow,
    request_block_locator::RequestBlockLocatorFlow,
    request_headers::{RequestHeadersFlow, RequestIbdBlocksFlow},
    request_pp_proof::RequestPruningPointProofFlow,
    request_pruning_point_utxo_set::RequestPruningPointUtxoSetFlow,
    txrelay::flow::{RelayTransactionsFlow, RequestTransactionsFlow},
};
use crate::{flow_context::FlowContext, flow_trait::Flow, flowcontext::transactions::MAX_INV_PER_TX_INV_MSG};
use kestrel_p2p_lib::{KestrelMessagePayloadType, Router};
use std::sync::Arc;

pub(crate) mod address;
pub(crate) mod blockrelay;
pub(crate) mod ibd;
pub(crate) mod ibd_block_locator;
pub(crate) mod ping;
pub(crate) mod pruning_point_and_its_anticone_requests;
pub(crate) mod request_block_locator;
pub(crate) mod request_headers;
pub(crate) mod request_pp_proof;
pub(crate) mod request_pruning_point_utxo_set;
pub(crate) mod txrelay;

/// Capacity of the transaction invs route
const TX_INVS_ROUTE_CAPACITY: usize = 4096;

/// Subscribes the routes of all protocol flows on `router` and returns the flows, ready to be launched.
/// Every message type the protocol defines, besides the handshake and rejects which the router
/// handles itself, is owned by exactly one route
pub fn register(ctx: FlowContext, router: Arc<Router>) -> Vec<Box<dyn Flow>> {
    // The relay flow hands blocks which need IBD over to the IBD flow of the same peer. A single slot is enough
    // since relay blocks arriving while IBD runs need no additional trigger
    let (ibd_sender, relay_receiver) = tokio::sync::mpsc::channel(1);

    let flows: Vec<Box<dyn Flow>> = vec![
        Box::new(IbdFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![
                KestrelMessagePayloadType::BlockHeaders,
                KestrelMessagePayloadType::DoneHeaders,
                KestrelMessagePayloadType::IbdBlockLocatorHighestHash,
                KestrelMessagePayloadType::IbdBlockLocatorHighestHashNotFound,
                KestrelMessagePayloadType::PruningPointProof,
                KestrelMessagePayloadType::TrustedData,
                KestrelMessagePayloadType::BlockWithTrustedData,
                KestrelMessagePayloadType::DoneBlocksWithTrustedData,
                KestrelMessagePayloadType::IbdBlock,
                KestrelMessagePayloadType::PruningPointUtxoSetChunk,
                KestrelMessagePayloadType::DonePruningPointUtxoSetChunks,
                KestrelMessagePayloadType::UnexpectedPruningPoint,
            ]),
            relay_receiver,
        )),
        Box::new(HandleRelayInvsFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![KestrelMessagePayloadType::InvRelayBlock]),
            router.subscribe(vec![KestrelMessagePayloadType::Block, KestrelMessagePayloadType::BlockLocator]),
            ibd_sender,
        )),
        Box::new(HandleRelayBlockRequests::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![KestrelMessagePayloadType::RequestRelayBlocks]),
        )),
        Box::new(RequestBlockLocatorFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![KestrelMessagePayloadType::RequestBlockLocator]),
        )),
        Box::new(HandleIbdBlockLocatorFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![KestrelMessagePayloadType::IbdBlockLocator]),
        )),
        Box::new(RequestHeadersFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![
                KestrelMessagePayloadType::RequestHeaders,
                KestrelMessagePayloadType::RequestAnticone,
                KestrelMessagePayloadType::RequestNextHeaders,
            ]),
        )),
        Box::new(RequestIbdBlocksFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![KestrelMessagePayloadType::RequestIbdBlocks]),
        )),
        Box::new(RequestPruningPointProofFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![KestrelMessagePayloadType::RequestPruningPointProof]),
        )),
        Box::new(PruningPointAndItsAnticoneRequestsFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![
                KestrelMessagePayloadType::RequestPruningPointAndItsAnticone,
                KestrelMessagePayloadType::RequestNextPruningPointAndItsAnticoneBlocks,
            ]),
        )),
        Box::new(RequestPruningPointUtxoSetFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![
                KestrelMessagePayloadType::RequestPruningPointUtxoSet,
                KestrelMessagePayloadType::RequestNextPruningPointUtxoSetChunk,
            ]),
        )),
        Box::new(RelayTransactionsFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe_with_capacity(vec![KestrelMessagePayloadType::InvTransactions], TX_INVS_ROUTE_CAPACITY),
            // Responses to a single request may number up to the max ids per inv message
            router.subscribe_with_capacity(
                vec![KestrelMessagePayloadType::Transaction, KestrelMessagePayloadType::TransactionNotFound],
                MAX_INV_PER_TX_INV_MSG,
            ),
        )),
        Box::new(RequestTransactionsFlow::new(
            ctx.clone(),
            router.clone(),
            router.subscribe(vec![KestrelMessagePayloadType::RequestTransactions]),
        )),
        Box::new(ReceivePingsFlow::new(router.clone(), router.subscribe(vec![KestrelMessagePayloadType::Ping]))),
        Box::new(SendPingsFlow::new(ctx.clone(), router.clone(), router.subscribe(vec![KestrelMessagePayloadType::Pong]))),
        Box::new(ReceiveAddressesFlow::new(router.clone(), router.subscribe(vec![KestrelMessagePayloadType::Addresses]))),
        Box::new(SendAddressesFlow::new(ctx, router.clone(), router.subscribe(vec![KestrelMessagePayloadType::RequestAddresses]))),
    ];

    flows
}
