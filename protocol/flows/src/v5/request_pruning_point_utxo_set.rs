use crate::{flow_context::FlowContext, flow_trait::Flow, v5::ibd::IBD_BATCH_SIZE};
use kestrel_consensus_core::errors::consensus::ConsensusError;
use kestrel_core::debug;
use kestrel_hashes::Hash;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::ProtocolError,
    dequeue, make_message,
    messages::{DonePruningPointUtxoSetChunksMessage, Payload, PruningPointUtxoSetChunkMessage, UnexpectedPruningPointMessage},
};
use std::sync::Arc;

/// The number of UTXOs per chunk message
const CHUNK_SIZE: usize = 1000;

pub struct RequestPruningPointUtxoSetFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for RequestPruningPointUtxoSetFlow {
    fn name(&self) -> &'static str {
        "PP_UTXOS"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl RequestPruningPointUtxoSetFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { ctx, router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            let msg = dequeue!(self.incoming_route, Payload::RequestPruningPointUtxoSet)?;
            self.handle_request(msg.pruning_point_hash).await?
        }
    }

    async fn handle_request(&mut self, expected_pp: Hash) -> Result<(), ProtocolError> {
        let mut from_outpoint = None;
        let mut chunks_sent = 0;

        loop {
            let pp_utxos = match self.ctx.consensus().async_get_pruning_point_utxos(expected_pp, from_outpoint, CHUNK_SIZE).await {
                Err(ConsensusError::UnexpectedPruningPoint) => return self.send_unexpected_pruning_point_message(expected_pp).await,
                res => res,
            }?;
            debug!("Retrieved {} UTXOs for pruning point {}", pp_utxos.len(), expected_pp);

            // This indicates that there are no more entries to query
            let is_last = pp_utxos.len() < CHUNK_SIZE;
            let next_outpoint = pp_utxos.last().map(|(outpoint, _)| *outpoint);

            self.router
                .enqueue(make_message!(
                    Payload::PruningPointUtxoSetChunk,
                    PruningPointUtxoSetChunkMessage { outpoint_and_utxo_entry_pairs: pp_utxos }
                ))
                .await?;

            // The syncee asks for more after every full batch, including the final one.
            // No timeout here, as it only blocks this dedicated flow
            chunks_sent += 1;
            if chunks_sent % IBD_BATCH_SIZE == 0 {
                dequeue!(self.incoming_route, Payload::RequestNextPruningPointUtxoSetChunk)?;
            }

            if is_last {
                return self.send_done_message(expected_pp).await;
            }

            // Mark the beginning of the next chunk
            from_outpoint = next_outpoint;
        }
    }

    async fn send_unexpected_pruning_point_message(&mut self, expected_pp: Hash) -> Result<(), ProtocolError> {
        debug!("Peer {} requested the UTXO set of {} which is not the current pruning point", self.router, expected_pp);
        self.router.enqueue(make_message!(Payload::UnexpectedPruningPoint, UnexpectedPruningPointMessage {})).await?;
        Ok(())
    }

    async fn send_done_message(&mut self, expected_pp: Hash) -> Result<(), ProtocolError> {
        debug!("Finished sending UTXOs for pruning point {}", expected_pp);
        self.router.enqueue(make_message!(Payload::DonePruningPointUtxoSetChunks, DonePruningPointUtxoSetChunksMessage {})).await?;
        Ok(())
    }
}
