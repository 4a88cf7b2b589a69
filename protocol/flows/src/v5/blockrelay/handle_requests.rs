use crate::{
    flow_context::FlowContext,
    flow_trait::{Flow, ignore_not_found},
};
use kestrel_core::debug;
use kestrel_hashes::Hash;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::ProtocolError,
    dequeue, make_message,
    messages::{BlockMessage, Payload},
};
use std::sync::Arc;

/// Serves the blocks requested by the relay flow of the peer
pub struct HandleRelayBlockRequests {
    ctx: FlowContext,
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for HandleRelayBlockRequests {
    fn name(&self) -> &'static str {
        "HANDLE_RELAY_BLOCK_REQUESTS"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl HandleRelayBlockRequests {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { ctx, router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            let msg = dequeue!(self.incoming_route, Payload::RequestRelayBlocks)?;
            let res = self.send_blocks(msg.hashes).await;
            ignore_not_found(self.name(), &self.router, res)?;
        }
    }

    async fn send_blocks(&self, hashes: Vec<Hash>) -> Result<(), ProtocolError> {
        let consensus = self.ctx.consensus();
        for hash in hashes {
            let block = consensus.async_get_block(hash).await?;
            // Blocks mined locally are stored without their PoW hash
            let block = self.ctx.with_pow_hash(block);
            self.router.enqueue(make_message!(Payload::Block, BlockMessage { block })).await?;
            debug!("relayed block with hash {} to peer {}", hash, self.router);
        }
        Ok(())
    }
}
