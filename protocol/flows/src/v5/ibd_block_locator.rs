use crate::{
    flow_context::FlowContext,
    flow_trait::{Flow, ignore_not_found},
};
use kestrel_consensus_core::blockstatus::BlockStatus;
use kestrel_core::debug;
use kestrel_hashes::Hash;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::ProtocolError,
    dequeue, make_message,
    messages::{IbdBlockLocatorHighestHashMessage, IbdBlockLocatorHighestHashNotFoundMessage, Payload},
};
use std::sync::Arc;

/// Answers the syncee's locator with the highest locator hash on the selected chain of the target
pub struct HandleIbdBlockLocatorFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for HandleIbdBlockLocatorFlow {
    fn name(&self) -> &'static str {
        "IBD_BLOCK_LOCATOR"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl HandleIbdBlockLocatorFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { ctx, router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            let msg = dequeue!(self.incoming_route, Payload::IbdBlockLocator)?;
            let res = self.handle_locator(msg.target_hash, msg.block_locator_hashes).await;
            ignore_not_found(self.name(), &self.router, res)?;
        }
    }

    async fn handle_locator(&self, target: Hash, locator: Vec<Hash>) -> Result<(), ProtocolError> {
        let consensus = self.ctx.consensus();
        let is_known = |status: Option<BlockStatus>| status.is_some_and(|s| s.has_block_header());
        let pruning_point = consensus.async_get_pruning_point().await;
        let candidates = if is_known(consensus.async_get_block_status(target).await) { locator } else { vec![] };
        for hash in candidates {
            if !is_known(consensus.async_get_block_status(hash).await) {
                continue;
            }
            // Hashes below our pruning point cannot serve as a headers sync starting point
            if consensus.async_is_chain_ancestor_of(hash, target).await?
                && consensus.async_is_chain_ancestor_of(pruning_point, hash).await?
            {
                debug!("Highest shared chain block of the IBD locator of peer {} is {}", self.router, hash);
                return self
                    .router
                    .enqueue(make_message!(
                        Payload::IbdBlockLocatorHighestHash,
                        IbdBlockLocatorHighestHashMessage { highest_hash: hash }
                    ))
                    .await;
            }
        }

        debug!("No shared chain block found in the IBD locator of peer {}", self.router);
        self.router
            .enqueue(make_message!(Payload::IbdBlockLocatorHighestHashNotFound, IbdBlockLocatorHighestHashNotFoundMessage {}))
            .await
    }
}
