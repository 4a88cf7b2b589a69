use crate::{flow_context::FlowContext, flow_trait::Flow, v5::ibd::IBD_BATCH_SIZE};
use kestrel_consensus_core::trusted::TrustedBlock;
use kestrel_core::debug;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::ProtocolError,
    dequeue, make_message,
    messages::{BlockWithTrustedDataMessage, DoneBlocksWithTrustedDataMessage, Payload, TrustedDataMessage},
};
use std::sync::Arc;

pub struct PruningPointAndItsAnticoneRequestsFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for PruningPointAndItsAnticoneRequestsFlow {
    fn name(&self) -> &'static str {
        "PP_ANTICONE"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl PruningPointAndItsAnticoneRequestsFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { ctx, router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            dequeue!(self.incoming_route, Payload::RequestPruningPointAndItsAnticone)?;
            debug!("Got request for pruning point and its anticone");

            let consensus = self.ctx.consensus();
            let trusted_data = consensus.async_get_pruning_point_anticone_and_trusted_data().await?;
            self.router.enqueue(make_message!(Payload::TrustedData, TrustedDataMessage { data: (*trusted_data).clone() })).await?;

            for hashes in trusted_data.anticone.chunks(IBD_BATCH_SIZE) {
                for &hash in hashes {
                    let block = self.ctx.with_pow_hash(consensus.async_get_block(hash).await?);
                    let ghostdag = consensus.async_get_ghostdag_data(hash).await?;
                    self.router
                        .enqueue(make_message!(
                            Payload::BlockWithTrustedData,
                            BlockWithTrustedDataMessage { block: TrustedBlock::new(block, ghostdag) }
                        ))
                        .await?;
                }

                if hashes.len() == IBD_BATCH_SIZE {
                    // No timeout here, as we don't care if the syncee takes its time computing,
                    // since it only blocks this dedicated flow
                    dequeue!(self.incoming_route, Payload::RequestNextPruningPointAndItsAnticoneBlocks)?;
                }
            }

            self.router.enqueue(make_message!(Payload::DoneBlocksWithTrustedData, DoneBlocksWithTrustedDataMessage {})).await?;
            debug!("Finished sending pruning point anticone")
        }
    }
}
