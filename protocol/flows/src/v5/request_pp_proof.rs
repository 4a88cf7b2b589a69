use crate::{flow_context::FlowContext, flow_trait::Flow};
use kestrel_core::debug;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::ProtocolError,
    dequeue, make_message,
    messages::{Payload, PruningPointProofMessage},
};
use std::sync::Arc;

pub struct RequestPruningPointProofFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for RequestPruningPointProofFlow {
    fn name(&self) -> &'static str {
        "REQUEST_PRUNING_POINT_PROOF"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl RequestPruningPointProofFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { ctx, router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            dequeue!(self.incoming_route, Payload::RequestPruningPointProof)?;
            debug!("Got pruning point proof request from peer {}", self.router);
            let proof = self.ctx.consensus().async_get_pruning_point_proof().await;
            self.router
                .enqueue(make_message!(Payload::PruningPointProof, PruningPointProofMessage { proof: (*proof).clone() }))
                .await?;
            debug!("Sent pruning point proof of {} headers to peer {}", proof.len(), self.router);
        }
    }
}
