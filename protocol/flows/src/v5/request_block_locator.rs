use crate::{
    flow_context::FlowContext,
    flow_trait::{Flow, ignore_not_found},
};
use kestrel_hashes::Hash;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::ProtocolError,
    dequeue, make_message,
    messages::{BlockLocatorMessage, Payload},
};
use std::sync::Arc;

/// Serves the short locators the relay flow of the peer uses for deciding between unorphaning and IBD
pub struct RequestBlockLocatorFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for RequestBlockLocatorFlow {
    fn name(&self) -> &'static str {
        "REQUEST_BLOCK_LOCATOR"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl RequestBlockLocatorFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { ctx, router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            let msg = dequeue!(self.incoming_route, Payload::RequestBlockLocator)?;
            let res = self.send_locator(msg.high_hash, msg.limit).await;
            ignore_not_found(self.name(), &self.router, res)?;
        }
    }

    async fn send_locator(&self, high: Hash, limit: u32) -> Result<(), ProtocolError> {
        if limit == 0 {
            return Err(ProtocolError::MisbehavingPeer("requested an empty block locator".to_owned()));
        }
        let hashes = self.ctx.consensus().async_create_block_locator_from_pruning_point(high, limit as usize).await?;
        self.router.enqueue(make_message!(Payload::BlockLocator, BlockLocatorMessage { hashes })).await
    }
}
