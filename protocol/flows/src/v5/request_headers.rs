use crate::{
    flow_context::FlowContext,
    flow_trait::{Flow, ignore_not_found},
    v5::ibd::IBD_BATCH_SIZE,
};
use itertools::Itertools;
use kestrel_consensus_core::header::Header;
use kestrel_core::debug;
use kestrel_hashes::Hash;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::ProtocolError,
    dequeue, dequeue_with_timeout, make_message,
    messages::{BlockHeadersMessage, DoneHeadersMessage, IbdBlockMessage, Payload},
};
use std::sync::Arc;

/// Serves header ranges (`RequestHeaders`) and anticone headers (`RequestAnticone`). Both are
/// paged with the same `RequestNextHeaders` acknowledgment, hence a single flow owns the route
pub struct RequestHeadersFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for RequestHeadersFlow {
    fn name(&self) -> &'static str {
        "REQUEST_HEADERS"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl RequestHeadersFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { ctx, router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            let msg = self.incoming_route.recv().await.ok_or(ProtocolError::ConnectionClosed)?;
            let res = match msg.payload {
                Payload::RequestHeaders(request) => self.send_headers(request.low_hash, request.high_hash).await,
                Payload::RequestAnticone(request) => self.send_anticone(request.block_hash, request.context_hash).await,
                payload => {
                    return Err(ProtocolError::UnexpectedMessage(
                        stringify!(Payload::RequestHeaders | Payload::RequestAnticone),
                        Some((&payload).into()),
                    ));
                }
            };
            ignore_not_found(self.name(), &self.router, res)?;
        }
    }

    async fn send_headers(&mut self, low: Hash, high: Hash) -> Result<(), ProtocolError> {
        debug!("Received RequestHeaders with low {} and high {} from peer {}", low, high, self.router);
        let consensus = self.ctx.consensus();
        if !consensus.async_is_chain_ancestor_of(low, high).await? {
            return Err(ProtocolError::OtherOwned(format!("requested low {} is not a chain ancestor of high {}", low, high)));
        }

        let mut low = low;
        loop {
            let (hashes, highest) = consensus.async_get_hashes_between(low, high, IBD_BATCH_SIZE).await?;
            if hashes.is_empty() {
                break;
            }
            debug!("Sending {} headers in range ({}, {}] to peer {}", hashes.len(), low, highest, self.router);
            // The first chunk may exceed the batch size since it holds the whole antipast of `low`
            for chunk in hashes.chunks(IBD_BATCH_SIZE) {
                let mut headers = Vec::with_capacity(chunk.len());
                for &hash in chunk {
                    headers.push(consensus.async_get_header(hash).await?);
                }
                self.send_headers_chunk(headers).await?;
            }
            if highest == high {
                break;
            }
            low = highest;
        }

        self.router.enqueue(make_message!(Payload::DoneHeaders, DoneHeadersMessage {})).await
    }

    async fn send_anticone(&mut self, block: Hash, context: Hash) -> Result<(), ProtocolError> {
        debug!("Received RequestAnticone of {} in the context of {} from peer {}", block, context, self.router);
        let consensus = self.ctx.consensus();
        let anticone = consensus.async_get_anticone(block, context).await?;

        // Blue work order is a topological order, which the syncee inserts by
        let mut entries = Vec::with_capacity(anticone.len());
        for hash in anticone {
            let blue_work = consensus.async_get_ghostdag_data(hash).await?.blue_work;
            entries.push((blue_work, consensus.async_get_header(hash).await?));
        }
        let headers = entries.into_iter().sorted_by_key(|(blue_work, _)| *blue_work).map(|(_, header)| header).collect_vec();

        if !headers.is_empty() {
            self.send_headers_chunk(headers).await?;
        }
        self.router.enqueue(make_message!(Payload::DoneHeaders, DoneHeadersMessage {})).await
    }

    async fn send_headers_chunk(&mut self, headers: Vec<Arc<Header>>) -> Result<(), ProtocolError> {
        self.router.enqueue(make_message!(Payload::BlockHeaders, BlockHeadersMessage { headers })).await?;
        dequeue_with_timeout!(self.incoming_route, Payload::RequestNextHeaders)?;
        Ok(())
    }
}

/// Serves full blocks the syncee is missing bodies for
pub struct RequestIbdBlocksFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for RequestIbdBlocksFlow {
    fn name(&self) -> &'static str {
        "REQUEST_IBD_BLOCKS"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl RequestIbdBlocksFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { ctx, router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            let msg = dequeue!(self.incoming_route, Payload::RequestIbdBlocks)?;
            let res = self.send_blocks(msg.hashes).await;
            ignore_not_found(self.name(), &self.router, res)?;
        }
    }

    async fn send_blocks(&self, hashes: Vec<Hash>) -> Result<(), ProtocolError> {
        if hashes.len() > IBD_BATCH_SIZE {
            return Err(ProtocolError::MisbehavingPeer(format!("requested {} IBD blocks in a single message", hashes.len())));
        }
        let consensus = self.ctx.consensus();
        for hash in hashes {
            let block = self.ctx.with_pow_hash(consensus.async_get_block(hash).await?);
            self.router.enqueue(make_message!(Payload::IbdBlock, IbdBlockMessage { block })).await?;
        }
        Ok(())
    }
}
