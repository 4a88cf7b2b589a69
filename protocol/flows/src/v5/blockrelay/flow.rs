use crate::{flow_context::FlowContext, flow_trait::Flow, flowcontext::orphans::ORPHAN_RESOLUTION_RANGE};
use kestrel_consensus_core::{block::Block, blockstatus::BlockStatus, errors::block::RuleError};
use kestrel_core::{debug, info};
use kestrel_hashes::Hash;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::ProtocolError,
    dequeue, dequeue_with_timeout, make_message,
    messages::{InvRelayBlockMessage, Payload, RequestBlockLocatorMessage, RequestRelayBlocksMessage},
};
use std::{collections::VecDeque, iter::once, sync::Arc};
use tokio::sync::mpsc::{Sender, error::TrySendError};

pub struct RelayInvMessage {
    hash: Hash,
    is_indirect: bool,
}

/// Encapsulates an incoming invs route which also receives data locally
pub struct TwoWayIncomingRoute {
    incoming_route: IncomingRoute,
    indirect_invs: VecDeque<Hash>,
}

impl TwoWayIncomingRoute {
    pub fn new(incoming_route: IncomingRoute) -> Self {
        Self { incoming_route, indirect_invs: VecDeque::new() }
    }

    pub fn enqueue_indirect_invs<I: IntoIterator<Item = Hash>>(&mut self, iter: I) {
        self.indirect_invs.extend(iter)
    }

    pub async fn dequeue(&mut self) -> Result<RelayInvMessage, ProtocolError> {
        if let Some(inv) = self.indirect_invs.pop_front() {
            Ok(RelayInvMessage { hash: inv, is_indirect: true })
        } else {
            let msg = dequeue!(self.incoming_route, Payload::InvRelayBlock)?;
            Ok(RelayInvMessage { hash: msg.hash, is_indirect: false })
        }
    }
}

pub struct HandleRelayInvsFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    /// A route specific for invs messages
    invs_route: TwoWayIncomingRoute,
    /// A route for other messages such as Block and BlockLocator
    msg_route: IncomingRoute,
    /// A channel sender for sending blocks to be handled by the IBD flow (of this peer)
    ibd_sender: Sender<Block>,
}

#[async_trait::async_trait]
impl Flow for HandleRelayInvsFlow {
    fn name(&self) -> &'static str {
        "HANDLE_RELAY_INVS"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl HandleRelayInvsFlow {
    pub fn new(
        ctx: FlowContext,
        router: Arc<Router>,
        invs_route: IncomingRoute,
        msg_route: IncomingRoute,
        ibd_sender: Sender<Block>,
    ) -> Self {
        Self { ctx, router, invs_route: TwoWayIncomingRoute::new(invs_route), msg_route, ibd_sender }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            // Loop over incoming block inv messages
            let inv = self.invs_route.dequeue().await?;
            let consensus = self.ctx.consensus();

            match consensus.async_get_block_status(inv.hash).await {
                None | Some(BlockStatus::StatusHeaderOnly) => {} // Continue processing this missing inv
                Some(BlockStatus::StatusInvalid) => {
                    return Err(ProtocolError::MisbehavingPeer(format!("sent inv of an invalid block {}", inv.hash)));
                }
                _ => continue, // Block is already known with its body, skip to next inv
            }

            if self.ctx.is_known_orphan(inv.hash).await {
                self.enqueue_orphan_roots(inv.hash).await;
                continue;
            }

            // Relayed blocks are of no use while the node is far behind and syncing
            if self.ctx.is_ibd_running() && !consensus.async_is_nearly_synced().await {
                continue;
            }

            let Some(block) = self.request_block(inv.hash).await? else {
                debug!("Relay block {} was already requested from another peer", inv.hash);
                continue;
            };
            self.ctx.verify_block_pow(&block)?;

            // Blue work respects topology, so a block failing this check is not in the future of the virtual
            // merge depth root and cannot be merged unless another block kosherizes it. Indirect invs come from
            // a relevant orphan and are always processed
            let blue_work_threshold = consensus.async_get_virtual_merge_depth_blue_work_threshold().await;
            if !inv.is_indirect && block.header.blue_work <= blue_work_threshold {
                debug!(
                    "Relay block {} has lower blue work than the virtual merge depth root ({} <= {}), skipping it",
                    inv.hash, block.header.blue_work, blue_work_threshold
                );
                continue;
            }

            match consensus.async_validate_and_insert_block(block.clone()).await {
                Ok(_) => {}
                Err(RuleError::MissingParents(missing_parents)) => {
                    debug!("Block {} is orphan and has missing parents: {}", block.hash(), missing_parents);
                    self.process_orphan(block, inv.is_indirect).await?;
                    continue;
                }
                Err(rule_error) => return Err(rule_error.into()),
            }

            info!("Accepted block {} via relay", inv.hash);
            self.ctx.on_new_block_template().await;
            let unorphaned = self.ctx.on_new_block(block).await?;

            // Broadcast all new blocks which are now part of the DAG
            let invs = once(inv.hash)
                .chain(unorphaned)
                .map(|hash| make_message!(Payload::InvRelayBlock, InvRelayBlockMessage { hash }))
                .collect::<Vec<_>>();
            self.ctx.hub().broadcast_many(invs).await;
        }
    }

    async fn enqueue_orphan_roots(&mut self, orphan: Hash) {
        if let Some(roots) = self.ctx.get_orphan_roots(orphan).await {
            if roots.is_empty() {
                return;
            }
            debug!("Block {} has {} missing ancestors. Adding them to the invs queue", orphan, roots.len());
            self.invs_route.enqueue_indirect_invs(roots)
        }
    }

    /// Requests the block from the peer. Returns `None` if the block is already being requested from another peer
    async fn request_block(&mut self, requested_hash: Hash) -> Result<Option<Block>, ProtocolError> {
        let Some(_request_scope) = self.ctx.try_adding_block_request(requested_hash) else {
            return Ok(None);
        };
        self.router
            .enqueue(make_message!(Payload::RequestRelayBlocks, RequestRelayBlocksMessage { hashes: vec![requested_hash] }))
            .await?;
        let msg = dequeue_with_timeout!(self.msg_route, Payload::Block)?;
        let block = msg.block;
        if block.hash() != requested_hash {
            return Err(ProtocolError::MisbehavingPeer(format!(
                "requested block hash {} but got block {}",
                requested_hash,
                block.hash()
            )));
        }
        if block.is_header_only() {
            return Err(ProtocolError::MisbehavingPeer(format!("sent header of {} where expected block with body", block.hash())));
        }
        Ok(Some(block))
    }

    async fn process_orphan(&mut self, block: Block, is_indirect: bool) -> Result<(), ProtocolError> {
        // Return if the block has been orphaned from elsewhere already
        if self.ctx.is_known_orphan(block.hash()).await {
            return Ok(());
        }

        // Add the block to the orphan pool if it's within orphan resolution range.
        // If the block is indirect it means one of its descendants was already in resolution range, so
        // we can avoid the queries
        if is_indirect || self.check_orphan_resolution_range(block.hash()).await? {
            let hash = block.hash();
            self.ctx.add_orphan(block).await;
            self.enqueue_orphan_roots(hash).await;
        } else {
            // Send the block to IBD flow via the dedicated channel.
            // Note that this is a non-blocking send and we don't care about being rejected if channel is full,
            // since if IBD is already running, there is no need to trigger it
            match self.ibd_sender.try_send(block) {
                Ok(_) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => return Err(ProtocolError::ConnectionClosed), // This indicates that IBD flow has exited
            }
        }
        Ok(())
    }

    /// Finds out whether the given block hash should be retrieved via the unorphaning
    /// mechanism or via IBD. This method sends a BlockLocator request to the peer with
    /// a limit of ORPHAN_RESOLUTION_RANGE. In the response, if we know none of the hashes,
    /// we should retrieve the given block hash via IBD. Otherwise, via unorphaning.
    async fn check_orphan_resolution_range(&mut self, hash: Hash) -> Result<bool, ProtocolError> {
        self.router
            .enqueue(make_message!(
                Payload::RequestBlockLocator,
                RequestBlockLocatorMessage { high_hash: hash, limit: ORPHAN_RESOLUTION_RANGE }
            ))
            .await?;
        let msg = dequeue_with_timeout!(self.msg_route, Payload::BlockLocator)?;
        if msg.hashes.len() > ORPHAN_RESOLUTION_RANGE as usize {
            return Err(ProtocolError::MisbehavingPeer(format!(
                "sent a locator of {} hashes where the limit was {}",
                msg.hashes.len(),
                ORPHAN_RESOLUTION_RANGE
            )));
        }
        let consensus = self.ctx.consensus();
        for hash in msg.hashes {
            if consensus.async_get_block_status(hash).await.is_some_and(|status| status.has_block_body()) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
