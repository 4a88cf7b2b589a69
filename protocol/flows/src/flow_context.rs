use crate::flowcontext::{
    orphans::{MAX_ORPHANS, OrphanBlocksPool},
    process_queue::ProcessQueue,
    transactions::TransactionsSpread,
};
use crate::v5;
use async_trait::async_trait;
use kestrel_consensus::consensus::proxy::ConsensusProxy;
use kestrel_consensus_core::{
    api::DynConsensus,
    block::Block,
    config::Config,
    errors::{block::RuleError, consensus::ConsensusError, sync::SyncManagerError},
    notify::{ConsensusNotification, ConsensusNotificationRoot, NewBlockTemplateNotification},
    tx::{Transaction, TransactionId},
};
use kestrel_core::{debug, info, time::unix_now, warn};
use kestrel_hashes::Hash;
use kestrel_mining::{
    manager::MiningManagerProxy,
    mempool::tx::{Orphan, Priority},
};
use kestrel_mining_errors::manager::MiningManagerError;
use kestrel_p2p_lib::{
    ConnectionInitializer, Hub, KestrelHandshake, PeerId, PeerProperties, Router,
    common::ProtocolError,
    make_message,
    messages::{InvRelayBlockMessage, Payload, VersionMessage},
};
use kestrel_pow::calc_block_pow_hash;
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    iter::once,
    net::SocketAddr,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::RwLock as AsyncRwLock;

/// The P2P protocol version. Currently the only one supported
pub const PROTOCOL_VERSION: u32 = 5;

/// Node level knobs of the flows layer
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub user_agent: String,

    /// Do not relay transactions
    pub blocks_only: bool,

    /// The address announced to peers, if this node accepts connections
    pub listen_address: Option<SocketAddr>,

    pub max_orphans: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("/kestreld:{}/", env!("CARGO_PKG_VERSION")),
            blocks_only: false,
            listen_address: None,
            max_orphans: MAX_ORPHANS,
        }
    }
}

/// Outcome of a block submitted by a local miner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitBlockRejectReason {
    /// The block was accepted
    None,
    /// The node is not synced, so the block would likely be orphaned
    IsInIbd,
    BlockInvalid,
}

pub struct FlowContextInner {
    pub node_id: PeerId,
    pub config: Arc<Config>,
    pub flow_config: FlowConfig,
    consensus: DynConsensus,
    hub: Hub,
    orphans_pool: AsyncRwLock<OrphanBlocksPool>,
    shared_block_requests: Arc<Mutex<HashSet<Hash>>>,
    transactions_spread: AsyncRwLock<TransactionsSpread>,
    shared_transaction_requests: Arc<Mutex<HashSet<TransactionId>>>,
    is_ibd_running: Arc<AtomicBool>,
    mining_manager: MiningManagerProxy,
    notification_root: Arc<ConsensusNotificationRoot>,
}

/// State shared by the flows of all peers
#[derive(Clone)]
pub struct FlowContext {
    inner: Arc<FlowContextInner>,
}

pub struct IbdRunningGuard {
    indicator: Arc<AtomicBool>,
}

impl Drop for IbdRunningGuard {
    fn drop(&mut self) {
        let result = self.indicator.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst);
        assert!(result.is_ok())
    }
}

/// A pending request registered in a shared request set. The entry is released on drop
pub struct RequestScope<T: PartialEq + Eq + std::hash::Hash> {
    set: Arc<Mutex<HashSet<T>>>,
    pub req: T,
}

impl<T: PartialEq + Eq + std::hash::Hash> RequestScope<T> {
    pub fn new(set: Arc<Mutex<HashSet<T>>>, req: T) -> Self {
        Self { set, req }
    }
}

impl<T: PartialEq + Eq + std::hash::Hash> Drop for RequestScope<T> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.req);
    }
}

impl Deref for FlowContext {
    type Target = FlowContextInner;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl FlowContext {
    pub fn new(
        consensus: DynConsensus,
        config: Arc<Config>,
        flow_config: FlowConfig,
        hub: Hub,
        mining_manager: MiningManagerProxy,
        notification_root: Arc<ConsensusNotificationRoot>,
    ) -> Self {
        Self {
            inner: Arc::new(FlowContextInner {
                node_id: PeerId::random(),
                config,
                orphans_pool: AsyncRwLock::new(OrphanBlocksPool::new(flow_config.max_orphans)),
                flow_config,
                consensus,
                shared_block_requests: Arc::new(Mutex::new(HashSet::new())),
                transactions_spread: AsyncRwLock::new(TransactionsSpread::new(hub.clone())),
                shared_transaction_requests: Arc::new(Mutex::new(HashSet::new())),
                is_ibd_running: Arc::new(AtomicBool::default()),
                hub,
                mining_manager,
                notification_root,
            }),
        }
    }

    pub fn consensus(&self) -> ConsensusProxy {
        ConsensusProxy::new(self.consensus.clone())
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn mining_manager(&self) -> MiningManagerProxy {
        self.mining_manager.clone()
    }

    pub fn notification_root(&self) -> &Arc<ConsensusNotificationRoot> {
        &self.notification_root
    }

    pub fn try_set_ibd_running(&self) -> Option<IbdRunningGuard> {
        if self.is_ibd_running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            Some(IbdRunningGuard { indicator: self.is_ibd_running.clone() })
        } else {
            None
        }
    }

    pub fn is_ibd_running(&self) -> bool {
        self.is_ibd_running.load(Ordering::SeqCst)
    }

    pub fn try_adding_block_request(&self, req: Hash) -> Option<RequestScope<Hash>> {
        if self.shared_block_requests.lock().insert(req) {
            Some(RequestScope::new(self.shared_block_requests.clone(), req))
        } else {
            None
        }
    }

    pub fn try_adding_transaction_request(&self, req: TransactionId) -> Option<RequestScope<TransactionId>> {
        if self.shared_transaction_requests.lock().insert(req) {
            Some(RequestScope::new(self.shared_transaction_requests.clone(), req))
        } else {
            None
        }
    }

    pub async fn add_orphan(&self, orphan_block: Block) {
        self.orphans_pool.write().await.add_orphan(orphan_block)
    }

    pub async fn is_known_orphan(&self, hash: Hash) -> bool {
        self.orphans_pool.read().await.is_known_orphan(hash)
    }

    pub async fn get_orphan_roots(&self, orphan: Hash) -> Option<Vec<Hash>> {
        self.orphans_pool.read().await.get_orphan_roots(&self.consensus(), orphan).await
    }

    pub async fn unorphan_blocks(&self, root: Hash) -> Vec<Block> {
        self.orphans_pool.write().await.unorphan_blocks(&self.consensus(), root).await
    }

    /// Checks the block version and the PoW hash attached to a block received from a peer. Blocks of the
    /// "PoW integrity" version or above must carry their PoW hash, and a carried hash must be correct
    pub fn verify_block_pow(&self, block: &Block) -> Result<(), ProtocolError> {
        let header = &block.header;
        let expected_version = self.config.block_version(header.daa_score).version;
        if header.version != expected_version {
            return Err(RuleError::WrongBlockVersion(header.version, expected_version).into());
        }
        match block.pow_hash {
            None if header.version >= self.config.pow_integrity_version => Err(RuleError::MissingPowHash.into()),
            Some(pow_hash) if !self.config.skip_proof_of_work => {
                let variant = self.config.pow_scores.variant(header.daa_score);
                if calc_block_pow_hash(header, variant) != pow_hash {
                    return Err(RuleError::InvalidPoW.into());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Attaches the PoW hash to a block about to be sent to a peer, recomputing it if missing
    pub fn with_pow_hash(&self, block: Block) -> Block {
        if block.pow_hash.is_some() {
            return block;
        }
        let pow_hash = calc_block_pow_hash(&block.header, self.config.pow_scores.variant(block.header.daa_score));
        block.with_pow_hash(pow_hash)
    }

    /// Validates and inserts a block mined locally, then propagates it
    pub async fn submit_block(&self, block: Block) -> SubmitBlockRejectReason {
        let consensus = self.consensus();
        let is_synced = self.hub.has_peers() && consensus.async_is_nearly_synced().await;
        if !self.config.allow_submit_block_when_not_synced && !is_synced {
            return SubmitBlockRejectReason::IsInIbd;
        }
        let hash = block.hash();
        match self.add_block(block).await {
            Ok(()) => {
                info!("Accepted block {} via submit block", hash);
                SubmitBlockRejectReason::None
            }
            Err(err) => {
                warn!("The submitted block {} triggered an error: {}", hash, err);
                SubmitBlockRejectReason::BlockInvalid
            }
        }
    }

    /// Adds the given block to the DAG and propagates it
    pub async fn add_block(&self, block: Block) -> Result<(), ProtocolError> {
        if block.is_header_only() {
            return Err(RuleError::NoTransactions.into());
        }
        let hash = block.hash();
        if let Err(err) = self.consensus().async_validate_and_insert_block(block.clone()).await {
            warn!("Validation failed for block {}: {}", hash, err);
            return Err(err.into());
        }
        self.on_new_block_template().await;
        let unorphaned = self.on_new_block(block).await?;
        let invs = once(hash)
            .chain(unorphaned)
            .map(|hash| make_message!(Payload::InvRelayBlock, InvRelayBlockMessage { hash }))
            .collect::<Vec<_>>();
        self.hub.broadcast_many(invs).await;
        Ok(())
    }

    /// Inserts the orphans completed by `block`, updates the mempool with the transactions of all inserted blocks
    /// and relays transactions which left the orphan pool as a result. Returns the unorphaned block hashes
    pub async fn on_new_block(&self, block: Block) -> Result<Vec<Hash>, ProtocolError> {
        let unorphaned = self.unorphan_blocks(block.hash()).await;
        let unorphaned_hashes = unorphaned.iter().map(|b| b.hash()).collect::<Vec<_>>();

        let mut transactions_to_broadcast = ProcessQueue::new();
        for block in once(block).chain(unorphaned) {
            let accepted =
                self.mining_manager().handle_new_block_transactions(self.consensus.clone(), block.transactions.clone()).await?;
            transactions_to_broadcast.enqueue_chunk(accepted.iter().map(|tx| tx.id()));
        }

        self.maybe_run_mempool_cleaning().await;

        // Transactions are not relayed while the node is syncing
        if !self.is_ibd_running() {
            self.broadcast_transactions(transactions_to_broadcast).await;
        }
        Ok(unorphaned_hashes)
    }

    /// Notifies that a new block template is available for miners
    pub async fn on_new_block_template(&self) {
        self.mining_manager.clear_block_template();
        self.notification_root.notify(ConsensusNotification::NewBlockTemplate(NewBlockTemplateNotification {}));
    }

    /// Validates a transaction submitted locally and queues it, along with the orphans it unlocked, for relay
    pub async fn add_transaction(&self, transaction: Transaction, orphan: Orphan) -> Result<(), ProtocolError> {
        let accepted = self
            .mining_manager()
            .validate_and_insert_transaction(self.consensus.clone(), transaction, Priority::High, orphan)
            .await?;
        self.broadcast_transactions(accepted.iter().map(|tx| tx.id())).await;
        Ok(())
    }

    /// Validates a transaction relayed by a peer. Orphans are accepted, at low priority
    pub async fn add_relayed_transaction(&self, transaction: Transaction) -> Result<Vec<Arc<Transaction>>, MiningManagerError> {
        self.mining_manager()
            .validate_and_insert_transaction(self.consensus.clone(), transaction, Priority::Low, Orphan::Allowed)
            .await
    }

    /// Queues the ids for propagation to all peers. See [`TransactionsSpread::broadcast_transactions`]
    pub async fn broadcast_transactions<I: IntoIterator<Item = TransactionId>>(&self, transaction_ids: I) {
        self.transactions_spread.write().await.broadcast_transactions(transaction_ids).await
    }

    /// Sends the transaction ids whose broadcast was deferred by pacing
    pub async fn flush_transactions(&self) {
        self.transactions_spread.write().await.flush().await
    }

    async fn maybe_run_mempool_cleaning(&self) {
        if !self.transactions_spread.write().await.should_run_cleaning_task() {
            return;
        }
        let ctx = self.clone();
        tokio::spawn(async move {
            if let Err(err) = ctx.mining_manager().expire_low_priority_transactions(ctx.consensus.clone()).await {
                warn!("Mempool cleaning failed: {}", err);
            }
            ctx.transactions_spread.write().await.cleaning_is_done();
        });
    }

    fn version_message(&self) -> VersionMessage {
        VersionMessage {
            protocol_version: PROTOCOL_VERSION,
            network: self.config.network_name(),
            id: self.node_id,
            user_agent: self.flow_config.user_agent.clone(),
            disable_relay_tx: self.flow_config.blocks_only,
            timestamp: unix_now(),
            address: self.flow_config.listen_address,
        }
    }
}

/// Whether the error reports data missing from the local store. Serving flows log these and keep going
pub fn is_not_found_error(err: &ProtocolError) -> bool {
    matches!(
        err,
        ProtocolError::ConsensusError(
            ConsensusError::BlockNotFound(_)
                | ConsensusError::HeaderNotFound(_)
                | ConsensusError::MissingData(_)
                | ConsensusError::BlockPruned(_)
                | ConsensusError::Sync(SyncManagerError::BlockNotFound(_))
        )
    )
}

#[async_trait]
impl ConnectionInitializer for FlowContext {
    async fn initialize_connection(&self, router: Arc<Router>) -> Result<(), ProtocolError> {
        // Subscribe to the handshake routes before starting the router receive loop
        let mut handshake = KestrelHandshake::new(&router);
        router.start();

        let network_name = self.config.network_name();
        let peer_version = handshake.handshake(self.version_message()).await?;

        if peer_version.id == self.node_id {
            return Err(ProtocolError::LoopbackConnection(router.key()));
        }
        if peer_version.network != network_name {
            return Err(ProtocolError::WrongNetwork(network_name, peer_version.network));
        }

        router.set_identity(peer_version.id);
        if self.hub.active_peers().iter().any(|peer| peer.identity() == peer_version.id) {
            return Err(ProtocolError::PeerAlreadyExists(router.key()));
        }

        // The highest version supported by both sides
        let protocol_version = peer_version.protocol_version.min(PROTOCOL_VERSION);
        debug!("protocol versions - self: {}, peer: {}", PROTOCOL_VERSION, peer_version.protocol_version);

        router.set_properties(Arc::new(PeerProperties {
            user_agent: peer_version.user_agent.clone(),
            advertised_protocol_version: peer_version.protocol_version,
            protocol_version,
            disable_relay_tx: peer_version.disable_relay_tx,
            time_offset: peer_version.timestamp as i64 - unix_now() as i64,
            listen_address: peer_version.address,
        }));

        let flows = match protocol_version {
            PROTOCOL_VERSION => v5::register(self.clone(), router.clone()),
            _ => return Err(ProtocolError::VersionMismatch(PROTOCOL_VERSION, peer_version.protocol_version)),
        };

        handshake.exchange_ready_messages().await?;

        info!("Registering p2p flows for peer {} for protocol version {}", router, protocol_version);

        // Flows are launched only once both sides registered their routes
        for flow in flows {
            flow.launch();
        }

        // The handshake routes are dropped here, so a repeated handshake message from the peer is a protocol error
        Ok(())
    }
}
