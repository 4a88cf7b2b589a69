use kestrel_consensus::{
    consensus::{Consensus, factory::Factory as ConsensusFactory},
    pipeline::{ProcessingCounters, monitor::ConsensusMonitor},
};
use kestrel_consensus_core::{
    api::ConsensusApi,
    coinbase::MinerData,
    config::Config,
    errors::consensus::ConsensusError,
    notify::ConsensusNotificationRoot,
};
use kestrel_core::{info, signals::Shutdown, warn};
use kestrel_database::prelude::DB;
use kestrel_mining::{
    MiningCounters,
    manager::{MiningManager, MiningManagerProxy},
    mempool::config::Config as MempoolConfig,
};
use kestrel_p2p_flows::{
    flow_context::{FlowConfig, FlowContext},
    flowcontext::transactions::BROADCAST_INTERVAL,
};
use kestrel_p2p_lib::{Adaptor, ConnectionError, config::P2pConfig};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Upper bound of a graceful shutdown. Beyond it the process exits abortively
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// Clean shutdown
pub const EXIT_SUCCESS: i32 = 0;
/// Fatal error while starting or running
pub const EXIT_FAILURE: i32 = 1;
/// Invalid invocation
pub const EXIT_INVALID_INVOCATION: i32 = 2;

const DEFAULT_DB_FILES_LIMIT: i32 = 512;
const MONITOR_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("consensus: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("p2p: {0}")]
    Connection(#[from] ConnectionError),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

/// Everything needed to assemble a node, already resolved from the command line or built by a test harness
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub config: Arc<Config>,
    pub mempool_config: MempoolConfig,
    pub flow_config: FlowConfig,
    pub p2p_config: P2pConfig,
    pub data_dir: PathBuf,
    /// Address the P2P server binds to. Port 0 picks a free port
    pub listen_address: String,
    /// Peers dialed once the node is up
    pub connect_peers: Vec<String>,
    /// Delete the consensus database before opening it
    pub reset_db: bool,
    pub block_template_cache_lifetime: Option<u64>,
    pub miner_data: Option<MinerData>,
}

/// A running node: consensus, mempool and the P2P layer wired together
pub struct Daemon {
    consensus: Arc<Consensus>,
    db: Arc<DB>,
    notification_root: Arc<ConsensusNotificationRoot>,
    mining_manager: MiningManagerProxy,
    flow_context: FlowContext,
    adaptor: Arc<Adaptor>,
    miner_data: Option<MinerData>,
    shutdown: Shutdown,
    tick_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
}

impl Daemon {
    /// Opens the database, builds all services and starts serving P2P. Peers listed in the config are dialed
    /// before returning; a peer which cannot be reached is logged and skipped
    pub async fn start(node_config: NodeConfig, shutdown: Shutdown) -> DaemonResult<Self> {
        let NodeConfig {
            config,
            mempool_config,
            flow_config,
            p2p_config,
            data_dir,
            listen_address,
            connect_peers,
            reset_db,
            block_template_cache_lifetime,
            miner_data,
        } = node_config;

        info!("Starting a {} node with data directory {}", config.network_name(), data_dir.display());
        let factory = ConsensusFactory::new(data_dir, config.clone(), num_cpus::get(), DEFAULT_DB_FILES_LIMIT);
        if reset_db && factory.db_dir().exists() {
            factory.reset()?;
        }

        let notification_root = Arc::new(ConsensusNotificationRoot::new());
        let counters = Arc::new(ProcessingCounters::default());
        let (consensus, db) = factory.open(notification_root.clone(), counters.clone())?;
        let monitor_task = tokio::spawn(ConsensusMonitor::new(counters, MONITOR_INTERVAL).run(shutdown.listener()));

        let mining_counters = Arc::new(MiningCounters::default());
        let mining_manager =
            MiningManagerProxy::new(Arc::new(MiningManager::new(mempool_config, block_template_cache_lifetime, mining_counters)));

        let hub = Adaptor::new_hub(&p2p_config);
        let flow_context = FlowContext::new(
            consensus.clone(),
            config.clone(),
            flow_config,
            hub.clone(),
            mining_manager.clone(),
            notification_root.clone(),
        );
        let adaptor = Adaptor::bidirectional(&listen_address, hub, Arc::new(flow_context.clone()), &p2p_config).await?;
        info!("P2P server listening on {}", adaptor.server_address().map(|a| a.to_string()).unwrap_or_default());

        let tick_task = tokio::spawn(tick_transactions(flow_context.clone(), shutdown.clone()));

        for peer in connect_peers {
            match adaptor.connect_peer(&peer).await {
                Ok(key) => info!("Connected to peer {}", key),
                Err(err) => warn!("Failed connecting to peer {}: {}", peer, err),
            }
        }

        Ok(Self {
            consensus,
            db,
            notification_root,
            mining_manager,
            flow_context,
            adaptor,
            miner_data,
            shutdown,
            tick_task,
            monitor_task,
        })
    }

    pub fn consensus(&self) -> Arc<Consensus> {
        self.consensus.clone()
    }

    pub fn flow_context(&self) -> &FlowContext {
        &self.flow_context
    }

    pub fn mining_manager(&self) -> MiningManagerProxy {
        self.mining_manager.clone()
    }

    pub fn notification_root(&self) -> Arc<ConsensusNotificationRoot> {
        self.notification_root.clone()
    }

    pub fn adaptor(&self) -> &Arc<Adaptor> {
        &self.adaptor
    }

    pub fn p2p_address(&self) -> Option<SocketAddr> {
        self.adaptor.server_address()
    }

    pub fn miner_data(&self) -> Option<&MinerData> {
        self.miner_data.as_ref()
    }

    /// Dials `peer_address`, retrying for a while if it is not reachable yet
    pub async fn connect_peer(&self, peer_address: &str) -> DaemonResult<()> {
        self.adaptor.connect_peer(peer_address).await?;
        Ok(())
    }

    /// Stops the P2P layer, waits for every flow to let go of consensus and closes the database. Callers
    /// bound the wait with [`SHUTDOWN_TIMEOUT`]
    pub async fn stop(self) {
        info!("Stopping the node");
        self.shutdown.trigger();
        self.adaptor.close().await;
        if let Err(err) = self.tick_task.await {
            warn!("Transaction ticker ended abnormally: {}", err);
        }
        if let Err(err) = self.monitor_task.await {
            warn!("Consensus monitor ended abnormally: {}", err);
        }

        let Self { consensus, db, flow_context, adaptor, mining_manager, .. } = self;
        drop(adaptor);
        drop(flow_context);
        drop(mining_manager);

        // Flows and the hub event loop hold consensus until they observe the closed connections
        while Arc::strong_count(&consensus) > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sink = consensus.get_sink();
        drop(consensus);
        drop(db);
        info!("Node stopped with sink {}", sink);
    }
}

/// Flushes transaction invs whose broadcast was deferred by pacing
async fn tick_transactions(flow_context: FlowContext, shutdown: Shutdown) {
    let listener = shutdown.listener();
    tokio::pin!(listener);
    loop {
        tokio::select! {
            _ = &mut listener => break,
            _ = tokio::time::sleep(BROADCAST_INTERVAL) => flow_context.flush_transactions().await,
        }
    }
}
