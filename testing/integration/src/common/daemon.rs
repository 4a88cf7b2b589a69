use crate::common::utils::wait_for;
use kestrel_consensus::consensus::Consensus;
use kestrel_consensus_core::{
    api::{BlockCount, ConsensusApi, DynConsensus},
    coinbase::MinerData,
    config::{Config, ConfigBuilder, params::SIMNET_PARAMS},
    tx::Transaction,
};
use kestrel_core::signals::Shutdown;
use kestrel_database::utils::get_kestrel_tempdir;
use kestrel_hashes::Hash;
use kestrel_mining::{
    errors::MiningManagerResult,
    mempool::{
        config::Config as MempoolConfig,
        tx::{Orphan, Priority},
    },
};
use kestrel_p2p_flows::flow_context::{FlowConfig, SubmitBlockRejectReason};
use kestrel_p2p_lib::config::P2pConfig;
use kestrel_txscript::standard::test_helpers::op_true_script;
use kestreld_lib::daemon::{Daemon, NodeConfig};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

static NODE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Simnet with PoW validation off. Nodes accept locally mined blocks before they are synced
pub fn simnet_config() -> ConfigBuilder {
    ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().apply_args(|config| config.allow_submit_block_when_not_synced = true)
}

/// Mempool config matching `config`, relaying non standard transactions so anyone-can-spend outputs are usable
pub fn mempool_config(config: &Config) -> MempoolConfig {
    let version = config.block_version(0);
    MempoolConfig::build_default(version.target_time_per_block, true, version.max_block_mass)
}

/// An in-process node listening on a random localhost port, with its data in a temporary directory
pub struct Node {
    daemon: Option<Daemon>,
    miner_data: MinerData,
    _appdir_tempdir: TempDir,
}

impl Node {
    pub async fn start(config: Config) -> Node {
        let mempool_config = mempool_config(&config);
        Self::start_with_mempool_config(config, mempool_config).await
    }

    pub async fn start_with_mempool_config(config: Config, mempool_config: MempoolConfig) -> Node {
        let appdir_tempdir = get_kestrel_tempdir().unwrap();
        // Distinct extra data keeps coinbase transactions, and thus blocks, of different nodes apart
        let node_id = NODE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let miner_data = MinerData::new(op_true_script(), node_id.to_le_bytes().to_vec());
        let node_config = NodeConfig {
            config: Arc::new(config),
            mempool_config,
            flow_config: FlowConfig::default(),
            p2p_config: P2pConfig::default(),
            data_dir: appdir_tempdir.path().join("datadir"),
            listen_address: "127.0.0.1:0".to_owned(),
            connect_peers: vec![],
            reset_db: false,
            block_template_cache_lifetime: None,
            miner_data: Some(miner_data.clone()),
        };
        let daemon = Daemon::start(node_config, Shutdown::new()).await.unwrap();
        Node { daemon: Some(daemon), miner_data, _appdir_tempdir: appdir_tempdir }
    }

    pub fn daemon(&self) -> &Daemon {
        self.daemon.as_ref().expect("the node is running")
    }

    pub fn consensus(&self) -> Arc<Consensus> {
        self.daemon().consensus()
    }

    pub fn sink(&self) -> Hash {
        self.consensus().get_sink()
    }

    pub fn block_count(&self) -> BlockCount {
        self.consensus().get_block_count()
    }

    pub fn peer_count(&self) -> usize {
        self.daemon().adaptor().active_peers().len()
    }

    pub fn p2p_address(&self) -> String {
        let port = self.daemon().p2p_address().expect("the node listens").port();
        format!("127.0.0.1:{port}")
    }

    /// Dials `other` and waits until both sides registered the connection
    pub async fn connect(&self, other: &Node) {
        let (own_peers, other_peers) = (self.peer_count(), other.peer_count());
        self.daemon().connect_peer(&other.p2p_address()).await.unwrap();
        wait_for(
            50,
            100,
            || self.peer_count() > own_peers && other.peer_count() > other_peers,
            "the peers did not register the connection",
        )
        .await;
        // Let the accepting side launch its flows
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    /// Builds a template on top of the current virtual and submits it as a local miner would
    pub async fn mine_block(&self) -> Hash {
        let consensus: DynConsensus = self.consensus();
        let template = self.daemon().mining_manager().get_block_template(consensus, self.miner_data.clone()).await.unwrap();
        let block = template.block.to_immutable();
        let hash = block.hash();
        assert_eq!(self.daemon().flow_context().submit_block(block).await, SubmitBlockRejectReason::None, "block {hash} was rejected");
        hash
    }

    pub async fn mine_blocks(&self, count: u64) -> Vec<Hash> {
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            hashes.push(self.mine_block().await);
        }
        hashes
    }

    pub async fn submit_transaction(&self, transaction: Transaction) -> MiningManagerResult<Vec<Arc<Transaction>>> {
        self.daemon()
            .mining_manager()
            .validate_and_insert_transaction(self.consensus(), transaction, Priority::High, Orphan::Forbidden)
            .await
    }

    pub async fn stop(mut self) {
        if let Some(daemon) = self.daemon.take() {
            daemon.stop().await;
        }
    }
}
