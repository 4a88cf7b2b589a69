use crate::daemon::NodeConfig;
use clap::Parser;
use kestrel_consensus_core::{
    coinbase::MinerData,
    config::{Config, ConfigBuilder},
    network::NetworkType,
    tx::ScriptPublicKey,
};
use kestrel_mining::mempool::config::Config as MempoolConfig;
use kestrel_p2p_flows::flow_context::{FlowConfig, PROTOCOL_VERSION};
use kestrel_p2p_lib::config::P2pConfig;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;

const DEFAULT_DATA_DIR: &str = "datadir";
const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgsError {
    #[error("--logdir cannot be combined with --nologfiles")]
    MixedLogDirAndNoLogFiles,

    #[error("unsupported protocol version {0}, this node speaks version {1}")]
    UnsupportedProtocolVersion(u32, u32),

    #[error("invalid mining script public key: {0}")]
    InvalidMiningScript(String),

    #[error("--async-threads must be positive")]
    ZeroAsyncThreads,
}

/// Command line arguments of the node
#[derive(Parser, Debug, Clone)]
#[command(name = "kestreld", version, about = "Kestrel full node daemon")]
pub struct Args {
    /// Network to join: mainnet, testnet, devnet or simnet
    #[arg(long, env = "KESTREL_NETWORK", default_value_t = NetworkType::Mainnet)]
    pub network: NetworkType,

    /// Directory to store data
    #[arg(long = "appdir", short = 'b')]
    pub app_dir: Option<PathBuf>,

    /// Directory to log output
    #[arg(long = "logdir")]
    pub log_dir: Option<PathBuf>,

    /// Disable logging to files
    #[arg(long = "nologfiles")]
    pub no_log_files: bool,

    /// Logging level for all subsystems {off, error, warn, info, debug, trace}. May also hold
    /// comma separated module=level items
    #[arg(long = "loglevel", short = 'd', default_value = "info")]
    pub log_level: String,

    /// Delete the data directory before starting
    #[arg(long = "reset-db")]
    pub reset_db: bool,

    /// Interface:port to listen for P2P connections (default all interfaces on the network port)
    #[arg(long)]
    pub listen: Option<String>,

    /// Connect only to the specified peers at startup
    #[arg(long = "connect")]
    pub connect_peers: Vec<String>,

    /// Maximum number of peers dialed at startup
    #[arg(long = "outpeers", default_value_t = 8)]
    pub outbound_target: usize,

    /// P2P protocol version to speak
    #[arg(long = "protocol-version", default_value_t = PROTOCOL_VERSION)]
    pub protocol_version: u32,

    /// Maintain the address to outpoint reverse index
    #[arg(long = "utxoindex")]
    pub utxo_index: bool,

    /// Do not disconnect and ban misbehaving peers
    #[arg(long = "nobanning")]
    pub disable_banning: bool,

    /// How long a misbehaving peer stays banned, in seconds
    #[arg(long = "banduration", default_value_t = 24 * 60 * 60)]
    pub ban_duration_secs: u64,

    /// Accept blocks from miners while the node is not synced. Needed for starting a new network
    #[arg(long = "enable-unsynced-mining")]
    pub enable_unsynced_mining: bool,

    /// Do not accept or relay transactions
    #[arg(long = "blocksonly")]
    pub blocks_only: bool,

    /// Relax standardness rules of the mempool
    #[arg(long = "relaynonstd")]
    pub accept_non_standard: bool,

    /// Hex encoded script public key block rewards are paid to
    #[arg(long = "mining-script")]
    pub mining_script: Option<String>,

    /// Extra data to put in the coinbase payload of built templates
    #[arg(long = "extra-data", default_value = "")]
    pub extra_data: String,

    /// Keep all blocks instead of pruning them
    #[arg(long)]
    pub archival: bool,

    /// Enable compute-intensive consistency checks
    #[arg(long)]
    pub sanity: bool,

    /// Number of worker threads of the async runtime
    #[arg(long = "async-threads", short = 't', default_value_t = num_cpus::get())]
    pub async_threads: usize,

    /// Lifetime of a cached block template, in milliseconds
    #[arg(long = "block-template-cache-lifetime")]
    pub block_template_cache_lifetime: Option<u64>,
}

/// Parses the process arguments. Invalid invocations print the usage and exit with code 2
pub fn parse_args() -> Args {
    Args::parse()
}

impl Args {
    pub fn validate(&self) -> Result<(), ArgsError> {
        if self.log_dir.is_some() && self.no_log_files {
            return Err(ArgsError::MixedLogDirAndNoLogFiles);
        }
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(ArgsError::UnsupportedProtocolVersion(self.protocol_version, PROTOCOL_VERSION));
        }
        if self.async_threads == 0 {
            return Err(ArgsError::ZeroAsyncThreads);
        }
        self.miner_data()?;
        Ok(())
    }

    /// The network specific data directory
    pub fn data_dir(&self) -> PathBuf {
        self.app_dir.clone().unwrap_or_else(default_app_dir).join(self.network.to_string()).join(DEFAULT_DATA_DIR)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        if self.no_log_files {
            return None;
        }
        Some(match &self.log_dir {
            Some(dir) => dir.clone(),
            None => self.app_dir.clone().unwrap_or_else(default_app_dir).join(self.network.to_string()).join(DEFAULT_LOG_DIR),
        })
    }

    pub fn miner_data(&self) -> Result<Option<MinerData>, ArgsError> {
        let Some(script) = &self.mining_script else {
            return Ok(None);
        };
        if script.len() % 2 != 0 {
            return Err(ArgsError::InvalidMiningScript(format!("odd hex length {}", script.len())));
        }
        let mut bytes = vec![0u8; script.len() / 2];
        faster_hex::hex_decode(script.as_bytes(), &mut bytes).map_err(|err| ArgsError::InvalidMiningScript(err.to_string()))?;
        Ok(Some(MinerData::new(ScriptPublicKey::from_vec(0, bytes), self.extra_data.as_bytes().to_vec())))
    }

    pub fn apply_to_config(&self, config: &mut Config) {
        config.utxo_index = self.utxo_index;
        config.accept_non_standard = self.accept_non_standard;
        config.allow_submit_block_when_not_synced = self.enable_unsynced_mining;
        config.is_archival = self.archival;
        config.enable_sanity_checks = self.sanity;
    }

    pub fn to_config(&self) -> Config {
        ConfigBuilder::new(self.network.into()).apply_args(|config| self.apply_to_config(config)).build()
    }

    pub fn to_node_config(&self) -> Result<NodeConfig, ArgsError> {
        let config = Arc::new(self.to_config());
        let version = config.block_version(0);
        let mempool_config =
            MempoolConfig::build_default(version.target_time_per_block, config.accept_non_standard, version.max_block_mass);
        let listen_address = self.listen.clone().unwrap_or_else(|| format!("0.0.0.0:{}", config.default_p2p_port));
        let flow_config = FlowConfig {
            blocks_only: self.blocks_only,
            listen_address: listen_address.parse::<SocketAddr>().ok().filter(|address| !address.ip().is_unspecified()),
            ..Default::default()
        };
        let p2p_config = P2pConfig {
            enable_banning: !self.disable_banning,
            ban_duration: Duration::from_secs(self.ban_duration_secs),
            ..Default::default()
        };

        Ok(NodeConfig {
            config,
            mempool_config,
            flow_config,
            p2p_config,
            data_dir: self.data_dir(),
            listen_address,
            connect_peers: self.connect_peers.iter().take(self.outbound_target).cloned().collect(),
            reset_db: self.reset_db,
            block_template_cache_lifetime: self.block_template_cache_lifetime,
            miner_data: self.miner_data()?,
        })
    }
}

fn default_app_dir() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    home.join(".kestrel")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("kestreld").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_args_to_node_config() {
        let args = parse(&[
            "--network",
            "simnet",
            "--appdir",
            "/tmp/kestrel-args-test",
            "--listen",
            "127.0.0.1:17511",
            "--connect",
            "127.0.0.1:17512",
            "--connect",
            "127.0.0.1:17513",
            "--outpeers",
            "1",
            "--blocksonly",
            "--utxoindex",
            "--nobanning",
            "--mining-script",
            "20aabb",
        ]);
        args.validate().unwrap();

        let node_config = args.to_node_config().unwrap();
        assert_eq!(node_config.config.net, NetworkType::Simnet);
        assert!(node_config.config.utxo_index);
        assert!(node_config.flow_config.blocks_only);
        assert_eq!(node_config.flow_config.listen_address, Some("127.0.0.1:17511".parse().unwrap()));
        assert!(!node_config.p2p_config.enable_banning);
        assert_eq!(node_config.connect_peers, vec!["127.0.0.1:17512".to_owned()]);
        assert_eq!(node_config.data_dir, PathBuf::from("/tmp/kestrel-args-test/simnet/datadir"));
        assert_eq!(node_config.miner_data.unwrap().script_public_key.script(), &[0x20, 0xaa, 0xbb]);
    }

    #[test]
    fn test_invalid_invocations() {
        assert_eq!(
            parse(&["--logdir", "/tmp/logs", "--nologfiles"]).validate(),
            Err(ArgsError::MixedLogDirAndNoLogFiles)
        );
        assert_eq!(
            parse(&["--protocol-version", "4"]).validate(),
            Err(ArgsError::UnsupportedProtocolVersion(4, PROTOCOL_VERSION))
        );
        assert!(matches!(parse(&["--mining-script", "abc"]).validate(), Err(ArgsError::InvalidMiningScript(_))));
        assert!(Args::try_parse_from(["kestreld", "--network", "moonnet"]).is_err());
    }

    #[test]
    fn test_default_listen_address_is_not_advertised() {
        let node_config = parse(&["--network", "devnet"]).to_node_config().unwrap();
        assert_eq!(node_config.listen_address, format!("0.0.0.0:{}", NetworkType::Devnet.default_p2p_port()));
        assert_eq!(node_config.flow_config.listen_address, None);
    }
}
