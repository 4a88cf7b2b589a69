pub use super::{
    constants::consensus::*,
    genesis::{DEVNET_GENESIS, GENESIS, GenesisBlock, SIMNET_GENESIS, TESTNET_GENESIS},
};
use crate::{BlockLevel, KType, constants::MAX_SOMPI, network::NetworkType};
use kestrel_math::Uint256;

/// The consensus values which vary between block versions. A network ships a schedule of
/// these keyed by activation DAA score, so the active values are always derived from the
/// DAA score of the block at hand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockVersionParams {
    pub version: u16,
    pub ghostdag_k: KType,
    /// Merge depth bound, in blue score units
    pub merge_depth: u64,
    pub max_block_mass: u64,
    /// Target time per block, in milliseconds
    pub target_time_per_block: u64,
    pub max_block_parents: u8,
    pub difficulty_window_size: usize,
    pub past_median_time_window_size: usize,
    pub mergeset_size_limit: u64,
    /// Finality duration, in milliseconds
    pub finality_duration: u64,
    pub pruning_multiplier: u64,
}

impl BlockVersionParams {
    pub const fn finality_depth(&self) -> u64 {
        self.finality_duration / self.target_time_per_block
    }

    /// The blue score distance between the pruning point and the virtual selected parent which
    /// guarantees the pruning point is in the past of any block which can still be merged
    pub const fn pruning_depth(&self) -> u64 {
        let k = self.ghostdag_k as u64;
        self.pruning_multiplier * self.finality_depth() + 4 * self.mergeset_size_limit * k + 2 * k + 2
    }

    /// Bound on coinbase outputs accepted by isolation validation. Templates built locally
    /// stay within `ghostdag_k + 2`.
    pub const fn max_coinbase_outputs(&self) -> u64 {
        2 * (self.ghostdag_k as u64 + 2)
    }

    pub const fn timestamp_deviation_tolerance(&self) -> u64 {
        TIMESTAMP_DEVIATION_TOLERANCE * self.target_time_per_block
    }
}

/// A `(activation DAA score, block version params)` schedule sorted by activation
#[derive(Clone, Copy, Debug)]
pub struct BlockVersionSchedule(&'static [(u64, BlockVersionParams)]);

impl BlockVersionSchedule {
    pub const fn new_const(entries: &'static [(u64, BlockVersionParams)]) -> Self {
        Self(entries)
    }

    /// Builds a schedule from arbitrary entries. Params live for the whole process so the entries are leaked.
    /// Panics if the list is empty or does not start at DAA score 0
    pub fn new(mut entries: Vec<(u64, BlockVersionParams)>) -> Self {
        entries.sort_by_key(|(activation, _)| *activation);
        assert!(entries.first().is_some_and(|(activation, _)| *activation == 0), "schedule must be active from genesis");
        Self(entries.leak())
    }

    pub fn single(params: BlockVersionParams) -> Self {
        Self::new(vec![(0, params)])
    }

    /// Returns the block version params active at `daa_score`. Activation is inclusive.
    pub fn get(&self, daa_score: u64) -> &BlockVersionParams {
        let idx = self.0.partition_point(|(activation, _)| *activation <= daa_score);
        &self.0[idx.saturating_sub(1)].1
    }

    /// Returns the params of a specific version if it exists in the schedule
    pub fn by_version(&self, version: u16) -> Option<&BlockVersionParams> {
        self.0.iter().map(|(_, p)| p).find(|p| p.version == version)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockVersionParams> {
        self.0.iter().map(|(_, p)| p)
    }

    pub fn max_ghostdag_k(&self) -> KType {
        self.iter().map(|p| p.ghostdag_k).max().unwrap_or_default()
    }

    pub fn max_difficulty_window_size(&self) -> usize {
        self.iter().map(|p| p.difficulty_window_size).max().unwrap_or_default()
    }

    pub fn max_past_median_time_window_size(&self) -> usize {
        self.iter().map(|p| p.past_median_time_window_size).max().unwrap_or_default()
    }

    pub fn max_mergeset_size_limit(&self) -> u64 {
        self.iter().map(|p| p.mergeset_size_limit).max().unwrap_or_default()
    }

    pub fn max_block_parents(&self) -> u8 {
        self.iter().map(|p| p.max_block_parents).max().unwrap_or_default()
    }
}

/// Which PoW matrix variant is in effect
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PowVariant {
    V1,
    V101,
    V110,
}

/// DAA scores at which the PoW matrix variants activate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowScores {
    pub v101: u64,
    pub v110: u64,
}

impl PowScores {
    pub const NEVER: u64 = u64::MAX;

    /// The active variant is the one with the greatest activation score not above `daa_score`
    pub fn variant(&self, daa_score: u64) -> PowVariant {
        let mut active = (0, PowVariant::V1);
        for (activation, variant) in [(self.v101, PowVariant::V101), (self.v110, PowVariant::V110)] {
            if activation <= daa_score && activation >= active.0 {
                active = (activation, variant);
            }
        }
        active.1
    }
}

/// Consensus parameters. Contains settings and configurations which are consensus-sensitive.
/// Changing one of these on a network node would exclude and prevent it from reaching consensus
/// with the other unmodified nodes.
#[derive(Clone, Debug)]
pub struct Params {
    pub net: NetworkType,
    pub genesis: GenesisBlock,
    pub block_versions: BlockVersionSchedule,
    pub max_difficulty_target: Uint256,
    pub max_difficulty_target_f64: f64,
    pub min_difficulty_window_len: usize,

    pub pow_scores: PowScores,
    /// Blocks of this version and above must carry their PoW hash on the wire
    pub pow_integrity_version: u16,
    /// DAA score validation is skipped for headers up to this DAA score. Used for networks
    /// which migrated their DAA rules
    pub daa_score_check_skip_until: Option<u64>,

    pub max_tx_inputs: usize,
    pub max_tx_outputs: usize,
    pub max_signature_script_len: usize,
    pub max_script_public_key_len: usize,

    pub mass_per_tx_byte: u64,
    pub mass_per_script_pub_key_byte: u64,
    pub mass_per_sig_op: u64,

    pub coinbase_payload_script_public_key_max_len: u8,
    pub max_coinbase_payload_len: usize,
    pub max_coinbase_script_public_key_len: usize,
    pub coinbase_maturity: u64,
    pub base_subsidy: u64,
    pub subsidy_halving_interval: u64,
    pub max_sompi: u64,

    pub enable_non_native_subnetworks: bool,
    pub max_block_level: BlockLevel,
    pub default_p2p_port: u16,
}

impl Params {
    /// Returns the block version params active at `daa_score`
    #[inline]
    pub fn block_version(&self, daa_score: u64) -> &BlockVersionParams {
        self.block_versions.get(daa_score)
    }

    #[inline]
    pub fn ghostdag_k(&self, daa_score: u64) -> KType {
        self.block_version(daa_score).ghostdag_k
    }

    #[inline]
    pub fn pruning_depth(&self, daa_score: u64) -> u64 {
        self.block_version(daa_score).pruning_depth()
    }

    #[inline]
    pub fn finality_depth(&self, daa_score: u64) -> u64 {
        self.block_version(daa_score).finality_depth()
    }

    pub fn genesis_hash(&self) -> kestrel_hashes::Hash {
        self.genesis.hash()
    }

    pub fn network_name(&self) -> String {
        self.net.to_string()
    }

    /// The block subsidy at `daa_score`, halving every `subsidy_halving_interval` DAA score units
    pub fn calc_block_subsidy(&self, daa_score: u64) -> u64 {
        let halvings = daa_score / self.subsidy_halving_interval;
        if halvings >= 64 { 0 } else { self.base_subsidy >> halvings }
    }
}

impl From<NetworkType> for Params {
    fn from(value: NetworkType) -> Self {
        match value {
            NetworkType::Mainnet => MAINNET_PARAMS,
            NetworkType::Testnet => TESTNET_PARAMS,
            NetworkType::Devnet => DEVNET_PARAMS,
            NetworkType::Simnet => SIMNET_PARAMS,
        }
    }
}

const MAINNET_BLOCK_VERSIONS: &[(u64, BlockVersionParams)] = &[
    (
        0,
        BlockVersionParams {
            version: 1,
            ghostdag_k: DEFAULT_GHOSTDAG_K,
            merge_depth: DEFAULT_MERGE_DEPTH,
            max_block_mass: 500_000,
            target_time_per_block: 1000,
            max_block_parents: 10,
            difficulty_window_size: DEFAULT_DIFFICULTY_WINDOW_SIZE,
            past_median_time_window_size: PAST_MEDIAN_TIME_WINDOW_SIZE,
            mergeset_size_limit: DEFAULT_MERGESET_SIZE_LIMIT,
            finality_duration: DEFAULT_FINALITY_DURATION,
            pruning_multiplier: DEFAULT_PRUNING_MULTIPLIER,
        },
    ),
    (
        30_000_000,
        BlockVersionParams {
            version: 2,
            ghostdag_k: FAST_GHOSTDAG_K,
            merge_depth: DEFAULT_MERGE_DEPTH * 2,
            max_block_mass: 500_000,
            target_time_per_block: 500,
            max_block_parents: 16,
            difficulty_window_size: DEFAULT_DIFFICULTY_WINDOW_SIZE,
            past_median_time_window_size: PAST_MEDIAN_TIME_WINDOW_SIZE,
            mergeset_size_limit: DEFAULT_MERGESET_SIZE_LIMIT * 2,
            finality_duration: DEFAULT_FINALITY_DURATION,
            pruning_multiplier: DEFAULT_PRUNING_MULTIPLIER,
        },
    ),
];

const TESTNET_BLOCK_VERSIONS: &[(u64, BlockVersionParams)] = &[(
    0,
    BlockVersionParams {
        version: 1,
        ghostdag_k: DEFAULT_GHOSTDAG_K,
        merge_depth: DEFAULT_MERGE_DEPTH,
        max_block_mass: 500_000,
        target_time_per_block: 1000,
        max_block_parents: 10,
        difficulty_window_size: DEFAULT_DIFFICULTY_WINDOW_SIZE,
        past_median_time_window_size: PAST_MEDIAN_TIME_WINDOW_SIZE,
        mergeset_size_limit: DEFAULT_MERGESET_SIZE_LIMIT,
        finality_duration: DEFAULT_FINALITY_DURATION,
        pruning_multiplier: DEFAULT_PRUNING_MULTIPLIER,
    },
)];

/// Devnet and simnet use small windows so that local networks can be mined quickly
const DEV_BLOCK_VERSIONS: &[(u64, BlockVersionParams)] = &[(
    0,
    BlockVersionParams {
        version: 1,
        ghostdag_k: DEFAULT_GHOSTDAG_K,
        merge_depth: DEFAULT_MERGE_DEPTH,
        max_block_mass: 500_000,
        target_time_per_block: 1000,
        max_block_parents: 10,
        difficulty_window_size: 264,
        past_median_time_window_size: 27,
        mergeset_size_limit: DEFAULT_MERGESET_SIZE_LIMIT,
        finality_duration: DEFAULT_FINALITY_DURATION,
        pruning_multiplier: DEFAULT_PRUNING_MULTIPLIER,
    },
)];

pub const MAINNET_PARAMS: Params = Params {
    net: NetworkType::Mainnet,
    genesis: GENESIS,
    block_versions: BlockVersionSchedule::new_const(MAINNET_BLOCK_VERSIONS),
    max_difficulty_target: MAX_DIFFICULTY_TARGET,
    max_difficulty_target_f64: MAX_DIFFICULTY_TARGET_AS_F64,
    min_difficulty_window_len: MIN_DIFFICULTY_WINDOW_LEN,

    pow_scores: PowScores { v101: 20_000_000, v110: 40_000_000 },
    pow_integrity_version: 2,
    daa_score_check_skip_until: None,

    max_tx_inputs: 1_000_000_000,
    max_tx_outputs: 1_000_000_000,
    max_signature_script_len: 1_000_000_000,
    max_script_public_key_len: 1_000_000_000,

    mass_per_tx_byte: 1,
    mass_per_script_pub_key_byte: 10,
    mass_per_sig_op: 1000,

    coinbase_payload_script_public_key_max_len: 150,
    max_coinbase_payload_len: 204,
    max_coinbase_script_public_key_len: 150,
    coinbase_maturity: DEFAULT_COINBASE_MATURITY,
    base_subsidy: DEFAULT_BASE_SUBSIDY,
    subsidy_halving_interval: DEFAULT_SUBSIDY_HALVING_INTERVAL,
    max_sompi: MAX_SOMPI,

    enable_non_native_subnetworks: false,
    max_block_level: 225,
    default_p2p_port: 17111,
};

pub const TESTNET_PARAMS: Params = Params {
    net: NetworkType::Testnet,
    genesis: TESTNET_GENESIS,
    block_versions: BlockVersionSchedule::new_const(TESTNET_BLOCK_VERSIONS),
    pow_scores: PowScores { v101: 1_000_000, v110: 2_000_000 },
    pow_integrity_version: 1,
    enable_non_native_subnetworks: true,
    default_p2p_port: 17211,
    ..MAINNET_PARAMS
};

pub const DEVNET_PARAMS: Params = Params {
    net: NetworkType::Devnet,
    genesis: DEVNET_GENESIS,
    block_versions: BlockVersionSchedule::new_const(DEV_BLOCK_VERSIONS),
    pow_scores: PowScores { v101: PowScores::NEVER, v110: PowScores::NEVER },
    pow_integrity_version: 1,
    enable_non_native_subnetworks: true,
    default_p2p_port: 17611,
    ..MAINNET_PARAMS
};

pub const SIMNET_PARAMS: Params = Params {
    net: NetworkType::Simnet,
    genesis: SIMNET_GENESIS,
    block_versions: BlockVersionSchedule::new_const(DEV_BLOCK_VERSIONS),
    pow_scores: PowScores { v101: PowScores::NEVER, v110: PowScores::NEVER },
    pow_integrity_version: 1,
    coinbase_maturity: 10,
    enable_non_native_subnetworks: true,
    default_p2p_port: 17511,
    ..MAINNET_PARAMS
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pruning_depth_formula() {
        let mut p = *SIMNET_PARAMS.block_version(0);
        p.ghostdag_k = 0;
        p.finality_duration = 2 * p.target_time_per_block;
        assert_eq!(p.finality_depth(), 2);
        assert_eq!(p.pruning_depth(), 6);
        assert_eq!(MAINNET_PARAMS.block_version(0).max_coinbase_outputs(), 40);
    }

    #[test]
    fn test_block_version_schedule_boundaries() {
        let schedule = &MAINNET_PARAMS.block_versions;
        assert_eq!(schedule.get(0).version, 1);
        assert_eq!(schedule.get(29_999_999).version, 1);
        assert_eq!(schedule.get(30_000_000).version, 2);
        assert_eq!(schedule.get(u64::MAX).version, 2);
        assert_eq!(schedule.max_ghostdag_k(), FAST_GHOSTDAG_K);
        assert_eq!(schedule.by_version(2).unwrap().ghostdag_k, FAST_GHOSTDAG_K);
        assert!(schedule.by_version(3).is_none());
    }

    #[test]
    fn test_pow_variant_activation_is_inclusive() {
        let scores = PowScores { v101: 100, v110: 200 };
        assert_eq!(scores.variant(0), PowVariant::V1);
        assert_eq!(scores.variant(99), PowVariant::V1);
        assert_eq!(scores.variant(100), PowVariant::V101);
        assert_eq!(scores.variant(199), PowVariant::V101);
        assert_eq!(scores.variant(200), PowVariant::V110);
        let never = PowScores { v101: PowScores::NEVER, v110: PowScores::NEVER };
        assert_eq!(never.variant(u64::MAX - 1), PowVariant::V1);
    }

    #[test]
    fn test_subsidy_halving() {
        let p = &MAINNET_PARAMS;
        assert_eq!(p.calc_block_subsidy(0), p.base_subsidy);
        assert_eq!(p.calc_block_subsidy(p.subsidy_halving_interval), p.base_subsidy / 2);
        assert_eq!(p.calc_block_subsidy(p.subsidy_halving_interval * 100), 0);
    }
}
