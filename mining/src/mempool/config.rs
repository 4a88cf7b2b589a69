use kestrel_consensus_core::tx::ScriptPublicKey;

pub(crate) const DEFAULT_MAXIMUM_TRANSACTION_COUNT: usize = 1_000_000;
pub(crate) const DEFAULT_MAXIMUM_MEMPOOL_MASS: u64 = 2_000_000_000;
pub(crate) const DEFAULT_MAXIMUM_BUILD_BLOCK_TEMPLATE_ATTEMPTS: u64 = 5;

pub(crate) const DEFAULT_TRANSACTION_EXPIRE_INTERVAL_SECONDS: u64 = 60;
pub(crate) const DEFAULT_TRANSACTION_EXPIRE_SCAN_INTERVAL_SECONDS: u64 = 10;
pub(crate) const DEFAULT_ORPHAN_EXPIRE_INTERVAL_SECONDS: u64 = 60;
pub(crate) const DEFAULT_ORPHAN_EXPIRE_SCAN_INTERVAL_SECONDS: u64 = 10;

pub(crate) const DEFAULT_MAXIMUM_ORPHAN_TRANSACTION_MASS: u64 = 100_000;
pub(crate) const DEFAULT_MAXIMUM_ORPHAN_TRANSACTION_COUNT: u64 = 50;

/// DEFAULT_MINIMUM_RELAY_TRANSACTION_FEE specifies the minimum transaction fee for a transaction to be accepted to
/// the mempool and relayed. It is specified in sompi per 1kg (or 1000 grams) of transaction mass.
pub(crate) const DEFAULT_MINIMUM_RELAY_TRANSACTION_FEE: u64 = 1000;

/// Standard transaction version range
pub(crate) const DEFAULT_MINIMUM_STANDARD_TRANSACTION_VERSION: u16 = 0;
pub(crate) const DEFAULT_MAXIMUM_STANDARD_TRANSACTION_VERSION: u16 = 0;

/// A transaction spending at least this many inputs is a compound transaction
pub const DEFAULT_COMPOUND_INPUT_THRESHOLD: usize = 10;
/// A transaction at least this heavy is a compound transaction whatever its input count
pub const DEFAULT_COMPOUND_MASS_THRESHOLD: u64 = 50_000;
/// Compound transactions a single sender may submit within one window
pub const DEFAULT_COMPOUND_RATE_LIMIT: usize = 10;
pub const DEFAULT_COMPOUND_RATE_LIMIT_WINDOW_MILLISECONDS: u64 = 60_000;

/// Block mass kept aside for the coinbase transaction when selecting mempool transactions
pub(crate) const COINBASE_MASS_RESERVE: u64 = 10_000;

#[derive(Clone, Debug)]
pub struct Config {
    pub maximum_transaction_count: usize,
    pub maximum_mempool_mass: u64,
    pub maximum_build_block_template_attempts: u64,
    pub transaction_expire_interval_daa_score: u64,
    pub transaction_expire_scan_interval_daa_score: u64,
    pub orphan_expire_interval_daa_score: u64,
    pub orphan_expire_interval_milliseconds: u64,
    pub orphan_expire_scan_interval_daa_score: u64,
    pub maximum_orphan_transaction_mass: u64,
    pub maximum_orphan_transaction_count: u64,
    pub accept_non_standard: bool,
    pub maximum_mass_per_block: u64,
    pub minimum_relay_transaction_fee: u64,
    pub minimum_standard_transaction_version: u16,
    pub maximum_standard_transaction_version: u16,
    pub compound_input_threshold: usize,
    pub compound_mass_threshold: u64,
    pub compound_rate_limit: usize,
    pub compound_rate_limit_window_milliseconds: u64,
    /// Scripts no transaction may spend from or pay to
    pub frozen_scripts: Vec<ScriptPublicKey>,
}

impl Config {
    /// Build a default config.
    /// The arguments should be obtained from the current consensus [`kestrel_consensus_core::config::params::Params`] instance.
    pub fn build_default(target_milliseconds_per_block: u64, relay_non_std_transactions: bool, max_block_mass: u64) -> Self {
        let target_milliseconds_per_block = target_milliseconds_per_block.max(1);
        let to_daa_score = |seconds: u64| (seconds * 1000 / target_milliseconds_per_block).max(1);
        Self {
            maximum_transaction_count: DEFAULT_MAXIMUM_TRANSACTION_COUNT,
            maximum_mempool_mass: DEFAULT_MAXIMUM_MEMPOOL_MASS,
            maximum_build_block_template_attempts: DEFAULT_MAXIMUM_BUILD_BLOCK_TEMPLATE_ATTEMPTS,
            transaction_expire_interval_daa_score: to_daa_score(DEFAULT_TRANSACTION_EXPIRE_INTERVAL_SECONDS),
            transaction_expire_scan_interval_daa_score: to_daa_score(DEFAULT_TRANSACTION_EXPIRE_SCAN_INTERVAL_SECONDS),
            orphan_expire_interval_daa_score: to_daa_score(DEFAULT_ORPHAN_EXPIRE_INTERVAL_SECONDS),
            orphan_expire_interval_milliseconds: DEFAULT_ORPHAN_EXPIRE_INTERVAL_SECONDS * 1000,
            orphan_expire_scan_interval_daa_score: to_daa_score(DEFAULT_ORPHAN_EXPIRE_SCAN_INTERVAL_SECONDS),
            maximum_orphan_transaction_mass: DEFAULT_MAXIMUM_ORPHAN_TRANSACTION_MASS,
            maximum_orphan_transaction_count: DEFAULT_MAXIMUM_ORPHAN_TRANSACTION_COUNT,
            accept_non_standard: relay_non_std_transactions,
            maximum_mass_per_block: max_block_mass,
            minimum_relay_transaction_fee: DEFAULT_MINIMUM_RELAY_TRANSACTION_FEE,
            minimum_standard_transaction_version: DEFAULT_MINIMUM_STANDARD_TRANSACTION_VERSION,
            maximum_standard_transaction_version: DEFAULT_MAXIMUM_STANDARD_TRANSACTION_VERSION,
            compound_input_threshold: DEFAULT_COMPOUND_INPUT_THRESHOLD,
            compound_mass_threshold: DEFAULT_COMPOUND_MASS_THRESHOLD,
            compound_rate_limit: DEFAULT_COMPOUND_RATE_LIMIT,
            compound_rate_limit_window_milliseconds: DEFAULT_COMPOUND_RATE_LIMIT_WINDOW_MILLISECONDS,
            frozen_scripts: vec![],
        }
    }

    pub fn with_frozen_scripts(mut self, frozen_scripts: Vec<ScriptPublicKey>) -> Self {
        self.frozen_scripts = frozen_scripts;
        self
    }

    pub fn with_compound_rate_limit(mut self, limit: usize, window_milliseconds: u64) -> Self {
        self.compound_rate_limit = limit;
        self.compound_rate_limit_window_milliseconds = window_milliseconds;
        self
    }

    /// Mass available to mempool transactions in a block template
    pub(crate) fn block_template_mass_budget(&self) -> u64 {
        self.maximum_mass_per_block.saturating_sub(COINBASE_MASS_RESERVE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daa_score_intervals_follow_block_rate() {
        let config = Config::build_default(1000, false, 500_000);
        assert_eq!(config.transaction_expire_interval_daa_score, 60);
        assert_eq!(config.orphan_expire_scan_interval_daa_score, 10);
        assert_eq!(config.orphan_expire_interval_milliseconds, 60_000);

        let fast = Config::build_default(100, false, 500_000);
        assert_eq!(fast.transaction_expire_interval_daa_score, 600);
        assert_eq!(fast.block_template_mass_budget(), 500_000 - COINBASE_MASS_RESERVE);
    }
}
