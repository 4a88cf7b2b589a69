pub mod consensus {
    //!
    //! A module for constants which directly impact consensus.
    //!

    use kestrel_math::Uint256;

    //
    // ~~~~~~~~~~~~~~~~~~~~~~~~~ Network & Ghostdag ~~~~~~~~~~~~~~~~~~~~~~~~~
    //

    /// Default K for 1 BPS networks
    pub const DEFAULT_GHOSTDAG_K: crate::KType = 18;

    /// Default K for the high-throughput block version
    pub const FAST_GHOSTDAG_K: crate::KType = 40;

    //
    // ~~~~~~~~~~~~~~~~~~ Timestamp deviation & Median time ~~~~~~~~~~~~~~~~~~
    //

    /// Timestamp deviation tolerance, in blocks (multiplied by the target time per block)
    pub const TIMESTAMP_DEVIATION_TOLERANCE: u64 = 132;

    /// Size of the past median time window
    pub const PAST_MEDIAN_TIME_WINDOW_SIZE: usize = (2 * TIMESTAMP_DEVIATION_TOLERANCE - 1) as usize;

    //
    // ~~~~~~~~~~~~~~~~~~~~~~~~~ Max difficulty target ~~~~~~~~~~~~~~~~~~~~~~~~~
    //

    /// Highest proof of work difficulty target a block can have for all networks.
    /// This value is: 2^255 - 1.
    pub const MAX_DIFFICULTY_TARGET: Uint256 =
        Uint256([18446744073709551615, 18446744073709551615, 18446744073709551615, 9223372036854775807]);

    /// Highest proof of work difficulty target as a floating number
    pub const MAX_DIFFICULTY_TARGET_AS_F64: f64 = 5.78960446186581e76;

    //
    // ~~~~~~~~~~~~~~~~~~~ Difficulty Adjustment Algorithm (DAA) ~~~~~~~~~~~~~~~~~~~
    //

    /// Minimal size of the difficulty window. Below it the genesis difficulty is kept
    pub const MIN_DIFFICULTY_WINDOW_LEN: usize = 2;

    /// Difficulty adjustment window size
    pub const DEFAULT_DIFFICULTY_WINDOW_SIZE: usize = 2641;

    //
    // ~~~~~~~~~~~~~~~~~~~ Finality & Pruning ~~~~~~~~~~~~~~~~~~~
    //

    /// Finality duration in milliseconds (24 hours)
    pub const DEFAULT_FINALITY_DURATION: u64 = 86_400_000;

    /// Multiplier of the finality depth in the pruning depth formula
    pub const DEFAULT_PRUNING_MULTIPLIER: u64 = 2;

    /// Default merge depth bound, in blue score units
    pub const DEFAULT_MERGE_DEPTH: u64 = 3600;

    /// Default limit on the merge set size
    pub const DEFAULT_MERGESET_SIZE_LIMIT: u64 = 180;

    //
    // ~~~~~~~~~~~~~~~~~~~ Coinbase ~~~~~~~~~~~~~~~~~~~
    //

    /// Coinbase maturity, in DAA score units
    pub const DEFAULT_COINBASE_MATURITY: u64 = 100;

    /// Block subsidy at genesis, in sompi
    pub const DEFAULT_BASE_SUBSIDY: u64 = 50 * crate::constants::SOMPI_PER_KESTREL;

    /// The subsidy halves every this many DAA score units (roughly a year at 1 BPS)
    pub const DEFAULT_SUBSIDY_HALVING_INTERVAL: u64 = 31_536_000;
}

pub mod perf {
    //!
    //! A module for performance critical constants which depend on consensus parameters.
    //! The constants in this module should all be revisited if mainnet consensus parameters change.
    //!

    /// The default target depth for reachability reindexes.
    pub const DEFAULT_REINDEX_DEPTH: u64 = 100;

    /// The default slack interval used by the reachability
    /// algorithm to encounter for blocks out of the selected chain.
    pub const DEFAULT_REINDEX_SLACK: u64 = 1 << 12;

    #[derive(Clone, Debug)]
    pub struct PerfParams {
        /// Preferred cache size for header-related data
        pub header_data_cache_size: usize,

        /// Preferred cache size for block-body-related data which
        /// is typically orders-of magnitude larger than header data
        pub block_data_cache_size: usize,

        /// Preferred cache size for UTXO-related data
        pub utxo_set_cache_size: usize,

        /// Preferred cache size for block-window-related data
        pub block_window_cache_size: usize,

        /// Number of threads for parallel transaction validation. Zero means
        /// the system default, typically the number of logical CPU cores
        pub virtual_processor_num_threads: usize,
    }

    pub const PERF_PARAMS: PerfParams = PerfParams {
        header_data_cache_size: 10_000,
        block_data_cache_size: 200,
        utxo_set_cache_size: 10_000,
        block_window_cache_size: 2000,
        virtual_processor_num_threads: 0,
    };
}

#[cfg(test)]
mod tests {
    use super::consensus::{MAX_DIFFICULTY_TARGET, MAX_DIFFICULTY_TARGET_AS_F64};
    use kestrel_math::Uint256;

    #[test]
    fn test_difficulty_max_consts() {
        assert_eq!(MAX_DIFFICULTY_TARGET, Uint256::from_u64(1).wrapping_shl(255) - Uint256::from_u64(1));
        assert!((MAX_DIFFICULTY_TARGET_AS_F64 - MAX_DIFFICULTY_TARGET.as_f64()).abs() / MAX_DIFFICULTY_TARGET_AS_F64 < 1e-12);
    }
}
