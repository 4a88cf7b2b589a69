pub mod constants;
pub mod genesis;
pub mod params;

use std::ops::Deref;

use {
    constants::perf::{PERF_PARAMS, PerfParams},
    params::Params,
};

/// Various consensus configurations all bundled up under a single struct. Use `Config::new` for directly building from
/// a `Params` instance. For anything more complex it is recommended to use `ConfigBuilder`. NOTE: this struct can be
/// implicitly de-refed into `Params`
#[derive(Clone, Debug)]
pub struct Config {
    /// Consensus params
    pub params: Params,
    /// Performance params
    pub perf: PerfParams,

    //
    // Additional consensus configuration arguments which are not consensus sensitive
    //
    pub process_genesis: bool,

    /// Indicates whether this node is an archival node
    pub is_archival: bool,

    /// Enable various sanity checks which might be compute-intensive (mostly performed during pruning)
    pub enable_sanity_checks: bool,

    /// Maintain the address to outpoint reverse index
    pub utxo_index: bool,

    /// Skip PoW validation. Used by tests and simulations only
    pub skip_proof_of_work: bool,

    /// Skip validating the header pruning point field
    pub skip_header_pruning_point_check: bool,

    /// Relax mempool standardness rules
    pub accept_non_standard: bool,

    /// Allow the node to accept blocks from miners while not synced
    /// (required when initiating a new network from genesis)
    pub allow_submit_block_when_not_synced: bool,
}

impl Config {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            perf: PERF_PARAMS,
            process_genesis: true,
            is_archival: false,
            enable_sanity_checks: false,
            utxo_index: false,
            skip_proof_of_work: false,
            skip_header_pruning_point_check: false,
            accept_non_standard: false,
            allow_submit_block_when_not_synced: false,
        }
    }

    pub fn to_builder(&self) -> ConfigBuilder {
        ConfigBuilder { config: self.clone() }
    }
}

impl AsRef<Params> for Config {
    fn as_ref(&self) -> &Params {
        &self.params
    }
}

impl Deref for Config {
    type Target = Params;

    fn deref(&self) -> &Self::Target {
        &self.params
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(params: Params) -> Self {
        Self { config: Config::new(params) }
    }

    pub fn set_perf_params(mut self, perf: PerfParams) -> Self {
        self.config.perf = perf;
        self
    }

    pub fn edit_consensus_params<F>(mut self, edit_func: F) -> Self
    where
        F: Fn(&mut Params),
    {
        edit_func(&mut self.config.params);
        self
    }

    pub fn apply_args<F>(mut self, edit_func: F) -> Self
    where
        F: Fn(&mut Config),
    {
        edit_func(&mut self.config);
        self
    }

    pub fn skip_proof_of_work(mut self) -> Self {
        self.config.skip_proof_of_work = true;
        self
    }

    pub fn skip_header_pruning_point_check(mut self) -> Self {
        self.config.skip_header_pruning_point_check = true;
        self
    }

    pub fn set_archival(mut self) -> Self {
        self.config.is_archival = true;
        self
    }

    pub fn enable_sanity_checks(mut self) -> Self {
        self.config.enable_sanity_checks = true;
        self
    }

    pub fn skip_adding_genesis(mut self) -> Self {
        self.config.process_genesis = false;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
