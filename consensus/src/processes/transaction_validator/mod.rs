mod tx_validation_in_header_context;
mod tx_validation_in_isolation;
pub mod tx_validation_in_utxo_context;

use kestrel_consensus_core::{config::params::Params, mass::MassCalculator};
use kestrel_txscript::SigCache;

pub use tx_validation_in_header_context::{LockTimeArg, LockTimeType};
pub use tx_validation_in_utxo_context::TxValidationFlags;

/// Validates transactions in isolation, in the context of a header and in the context of a UTXO view.
/// Clones share the signature cache.
#[derive(Clone)]
pub struct TransactionValidator {
    params: Params,
    mass_calculator: MassCalculator,
    sig_cache: SigCache,
}

impl TransactionValidator {
    pub fn new(params: &Params, sig_cache: SigCache) -> Self {
        Self { params: params.clone(), mass_calculator: MassCalculator::new_with_consensus_params(params), sig_cache }
    }

    pub fn mass_calculator(&self) -> &MassCalculator {
        &self.mass_calculator
    }

    pub fn sig_cache(&self) -> &SigCache {
        &self.sig_cache
    }
}
