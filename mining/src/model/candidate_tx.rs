use kestrel_consensus_core::tx::Transaction;
use std::sync::Arc;

/// Transaction with additional metadata needed in order to be a candidate
/// in the transaction selection algorithm
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateTransaction {
    /// The actual transaction
    pub tx: Arc<Transaction>,
    /// Populated fee
    pub calculated_fee: u64,
    /// Populated mass
    pub calculated_mass: u64,
}

impl CandidateTransaction {
    pub fn new(tx: Arc<Transaction>, calculated_fee: u64, calculated_mass: u64) -> Self {
        Self { tx, calculated_fee, calculated_mass }
    }

    /// Fee per gram of mass
    pub fn fee_rate(&self) -> f64 {
        self.calculated_fee as f64 / self.calculated_mass.max(1) as f64
    }
}
