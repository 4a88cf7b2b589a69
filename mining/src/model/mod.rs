use kestrel_consensus_core::tx::TransactionId;
use std::collections::HashSet;

pub mod candidate_tx;

pub type TransactionIdSet = HashSet<TransactionId>;
