use super::tx::MempoolTransaction;
use kestrel_consensus_core::tx::{TransactionId, TransactionOutpoint};
use std::collections::HashMap;

/// IdToTransactionMap maps a transaction id to a mempool transaction
pub(crate) type IdToTransactionMap = HashMap<TransactionId, MempoolTransaction>;

/// OutpointIndex maps an outpoint to the id of the transaction spending it
pub(crate) type OutpointIndex = HashMap<TransactionOutpoint, TransactionId>;
