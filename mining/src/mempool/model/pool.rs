use crate::{
    mempool::model::{map::IdToTransactionMap, tx::MempoolTransaction},
    model::TransactionIdSet,
};
use kestrel_consensus_core::tx::{MutableTransaction, TransactionId};
use std::collections::HashMap;

pub(crate) type TransactionsEdges = HashMap<TransactionId, TransactionIdSet>;

pub(crate) trait Pool {
    fn all(&self) -> &IdToTransactionMap;

    fn has(&self, transaction_id: &TransactionId) -> bool {
        self.all().contains_key(transaction_id)
    }

    fn get(&self, transaction_id: &TransactionId) -> Option<&MempoolTransaction> {
        self.all().get(transaction_id)
    }

    /// Returns the number of transactions in the pool
    fn len(&self) -> usize {
        self.all().len()
    }

    /// Returns the ids of all transactions being parents of `transaction` and existing in the pool.
    fn get_parent_transaction_ids_in_pool(&self, transaction: &MutableTransaction) -> TransactionIdSet {
        transaction
            .tx
            .inputs
            .iter()
            .map(|input| input.previous_outpoint.transaction_id)
            .filter(|parent_id| self.has(parent_id))
            .collect()
    }

    /// Returns a vector with clones of all the transactions in the pool.
    fn get_all_transactions(&self) -> Vec<MutableTransaction> {
        self.all().values().map(|x| x.mtx.clone()).collect()
    }
}
