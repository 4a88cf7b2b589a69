use crate::mempool::{
    errors::RuleResult,
    model::{map::OutpointIndex, tx::DoubleSpend},
};
use kestrel_consensus_core::{
    constants::UNACCEPTED_DAA_SCORE,
    tx::{MutableTransaction, Transaction, TransactionId, TransactionOutpoint, UtxoEntry},
    utxo::utxo_collection::UtxoCollection,
};
use std::collections::HashSet;

/// The UTXO overlay the mempool applies on top of the virtual UTXO set: outputs created by pool
/// transactions and not yet spent in the pool, and an index of every outpoint spent by the pool.
#[derive(Default)]
pub(crate) struct MempoolUtxoSet {
    pool_unspent_outputs: UtxoCollection,
    outpoint_owner_id: OutpointIndex,
}

impl MempoolUtxoSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_transaction(&mut self, transaction: &MutableTransaction) {
        let transaction_id = transaction.id();

        for input in transaction.tx.inputs.iter() {
            // Delete the output this input spends, in case it was created by the mempool.
            // If the outpoint is missing from pool_unspent_outputs it was created in the DAG.
            self.pool_unspent_outputs.remove(&input.previous_outpoint);
            self.outpoint_owner_id.insert(input.previous_outpoint, transaction_id);
        }

        for (i, output) in transaction.tx.outputs.iter().enumerate() {
            let outpoint = TransactionOutpoint::new(transaction_id, i as u32);
            let entry = UtxoEntry::new(output.value, output.script_public_key.clone(), UNACCEPTED_DAA_SCORE, false);
            self.pool_unspent_outputs.insert(outpoint, entry);
        }
    }

    /// Removes the transaction from the overlay. Outputs of `parent_ids_in_pool` it was spending become
    /// unspent again.
    pub(crate) fn remove_transaction(&mut self, transaction: &MutableTransaction, parent_ids_in_pool: &HashSet<TransactionId>) {
        let transaction_id = transaction.id();
        // The transaction may not be fully populated here, notably when it failed revalidation
        for (input, entry) in transaction.tx.inputs.iter().zip(transaction.entries.iter()) {
            if let Some(entry) = entry {
                if parent_ids_in_pool.contains(&input.previous_outpoint.transaction_id) {
                    self.pool_unspent_outputs.insert(input.previous_outpoint, entry.clone());
                }
            }
            if self.outpoint_owner_id.get(&input.previous_outpoint) == Some(&transaction_id) {
                self.outpoint_owner_id.remove(&input.previous_outpoint);
            }
        }

        for i in 0..transaction.tx.outputs.len() {
            self.pool_unspent_outputs.remove(&TransactionOutpoint::new(transaction_id, i as u32));
        }
    }

    pub(crate) fn get_outpoint_owner_id(&self, outpoint: &TransactionOutpoint) -> Option<&TransactionId> {
        self.outpoint_owner_id.get(outpoint)
    }

    /// Fills the missing entries of `transaction` spending outputs created by pool transactions
    pub(crate) fn populate_entries(&self, transaction: &mut MutableTransaction) {
        for (input, entry) in transaction.tx.inputs.iter().zip(transaction.entries.iter_mut()) {
            if entry.is_none() {
                *entry = self.pool_unspent_outputs.get(&input.previous_outpoint).cloned();
            }
        }
    }

    /// Make sure no other transaction in the mempool is already spending an output which one of this transaction inputs spends
    pub(crate) fn check_double_spends(&self, transaction: &MutableTransaction) -> RuleResult<()> {
        match self.get_first_double_spend(transaction) {
            Some(double_spend) => Err(double_spend.into()),
            None => Ok(()),
        }
    }

    pub(crate) fn get_first_double_spend(&self, transaction: &MutableTransaction) -> Option<DoubleSpend> {
        let transaction_id = transaction.id();
        transaction.tx.inputs.iter().find_map(|input| match self.get_outpoint_owner_id(&input.previous_outpoint) {
            Some(owner_id) if *owner_id != transaction_id => Some(DoubleSpend::new(input.previous_outpoint, *owner_id)),
            _ => None,
        })
    }

    /// Returns the ids of the pool transactions spending any outpoint `transaction` spends, itself excluded
    pub(crate) fn get_double_spend_transaction_ids(&self, transaction: &Transaction) -> Vec<TransactionId> {
        let transaction_id = transaction.id();
        let mut visited = HashSet::new();
        transaction
            .inputs
            .iter()
            .filter_map(|input| self.get_outpoint_owner_id(&input.previous_outpoint))
            .filter(|owner_id| **owner_id != transaction_id && visited.insert(**owner_id))
            .copied()
            .collect()
    }
}
