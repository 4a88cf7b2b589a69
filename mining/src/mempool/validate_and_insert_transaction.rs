use crate::mempool::{
    Mempool,
    errors::{RuleError, RuleResult},
    model::{
        pool::Pool,
        tx::{MempoolTransaction, TxRemovalReason},
    },
    tx::{Orphan, Priority},
};
use kestrel_consensus_core::{
    api::ConsensusApi,
    tx::{MutableTransaction, ScriptPublicKey, Transaction},
};
use kestrel_core::{debug, info};
use std::sync::{Arc, atomic::Ordering};

impl Mempool {
    /// Checks `transaction` against the mempool content and the policies which need no UTXO context,
    /// then fills the entries of the inputs spending outputs of pool transactions.
    pub(crate) fn pre_validate_and_populate_transaction(
        &self,
        consensus: &dyn ConsensusApi,
        mut transaction: MutableTransaction,
    ) -> RuleResult<MutableTransaction> {
        self.validate_transaction_unacceptance(&transaction)?;
        // Populate mass in the beginning, it will be used in multiple places throughout the validation and insertion.
        transaction.calculated_mass = Some(consensus.calculate_transaction_mass(&transaction.tx));
        self.validate_transaction_in_isolation(&transaction)?;
        self.transaction_pool.check_double_spends(&transaction)?;
        self.transaction_pool.populate_entries(&mut transaction);
        Ok(transaction)
    }

    /// Inserts `transaction` after consensus validated it against the virtual UTXO set with the mempool
    /// overlay applied. Returns the accepted transaction, or `None` if it went to the orphan pool.
    pub(crate) fn post_validate_and_insert_transaction(
        &mut self,
        consensus: &dyn ConsensusApi,
        validation_result: RuleResult<()>,
        transaction: MutableTransaction,
        priority: Priority,
        orphan: Orphan,
        now: u64,
    ) -> RuleResult<Option<Arc<Transaction>>> {
        let transaction_id = transaction.id();

        // First check if the transaction was inserted in the mempool by another thread meanwhile
        if self.transaction_pool.has(&transaction_id) {
            return Err(RuleError::RejectDuplicate(transaction_id));
        }

        match validation_result {
            Ok(_) => {}
            Err(RuleError::RejectMissingOutpoint) => {
                if orphan == Orphan::Forbidden {
                    return Err(RuleError::RejectDisallowedOrphan(transaction_id));
                }
                let virtual_daa_score = consensus.get_virtual_daa_score();
                self.orphan_pool.try_add_orphan(virtual_daa_score, transaction, priority, now)?;
                return Ok(None);
            }
            Err(err) => {
                return Err(err);
            }
        }

        // The mempool may have changed since pre-validation
        self.transaction_pool.check_double_spends(&transaction)?;
        self.validate_transaction_in_context(&transaction)?;
        let compound_sender = self.check_compound_rate_limit(&transaction, now)?;

        // Before adding the transaction, check if there is room in the pool
        for id in self.transaction_pool.limit_transaction_count(&transaction)? {
            self.remove_transaction(&id, true, TxRemovalReason::MakingRoom, "")?;
        }

        if let Some(sender) = compound_sender {
            self.rate_limiter.record(sender, now);
        }
        let virtual_daa_score = consensus.get_virtual_daa_score();
        let accepted_transaction =
            self.transaction_pool.add_transaction(transaction, virtual_daa_score, priority, now)?.mtx.tx.clone();
        self.counters.increase_tx_counts(1, priority);
        self.counters.input_counts.fetch_add(accepted_transaction.inputs.len() as u64, Ordering::Relaxed);
        self.counters.output_counts.fetch_add(accepted_transaction.outputs.len() as u64, Ordering::Relaxed);
        debug!("Added transaction {}, mempool mass is now {}", transaction_id, self.transaction_pool.total_mass());
        Ok(Some(accepted_transaction))
    }

    fn validate_transaction_unacceptance(&self, transaction: &MutableTransaction) -> RuleResult<()> {
        // Reject if the transaction is already in the pools
        let transaction_id = transaction.id();
        if self.transaction_pool.has(&transaction_id) || self.orphan_pool.has(&transaction_id) {
            return Err(RuleError::RejectDuplicate(transaction_id));
        }
        Ok(())
    }

    fn validate_transaction_in_isolation(&self, transaction: &MutableTransaction) -> RuleResult<()> {
        if !self.config.accept_non_standard {
            self.check_transaction_standard_in_isolation(transaction)?;
        }
        if let Some(spk) = self.frozen_scripts.find_in_outputs(transaction) {
            return Err(RuleError::RejectFrozenAddress(transaction.id(), format!("{spk:?}")));
        }
        Ok(())
    }

    fn validate_transaction_in_context(&self, transaction: &MutableTransaction) -> RuleResult<()> {
        if !self.config.accept_non_standard {
            self.check_transaction_standard_in_context(transaction)?;
        }
        self.check_transaction_spam(transaction)?;
        if let Some(spk) = self.frozen_scripts.find_in_inputs(transaction) {
            return Err(RuleError::RejectFrozenAddress(transaction.id(), format!("{spk:?}")));
        }
        Ok(())
    }

    /// Returns the sender to account `transaction` to if it is a compound transaction, or an error if
    /// that sender exhausted its quota in the current window
    fn check_compound_rate_limit(
        &mut self,
        transaction: &MutableTransaction,
        now: u64,
    ) -> RuleResult<Option<ScriptPublicKey>> {
        let Some(sender) = self.rate_limiter.compound_sender(transaction) else { return Ok(None) };
        if let Err(count) = self.rate_limiter.check(&sender, now) {
            self.counters.rate_limited_counts.fetch_add(1, Ordering::Relaxed);
            info!("Compound transaction {} rejected, its sender submitted {} in the current window", transaction.id(), count);
            return Err(RuleError::RejectCompoundRateLimit(transaction.id(), count, self.rate_limiter.window()));
        }
        Ok(Some(sender))
    }

    /// Moves the orphans spending outputs of `accepted_transaction` out of the orphan pool if they have all
    /// their entries. Their entries are reset to the outputs of the pool, consensus revalidation fills the rest.
    pub(crate) fn get_unorphaned_transactions_after_accepted_transaction(
        &mut self,
        accepted_transaction: &Transaction,
    ) -> Vec<MempoolTransaction> {
        let mut unorphaned_transactions = self.orphan_pool.remove_unorphaned_after_accepted(accepted_transaction);
        for transaction in unorphaned_transactions.iter_mut() {
            transaction.mtx.clear_entries();
            self.transaction_pool.populate_entries(&mut transaction.mtx);
            debug!("Transaction {} unorphaned", transaction.id());
        }
        unorphaned_transactions
    }
}
