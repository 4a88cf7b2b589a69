use crate::mempool::{
    Mempool,
    errors::RuleResult,
    model::{pool::Pool, tx::TxRemovalReason},
};
use itertools::Itertools;
use kestrel_consensus_core::tx::TransactionId;
use kestrel_core::debug;

impl Mempool {
    /// Removes `transaction_id` from whichever pool holds it. With `remove_redeemers`, every pool
    /// transaction and orphan spending its outputs, directly or not, goes along.
    pub(crate) fn remove_transaction(
        &mut self,
        transaction_id: &TransactionId,
        remove_redeemers: bool,
        reason: TxRemovalReason,
        extra_info: &str,
    ) -> RuleResult<()> {
        if self.orphan_pool.has(transaction_id) {
            let removed_orphans = self.orphan_pool.remove_orphan(transaction_id, true)?;
            if reason.verbose() {
                debug!(
                    "Removed {} orphan(s) ({}): {}{}",
                    removed_orphans.len(),
                    reason,
                    removed_orphans.iter().map(|x| x.id()).join(", "),
                    extra_info
                );
            }
            return Ok(());
        }

        if !self.transaction_pool.has(transaction_id) {
            return Ok(());
        }

        let mut transaction_ids_to_remove = vec![*transaction_id];
        if remove_redeemers {
            transaction_ids_to_remove.extend(self.transaction_pool.get_redeemer_ids_in_pool(transaction_id));
        }

        // Leaves first so that every removal finds its parents still in the pool
        let mut removed_transactions = Vec::with_capacity(transaction_ids_to_remove.len());
        for id in transaction_ids_to_remove.iter().rev() {
            let removed_transaction = self.transaction_pool.remove_transaction(id)?;
            let removed_orphans = self.orphan_pool.update_orphans_after_transaction_removed(&removed_transaction, remove_redeemers)?;
            removed_transactions.push(removed_transaction.id());
            removed_transactions.extend(removed_orphans.iter().map(|x| x.id()));
        }

        if reason.verbose() {
            match removed_transactions.len() {
                1 => debug!("Removed transaction ({}) {}{}", reason, removed_transactions[0], extra_info),
                n => debug!("Removed {} transactions ({}): {}{}", n, reason, removed_transactions.iter().join(", "), extra_info),
            }
        }
        Ok(())
    }
}
