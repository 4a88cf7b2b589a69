use crate::mempool::{
    Mempool,
    errors::RuleResult,
    model::{
        pool::Pool,
        tx::{MempoolTransaction, TxRemovalReason},
    },
};
use kestrel_consensus_core::tx::{Transaction, TransactionId};
use kestrel_core::debug;
use std::sync::atomic::Ordering;

impl Mempool {
    /// Drops the transactions of a newly accepted block from the pools along with every pool transaction
    /// double spending them. Returns the orphans which the block outputs unorphaned, to be revalidated.
    pub(crate) fn handle_new_block_transactions(&mut self, block_transactions: &[Transaction]) -> RuleResult<Vec<MempoolTransaction>> {
        let mut unorphaned_transactions = vec![];
        let mut block_tx_count = 0;
        for transaction in block_transactions.iter().filter(|tx| !tx.is_coinbase()) {
            let transaction_id = transaction.id();
            if self.transaction_pool.has(&transaction_id) {
                // Chained transactions stay, the outputs they spend now live in the virtual UTXO set
                self.remove_transaction(&transaction_id, false, TxRemovalReason::Accepted, "")?;
            } else if self.orphan_pool.has(&transaction_id) {
                self.orphan_pool.remove_orphan(&transaction_id, false)?;
            }
            self.remove_double_spends(transaction)?;
            unorphaned_transactions.extend(self.get_unorphaned_transactions_after_accepted_transaction(transaction));
            block_tx_count += 1;
        }
        self.counters.block_tx_counts.fetch_add(block_tx_count, Ordering::Relaxed);
        Ok(unorphaned_transactions)
    }

    /// Expires the low-priority transactions and orphans which stayed too long in the mempool and
    /// forgets compound senders idle for a whole rate limit window
    pub(crate) fn expire_low_priority_transactions(&mut self, virtual_daa_score: u64, now: u64) -> RuleResult<()> {
        let expired_orphans = self.orphan_pool.expire_low_priority_transactions(virtual_daa_score, now)?;
        if !expired_orphans.is_empty() {
            debug!("Expired {} orphan transactions", expired_orphans.len());
        }

        let expired_transactions = self.transaction_pool.collect_expired_low_priority_transactions(virtual_daa_score);
        for transaction_id in expired_transactions.iter() {
            self.remove_transaction(transaction_id, true, TxRemovalReason::Expired, "")?;
        }

        self.rate_limiter.prune(now);
        Ok(())
    }

    fn remove_double_spends(&mut self, transaction: &Transaction) -> RuleResult<()> {
        let double_spends: Vec<TransactionId> = self.transaction_pool.get_double_spend_transaction_ids(transaction);
        for double_spend_id in double_spends.iter() {
            self.remove_transaction(
                double_spend_id,
                true,
                TxRemovalReason::DoubleSpend,
                &format!(" favouring {} accepted in a block", transaction.id()),
            )?;
        }
        Ok(())
    }
}
