use crate::{
    mempool::{
        config::Config,
        errors::{RuleError, RuleResult},
        model::{
            map::IdToTransactionMap,
            pool::{Pool, TransactionsEdges},
            tx::MempoolTransaction,
            utxo_set::MempoolUtxoSet,
        },
        tx::Priority,
    },
    model::{TransactionIdSet, candidate_tx::CandidateTransaction},
};
use kestrel_consensus_core::tx::{MutableTransaction, Transaction, TransactionId};
use kestrel_core::{debug, warn};
use std::{collections::VecDeque, sync::Arc};

/// Pool of transactions to be included in a block template
///
/// [MempoolTransaction]s are owned by `all_transactions` without any other external reference,
/// so edges between transactions are kept as maps of ids:
///
/// - `parent_transactions` maps a transaction to the ids of its parents in the pool.
/// - `chained_transactions` maps a transaction to the ids of the pool transactions spending its outputs.
/// - `ready_transactions` holds the transactions having no parent in the pool. Only those may enter a
///   block template since the template is validated against the virtual UTXO set alone.
pub(crate) struct TransactionsPool {
    config: Arc<Config>,
    all_transactions: IdToTransactionMap,
    parent_transactions: TransactionsEdges,
    chained_transactions: TransactionsEdges,
    ready_transactions: TransactionIdSet,
    /// Outputs created and outpoints spent by pool transactions
    utxo_set: MempoolUtxoSet,
    total_mass: u64,
    last_expire_scan_daa_score: u64,
}

impl TransactionsPool {
    pub(crate) fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            all_transactions: IdToTransactionMap::default(),
            parent_transactions: TransactionsEdges::default(),
            chained_transactions: TransactionsEdges::default(),
            ready_transactions: TransactionIdSet::default(),
            utxo_set: MempoolUtxoSet::new(),
            total_mass: 0,
            last_expire_scan_daa_score: 0,
        }
    }

    pub(crate) fn add_transaction(
        &mut self,
        transaction: MutableTransaction,
        virtual_daa_score: u64,
        priority: Priority,
        now: u64,
    ) -> RuleResult<&MempoolTransaction> {
        let transaction = MempoolTransaction::new(transaction, priority, virtual_daa_score, now);
        let id = transaction.id();
        self.add_mempool_transaction(transaction)?;
        self.get(&id).ok_or(RuleError::RejectMissingTransaction(id))
    }

    fn add_mempool_transaction(&mut self, transaction: MempoolTransaction) -> RuleResult<()> {
        let id = transaction.id();
        if self.has(&id) {
            return Err(RuleError::RejectDuplicate(id));
        }

        let parents = self.get_parent_transaction_ids_in_pool(&transaction.mtx);
        for parent_id in parents.iter() {
            self.chained_transactions.entry(*parent_id).or_default().insert(id);
        }
        if parents.is_empty() {
            self.ready_transactions.insert(id);
        }
        self.parent_transactions.insert(id, parents);

        self.utxo_set.add_transaction(&transaction.mtx);
        self.total_mass += transaction.mass();
        self.all_transactions.insert(id, transaction);
        Ok(())
    }

    /// Removes a single transaction. Chained transactions stay in the pool and lose it as a parent.
    pub(crate) fn remove_transaction(&mut self, transaction_id: &TransactionId) -> RuleResult<MempoolTransaction> {
        let transaction =
            self.all_transactions.remove(transaction_id).ok_or(RuleError::RejectMissingTransaction(*transaction_id))?;

        let parents = self.parent_transactions.remove(transaction_id).unwrap_or_default();
        for parent_id in parents.iter() {
            if let Some(chains) = self.chained_transactions.get_mut(parent_id) {
                chains.remove(transaction_id);
            }
        }
        if let Some(chains) = self.chained_transactions.remove(transaction_id) {
            for chained_id in chains {
                if let Some(chained_parents) = self.parent_transactions.get_mut(&chained_id) {
                    chained_parents.remove(transaction_id);
                    if chained_parents.is_empty() {
                        self.ready_transactions.insert(chained_id);
                    }
                }
            }
        }
        self.ready_transactions.remove(transaction_id);

        self.utxo_set.remove_transaction(&transaction.mtx, &parents);
        self.total_mass = self.total_mass.saturating_sub(transaction.mass());
        Ok(transaction)
    }

    /// Is the mempool transaction identified by `transaction_id` ready for being inserted in a block template?
    #[cfg(test)]
    pub(crate) fn is_transaction_ready(&self, transaction_id: &TransactionId) -> bool {
        self.ready_transactions.contains(transaction_id)
    }

    pub(crate) fn all_ready_transactions(&self) -> Vec<CandidateTransaction> {
        self.ready_transactions
            .iter()
            .filter_map(|id| self.get(id))
            .map(|x| {
                CandidateTransaction::new(x.mtx.tx.clone(), x.mtx.calculated_fee.unwrap_or_default(), x.mass())
            })
            .collect()
    }

    /// Returns the ids of all transactions being directly and indirectly chained to `transaction_id`
    /// and existing in the pool, in BFS order.
    pub(crate) fn get_redeemer_ids_in_pool(&self, transaction_id: &TransactionId) -> Vec<TransactionId> {
        let mut visited = TransactionIdSet::new();
        let mut descendants = vec![];
        let mut queue = VecDeque::from([*transaction_id]);
        while let Some(id) = queue.pop_front() {
            let Some(chains) = self.chained_transactions.get(&id) else { continue };
            for redeemer_id in chains.iter() {
                if visited.insert(*redeemer_id) {
                    descendants.push(*redeemer_id);
                    queue.push_back(*redeemer_id);
                }
            }
        }
        descendants
    }

    pub(crate) fn check_double_spends(&self, transaction: &MutableTransaction) -> RuleResult<()> {
        self.utxo_set.check_double_spends(transaction)
    }

    pub(crate) fn get_double_spend_transaction_ids(&self, transaction: &Transaction) -> Vec<TransactionId> {
        self.utxo_set.get_double_spend_transaction_ids(transaction)
    }

    pub(crate) fn populate_entries(&self, transaction: &mut MutableTransaction) {
        self.utxo_set.populate_entries(transaction)
    }

    /// Returns the low-priority transactions having the lowest fee rates which must be removed for
    /// `transaction` to fit in the pool. An error is returned if no such set exists with fee rates
    /// strictly below the one of `transaction`.
    pub(crate) fn limit_transaction_count(&self, transaction: &MutableTransaction) -> RuleResult<Vec<TransactionId>> {
        let incoming_mass = transaction.calculated_mass.unwrap_or_default();
        let fits = |count: usize, mass: u64| {
            count < self.config.maximum_transaction_count && mass + incoming_mass <= self.config.maximum_mempool_mass
        };
        if fits(self.len(), self.total_mass) {
            return Ok(vec![]);
        }

        let incoming_fee_rate = transaction.calculated_fee.unwrap_or_default() as f64 / incoming_mass.max(1) as f64;
        let mut low_priority_txs = self
            .all_transactions
            .values()
            .filter(|x| x.priority == Priority::Low && x.fee_rate() < incoming_fee_rate)
            .collect::<Vec<_>>();
        low_priority_txs.sort_by(|a, b| a.fee_rate().total_cmp(&b.fee_rate()));

        let mut removed = TransactionIdSet::new();
        let mut transactions_to_remove = vec![];
        let (mut count, mut mass) = (self.len(), self.total_mass);
        for tx in low_priority_txs {
            if fits(count, mass) {
                break;
            }
            if removed.contains(&tx.id()) {
                continue;
            }
            // Evicting a transaction evicts its redeemers as well
            for id in std::iter::once(tx.id()).chain(self.get_redeemer_ids_in_pool(&tx.id())) {
                if removed.insert(id) {
                    count -= 1;
                    mass = mass.saturating_sub(self.get(&id).map_or(0, |x| x.mass()));
                }
            }
            transactions_to_remove.push(tx.id());
        }

        if !fits(count, mass) {
            let err = RuleError::RejectMempoolIsFull(self.len(), self.config.maximum_transaction_count);
            warn!("{}", err);
            return Err(err);
        }
        Ok(transactions_to_remove)
    }

    /// Returns the low-priority transactions which stayed in the pool for more than the expire interval.
    /// The scan runs at most once per scan interval.
    pub(crate) fn collect_expired_low_priority_transactions(&mut self, virtual_daa_score: u64) -> Vec<TransactionId> {
        if virtual_daa_score < self.last_expire_scan_daa_score + self.config.transaction_expire_scan_interval_daa_score {
            return vec![];
        }
        self.last_expire_scan_daa_score = virtual_daa_score;

        // Never expire high priority transactions
        self.all_transactions
            .values()
            .filter(|x| {
                x.priority == Priority::Low
                    && virtual_daa_score.saturating_sub(x.added_at_daa_score) > self.config.transaction_expire_interval_daa_score
            })
            .map(|x| {
                debug!(
                    "Transaction {} expired, DAA score moved by {}, expire interval: {}",
                    x.id(),
                    virtual_daa_score.saturating_sub(x.added_at_daa_score),
                    self.config.transaction_expire_interval_daa_score
                );
                x.id()
            })
            .collect()
    }

    pub(crate) fn total_mass(&self) -> u64 {
        self.total_mass
    }
}

impl Pool for TransactionsPool {
    fn all(&self) -> &IdToTransactionMap {
        &self.all_transactions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus_core::tx::TransactionOutpoint;
    use kestrel_hashes::Hash;
    use kestrel_txscript::standard::test_helpers::create_transaction;

    fn validated(tx: Transaction, fee: u64) -> MutableTransaction {
        let mut mtx = MutableTransaction::new(Arc::new(tx));
        mtx.calculated_fee = Some(fee);
        mtx.calculated_mass = Some(1000);
        mtx
    }

    fn root_transaction(word: u64, fee: u64) -> MutableTransaction {
        validated(create_transaction(&[TransactionOutpoint::new(Hash::from_u64_word(word), 0)], &[10_000]), fee)
    }

    #[test]
    fn test_chained_transactions_become_ready_when_parent_leaves() {
        let config = Arc::new(Config::build_default(1000, true, 500_000));
        let mut pool = TransactionsPool::new(config);
        let parent = root_transaction(1, 1000);
        let child = validated(create_transaction(&[TransactionOutpoint::new(parent.id(), 0)], &[9000]), 1000);
        let grandchild = validated(create_transaction(&[TransactionOutpoint::new(child.id(), 0)], &[8000]), 1000);
        let (parent_id, child_id, grandchild_id) = (parent.id(), child.id(), grandchild.id());

        pool.add_transaction(parent, 0, Priority::Low, 0).unwrap();
        pool.add_transaction(child, 0, Priority::Low, 0).unwrap();
        pool.add_transaction(grandchild, 0, Priority::Low, 0).unwrap();
        assert!(pool.is_transaction_ready(&parent_id));
        assert!(!pool.is_transaction_ready(&child_id));
        assert_eq!(pool.get_redeemer_ids_in_pool(&parent_id), vec![child_id, grandchild_id]);
        assert_eq!(pool.total_mass(), 3000);

        pool.remove_transaction(&parent_id).unwrap();
        assert!(pool.is_transaction_ready(&child_id));
        assert!(!pool.is_transaction_ready(&grandchild_id));
        assert_eq!(pool.all_ready_transactions().iter().map(|x| x.tx.id()).collect::<Vec<_>>(), vec![child_id]);
        assert!(matches!(pool.remove_transaction(&parent_id), Err(RuleError::RejectMissingTransaction(_))));
    }

    #[test]
    fn test_limit_transaction_count_evicts_lowest_fee_rates() {
        let mut config = Config::build_default(1000, true, 500_000);
        config.maximum_transaction_count = 3;
        let mut pool = TransactionsPool::new(Arc::new(config));
        let cheap = root_transaction(1, 1000);
        let cheap_id = cheap.id();
        pool.add_transaction(cheap, 0, Priority::Low, 0).unwrap();
        pool.add_transaction(root_transaction(2, 5000), 0, Priority::Low, 0).unwrap();
        pool.add_transaction(root_transaction(3, 500), 0, Priority::High, 0).unwrap();

        // High priority transactions are never evicted, the cheapest low priority one goes first
        assert_eq!(pool.limit_transaction_count(&root_transaction(4, 3000)).unwrap(), vec![cheap_id]);
        // An incoming transaction paying less than every evictable one is refused
        assert!(matches!(pool.limit_transaction_count(&root_transaction(5, 100)), Err(RuleError::RejectMempoolIsFull(3, 3))));
    }

    #[test]
    fn test_expire_skips_high_priority() {
        let config = Config::build_default(1000, true, 500_000);
        let interval = config.transaction_expire_interval_daa_score;
        let mut pool = TransactionsPool::new(Arc::new(config));
        let low = root_transaction(1, 1000);
        let low_id = low.id();
        pool.add_transaction(low, 10, Priority::Low, 0).unwrap();
        pool.add_transaction(root_transaction(2, 1000), 10, Priority::High, 0).unwrap();

        assert!(pool.collect_expired_low_priority_transactions(10 + interval).is_empty());
        assert_eq!(pool.collect_expired_low_priority_transactions(11 + 2 * interval), vec![low_id]);
    }
}
