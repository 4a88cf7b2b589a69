use crate::{
    mempool::{
        config::Config,
        errors::{RuleError, RuleResult},
        model::{
            map::{IdToTransactionMap, OutpointIndex},
            pool::Pool,
            tx::MempoolTransaction,
        },
        tx::Priority,
    },
    model::TransactionIdSet,
};
use kestrel_consensus_core::{
    constants::UNACCEPTED_DAA_SCORE,
    tx::{MutableTransaction, Transaction, TransactionId, TransactionOutpoint, UtxoEntry},
};
use kestrel_core::{debug, warn};
use rand::seq::IteratorRandom;
use std::sync::Arc;

/// Pool of orphan transactions depending on some missing utxo entries
///
/// Orphans are [MempoolTransaction]s owned by `all_orphans`. `orphan_ids_by_previous_outpoint`
/// maps an outpoint to the orphan spending it, so un-orphaning a transaction moves the object
/// out of this pool with no reconstruction nor cloning.
pub(crate) struct OrphanPool {
    config: Arc<Config>,
    all_orphans: IdToTransactionMap,
    orphan_ids_by_previous_outpoint: OutpointIndex,
    last_expire_scan: u64,
}

impl OrphanPool {
    pub(crate) fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            all_orphans: IdToTransactionMap::new(),
            orphan_ids_by_previous_outpoint: OutpointIndex::new(),
            last_expire_scan: 0,
        }
    }

    fn outpoint_orphan(&self, outpoint: &TransactionOutpoint) -> Option<&MempoolTransaction> {
        self.orphan_ids_by_previous_outpoint.get(outpoint).and_then(|id| self.all_orphans.get(id))
    }

    /// Returns the ids of the orphans spending, directly or indirectly, outputs of `transaction_id`
    pub(crate) fn get_redeemer_ids(&self, transaction_id: &TransactionId, output_count: usize) -> Vec<TransactionId> {
        let mut visited = TransactionIdSet::new();
        let mut redeemers = vec![];
        let mut stack = vec![(*transaction_id, output_count)];
        while let Some((id, output_count)) = stack.pop() {
            for index in 0..output_count {
                if let Some(orphan) = self.outpoint_orphan(&TransactionOutpoint::new(id, index as u32)) {
                    if visited.insert(orphan.id()) {
                        redeemers.push(orphan.id());
                        stack.push((orphan.id(), orphan.mtx.tx.outputs.len()));
                    }
                }
            }
        }
        redeemers
    }

    pub(crate) fn try_add_orphan(
        &mut self,
        virtual_daa_score: u64,
        transaction: MutableTransaction,
        priority: Priority,
        now: u64,
    ) -> RuleResult<()> {
        if self.config.maximum_orphan_transaction_count == 0 {
            return Err(RuleError::RejectDisallowedOrphan(transaction.id()));
        }
        self.check_orphan_duplicate(&transaction)?;
        self.check_orphan_mass(&transaction)?;
        self.check_orphan_double_spend(&transaction)?;
        self.add_orphan(virtual_daa_score, transaction, priority, now);
        self.limit_orphan_pool_size()
    }

    fn limit_orphan_pool_size(&mut self) -> RuleResult<()> {
        while self.all_orphans.len() as u64 > self.config.maximum_orphan_transaction_count {
            let Some(orphan_to_remove) = self.get_random_low_priority_orphan() else {
                // All orphans are high priority
                warn!(
                    "Number of high-priority transactions in orphan pool ({}) is higher than maximum allowed ({})",
                    self.all_orphans.len(),
                    self.config.maximum_orphan_transaction_count
                );
                break;
            };
            // Redeemers are kept since a random eviction says nothing about the validity of the evicted orphan
            self.remove_orphan(&orphan_to_remove, false)?;
        }
        Ok(())
    }

    fn check_orphan_mass(&self, transaction: &MutableTransaction) -> RuleResult<()> {
        let mass = transaction.calculated_mass.unwrap_or_default();
        if mass > self.config.maximum_orphan_transaction_mass {
            return Err(RuleError::RejectBadOrphanMass(mass, self.config.maximum_orphan_transaction_mass));
        }
        Ok(())
    }

    fn check_orphan_duplicate(&self, transaction: &MutableTransaction) -> RuleResult<()> {
        if self.all_orphans.contains_key(&transaction.id()) {
            return Err(RuleError::RejectDuplicateOrphan(transaction.id()));
        }
        Ok(())
    }

    fn check_orphan_double_spend(&self, transaction: &MutableTransaction) -> RuleResult<()> {
        for input in transaction.tx.inputs.iter() {
            if let Some(double_spend_orphan) = self.outpoint_orphan(&input.previous_outpoint) {
                return Err(RuleError::RejectDoubleSpendOrphan(transaction.id(), double_spend_orphan.id()));
            }
        }
        Ok(())
    }

    fn add_orphan(&mut self, virtual_daa_score: u64, transaction: MutableTransaction, priority: Priority, now: u64) {
        let transaction = MempoolTransaction::new(transaction, priority, virtual_daa_score, now);
        let id = transaction.id();
        for input in transaction.mtx.tx.inputs.iter() {
            self.orphan_ids_by_previous_outpoint.insert(input.previous_outpoint, id);
        }
        debug!("Added transaction to orphan pool: {}", id);
        self.all_orphans.insert(id, transaction);
    }

    pub(crate) fn remove_orphan(
        &mut self,
        transaction_id: &TransactionId,
        remove_redeemers: bool,
    ) -> RuleResult<Vec<MempoolTransaction>> {
        let output_count = match self.all_orphans.get(transaction_id) {
            Some(orphan) => orphan.mtx.tx.outputs.len(),
            None => return Err(RuleError::RejectMissingOrphanTransaction(*transaction_id)),
        };
        let mut transaction_ids_to_remove = vec![*transaction_id];
        if remove_redeemers {
            transaction_ids_to_remove.extend(self.get_redeemer_ids(transaction_id, output_count));
        }
        transaction_ids_to_remove.iter().map(|x| self.remove_single_orphan(x)).collect()
    }

    fn remove_single_orphan(&mut self, transaction_id: &TransactionId) -> RuleResult<MempoolTransaction> {
        let transaction =
            self.all_orphans.remove(transaction_id).ok_or(RuleError::RejectMissingOrphanTransaction(*transaction_id))?;
        for input in transaction.mtx.tx.inputs.iter() {
            if self.orphan_ids_by_previous_outpoint.get(&input.previous_outpoint) == Some(transaction_id) {
                self.orphan_ids_by_previous_outpoint.remove(&input.previous_outpoint);
            }
        }
        Ok(transaction)
    }

    /// Fills the entries of the orphans spending outputs of `transaction` and returns the orphans having
    /// all their entries populated, removed from the pool
    pub(crate) fn remove_unorphaned_after_accepted(&mut self, transaction: &Transaction) -> Vec<MempoolTransaction> {
        let transaction_id = transaction.id();
        let mut candidates = TransactionIdSet::new();
        for (index, output) in transaction.outputs.iter().enumerate() {
            let outpoint = TransactionOutpoint::new(transaction_id, index as u32);
            let Some(orphan_id) = self.orphan_ids_by_previous_outpoint.get(&outpoint).copied() else { continue };
            let Some(orphan) = self.all_orphans.get_mut(&orphan_id) else { continue };
            for (input, entry) in orphan.mtx.tx.inputs.iter().zip(orphan.mtx.entries.iter_mut()) {
                if input.previous_outpoint == outpoint {
                    *entry = Some(UtxoEntry::new(output.value, output.script_public_key.clone(), UNACCEPTED_DAA_SCORE, false));
                }
            }
            candidates.insert(orphan_id);
        }

        let ready =
            candidates.into_iter().filter(|id| self.all_orphans.get(id).is_some_and(|x| x.mtx.is_verifiable())).collect::<Vec<_>>();
        ready.iter().filter_map(|id| self.remove_single_orphan(id).ok()).collect()
    }

    /// Reacts to the removal of `removed_transaction` from the transaction pool. Orphans spending its
    /// outputs are either removed or get their matching entries cleared.
    pub(crate) fn update_orphans_after_transaction_removed(
        &mut self,
        removed_transaction: &MempoolTransaction,
        remove_redeemers: bool,
    ) -> RuleResult<Vec<MempoolTransaction>> {
        let removed_transaction_id = removed_transaction.id();
        let output_count = removed_transaction.mtx.tx.outputs.len();
        if remove_redeemers {
            let redeemers = self.get_redeemer_ids(&removed_transaction_id, output_count);
            return redeemers.iter().map(|x| self.remove_single_orphan(x)).collect();
        }

        for index in 0..output_count {
            let outpoint = TransactionOutpoint::new(removed_transaction_id, index as u32);
            let Some(orphan_id) = self.orphan_ids_by_previous_outpoint.get(&outpoint).copied() else { continue };
            if let Some(orphan) = self.all_orphans.get_mut(&orphan_id) {
                for (input, entry) in orphan.mtx.tx.inputs.iter().zip(orphan.mtx.entries.iter_mut()) {
                    if input.previous_outpoint.transaction_id == removed_transaction_id {
                        *entry = None;
                    }
                }
            }
        }
        Ok(vec![])
    }

    /// Removes the low-priority orphans which either stayed for more than the DAA score expire interval
    /// or for more than the wall clock expire interval. The scan runs at most once per scan interval.
    pub(crate) fn expire_low_priority_transactions(&mut self, virtual_daa_score: u64, now: u64) -> RuleResult<Vec<TransactionId>> {
        if virtual_daa_score < self.last_expire_scan + self.config.orphan_expire_scan_interval_daa_score {
            return Ok(vec![]);
        }

        // Never expire high priority transactions
        let expired_low_priority_transactions: Vec<TransactionId> = self
            .all_orphans
            .values()
            .filter(|x| {
                x.priority == Priority::Low
                    && (virtual_daa_score.saturating_sub(x.added_at_daa_score) > self.config.orphan_expire_interval_daa_score
                        || now.saturating_sub(x.added_at_millis) > self.config.orphan_expire_interval_milliseconds)
            })
            .map(|x| x.id())
            .collect();

        for transaction_id in expired_low_priority_transactions.iter() {
            // A redeemer may have been removed already along with an expired ancestor
            if self.has(transaction_id) {
                self.remove_orphan(transaction_id, true)?;
            }
        }

        self.last_expire_scan = virtual_daa_score;
        Ok(expired_low_priority_transactions)
    }

    fn get_random_low_priority_orphan(&self) -> Option<TransactionId> {
        self.all_orphans.values().filter(|x| x.priority == Priority::Low).map(|x| x.id()).choose(&mut rand::thread_rng())
    }
}

impl Pool for OrphanPool {
    fn all(&self) -> &IdToTransactionMap {
        &self.all_orphans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_hashes::Hash;
    use kestrel_txscript::standard::test_helpers::create_transaction;

    fn orphan(outpoints: &[TransactionOutpoint], outputs: &[u64]) -> MutableTransaction {
        let mut mtx = MutableTransaction::new(Arc::new(create_transaction(outpoints, outputs)));
        mtx.calculated_mass = Some(1000);
        mtx
    }

    #[test]
    fn test_orphan_resolves_once_every_parent_arrives() {
        let mut pool = OrphanPool::new(Arc::new(Config::build_default(1000, true, 500_000)));
        let first_parent = create_transaction(&[TransactionOutpoint::new(Hash::from_u64_word(1), 0)], &[5000]);
        let second_parent = create_transaction(&[TransactionOutpoint::new(Hash::from_u64_word(2), 0)], &[5000]);
        let child =
            orphan(&[TransactionOutpoint::new(first_parent.id(), 0), TransactionOutpoint::new(second_parent.id(), 0)], &[9000]);
        let child_id = child.id();
        pool.try_add_orphan(0, child, Priority::Low, 0).unwrap();

        let double_spend = orphan(&[TransactionOutpoint::new(first_parent.id(), 0)], &[1000]);
        assert!(matches!(pool.try_add_orphan(0, double_spend, Priority::Low, 0), Err(RuleError::RejectDoubleSpendOrphan(..))));

        assert!(pool.remove_unorphaned_after_accepted(&first_parent).is_empty());
        assert!(pool.has(&child_id));
        let unorphaned = pool.remove_unorphaned_after_accepted(&second_parent);
        assert_eq!(unorphaned.iter().map(|x| x.id()).collect::<Vec<_>>(), vec![child_id]);
        assert!(unorphaned[0].mtx.is_verifiable());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_orphan_limits() {
        let mut config = Config::build_default(1000, true, 500_000);
        config.maximum_orphan_transaction_count = 2;
        config.maximum_orphan_transaction_mass = 1500;
        let mut pool = OrphanPool::new(Arc::new(config));
        for word in 1..=3 {
            pool.try_add_orphan(0, orphan(&[TransactionOutpoint::new(Hash::from_u64_word(word), 0)], &[1000]), Priority::Low, 0)
                .unwrap();
        }
        assert_eq!(pool.len(), 2);

        let mut heavy = orphan(&[TransactionOutpoint::new(Hash::from_u64_word(9), 0)], &[1000]);
        heavy.calculated_mass = Some(2000);
        assert_eq!(pool.try_add_orphan(0, heavy, Priority::Low, 0), Err(RuleError::RejectBadOrphanMass(2000, 1500)));
    }

    #[test]
    fn test_orphan_expiry_by_daa_score_and_wall_clock() {
        let config = Config::build_default(1000, true, 500_000);
        let (daa_interval, millis_interval) = (config.orphan_expire_interval_daa_score, config.orphan_expire_interval_milliseconds);
        let mut pool = OrphanPool::new(Arc::new(config));
        let stale_by_clock = orphan(&[TransactionOutpoint::new(Hash::from_u64_word(1), 0)], &[1000]);
        let stale_by_clock_id = stale_by_clock.id();
        let high_priority = orphan(&[TransactionOutpoint::new(Hash::from_u64_word(2), 0)], &[1000]);
        pool.try_add_orphan(100, stale_by_clock, Priority::Low, 0).unwrap();
        pool.try_add_orphan(100, high_priority, Priority::High, 0).unwrap();

        // The DAA score barely moved but the wall clock went past the interval
        let expired = pool.expire_low_priority_transactions(100 + daa_interval / 2, millis_interval + 1).unwrap();
        assert_eq!(expired, vec![stale_by_clock_id]);
        assert_eq!(pool.len(), 1);

        let expired = pool.expire_low_priority_transactions(200 + daa_interval, 2 * millis_interval).unwrap();
        assert!(expired.is_empty(), "high priority orphans never expire");
    }
}
