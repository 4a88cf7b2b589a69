use crate::{MiningCounters, model::candidate_tx::CandidateTransaction};

use self::{
    config::Config,
    frozen::FrozenScripts,
    model::{orphan_pool::OrphanPool, pool::Pool, transactions_pool::TransactionsPool},
    rate_limiter::CompoundRateLimiter,
};
use kestrel_consensus_core::tx::{MutableTransaction, TransactionId};
use std::sync::Arc;

pub(crate) mod check_transaction_standard;
pub mod config;
pub mod errors;
pub(crate) mod frozen;
pub(crate) mod handle_new_block_transactions;
pub(crate) mod model;
pub(crate) mod rate_limiter;
pub(crate) mod remove_transaction;
pub(crate) mod validate_and_insert_transaction;

#[cfg(test)]
mod tests;

/// Mempool contains transactions intended to be inserted into a block and mined.
///
/// Some important properties to consider:
///
/// - Transactions can be chained, so a transaction can have parents and chained
///   dependencies in the mempool.
/// - A transaction can have some of its outpoints refer to missing outputs when
///   added to the mempool. In this case it is considered orphan.
/// - An orphan transaction is unorphaned when all its UTXO entries have been
///   built or found.
/// - There are transaction priorities: high and low.
/// - Transactions submitted to the mempool by a RPC call have **high priority**.
///   They are owned by the node and never expire in the mempool.
/// - Transactions received through P2P have **low-priority**. They expire after
///   a number of DAA score units and are removed if not inserted in a block for mining.
/// - No two transactions of the mempool spend the same outpoint.
pub(crate) struct Mempool {
    config: Arc<Config>,
    transaction_pool: TransactionsPool,
    orphan_pool: OrphanPool,
    rate_limiter: CompoundRateLimiter,
    frozen_scripts: FrozenScripts,
    counters: Arc<MiningCounters>,
}

impl Mempool {
    pub(crate) fn new(config: Arc<Config>, counters: Arc<MiningCounters>) -> Self {
        let transaction_pool = TransactionsPool::new(config.clone());
        let orphan_pool = OrphanPool::new(config.clone());
        let rate_limiter = CompoundRateLimiter::new(
            config.compound_input_threshold,
            config.compound_mass_threshold,
            config.compound_rate_limit,
            config.compound_rate_limit_window_milliseconds,
        );
        let frozen_scripts = FrozenScripts::new(config.frozen_scripts.iter().cloned());
        Self { config, transaction_pool, orphan_pool, rate_limiter, frozen_scripts, counters }
    }

    pub(crate) fn get_transaction(
        &self,
        transaction_id: &TransactionId,
        include_transaction_pool: bool,
        include_orphan_pool: bool,
    ) -> Option<MutableTransaction> {
        let mut transaction = None;
        if include_transaction_pool {
            transaction = self.transaction_pool.get(transaction_id);
        }
        if transaction.is_none() && include_orphan_pool {
            transaction = self.orphan_pool.get(transaction_id);
        }
        transaction.map(|x| x.mtx.clone())
    }

    pub(crate) fn has_transaction(
        &self,
        transaction_id: &TransactionId,
        include_transaction_pool: bool,
        include_orphan_pool: bool,
    ) -> bool {
        (include_transaction_pool && self.transaction_pool.has(transaction_id))
            || (include_orphan_pool && self.orphan_pool.has(transaction_id))
    }

    pub(crate) fn get_all_transactions(
        &self,
        include_transaction_pool: bool,
        include_orphan_pool: bool,
    ) -> (Vec<MutableTransaction>, Vec<MutableTransaction>) {
        let mut transactions = vec![];
        let mut orphans = vec![];
        if include_transaction_pool {
            transactions = self.transaction_pool.get_all_transactions()
        }
        if include_orphan_pool {
            orphans = self.orphan_pool.get_all_transactions()
        }
        (transactions, orphans)
    }

    pub(crate) fn transaction_count(&self, include_transaction_pool: bool, include_orphan_pool: bool) -> usize {
        let mut count = 0;
        if include_transaction_pool {
            count += self.transaction_pool.len()
        }
        if include_orphan_pool {
            count += self.orphan_pool.len()
        }
        count
    }

    pub(crate) fn block_candidate_transactions(&self) -> Vec<CandidateTransaction> {
        self.transaction_pool.all_ready_transactions()
    }
}

pub mod tx {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Priority {
        Low,
        High,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Orphan {
        Forbidden,
        Allowed,
    }
}
