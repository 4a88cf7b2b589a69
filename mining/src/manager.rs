use crate::{
    MiningCounters,
    block_template::{BuilderError, builder::BlockTemplateBuilder},
    cache::BlockTemplateCache,
    errors::MiningManagerResult,
    mempool::{
        Mempool,
        config::Config,
        errors::RuleError,
        model::tx::{MempoolTransaction, TxRemovalReason},
        tx::{Orphan, Priority},
    },
    model::candidate_tx::CandidateTransaction,
};
use kestrel_consensus_core::{
    api::{ConsensusApi, DynConsensus},
    block::BlockTemplate,
    coinbase::MinerData,
    errors::block::RuleError as BlockRuleError,
    tx::{MutableTransaction, Transaction, TransactionId, TransactionOutput},
};
use kestrel_core::{debug, time::unix_now, warn};
use parking_lot::RwLock;
use std::sync::{Arc, atomic::Ordering};
use tokio::task::spawn_blocking;

pub struct MiningManager {
    config: Arc<Config>,
    block_template_builder: BlockTemplateBuilder,
    block_template_cache: BlockTemplateCache,
    mempool: RwLock<Mempool>,
    counters: Arc<MiningCounters>,
}

impl MiningManager {
    pub fn new(config: Config, cache_lifetime: Option<u64>, counters: Arc<MiningCounters>) -> Self {
        let config = Arc::new(config);
        let block_template_builder = BlockTemplateBuilder::new(config.block_template_mass_budget());
        let mempool = RwLock::new(Mempool::new(config.clone(), counters.clone()));
        let block_template_cache = BlockTemplateCache::new(cache_lifetime);
        Self { config, block_template_builder, block_template_cache, mempool, counters }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a block template paying `miner_data`, from the cache if a fresh one was built for the same
    /// miner data.
    ///
    /// Transactions consensus rejects from the template are removed from the mempool along with their
    /// redeemers before retrying, up to the configured number of attempts.
    pub fn get_block_template(&self, consensus: &dyn ConsensusApi, miner_data: &MinerData) -> MiningManagerResult<BlockTemplate> {
        let mut cache_lock = self.block_template_cache.lock();
        if let Some(cached_template) = cache_lock.get_cached_template(miner_data, unix_now()) {
            return Ok(cached_template.as_ref().clone());
        }

        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            let transactions = self.block_candidate_transactions();
            match self.block_template_builder.build_block_template(consensus, miner_data, transactions) {
                Ok(block_template) => {
                    let block_template = cache_lock.set_cached_template(block_template, unix_now());
                    return Ok(block_template.as_ref().clone());
                }
                Err(BuilderError::ConsensusError(BlockRuleError::InvalidTransactions(invalid_transactions))) => {
                    let mut mempool = self.mempool.write();
                    for (transaction_id, err) in invalid_transactions.iter() {
                        let extra_info = format!(" error: {err}");
                        if let Err(err) =
                            mempool.remove_transaction(transaction_id, true, TxRemovalReason::InvalidInBlockTemplate, &extra_info)
                        {
                            // Removing keeps going for the remaining invalid transactions
                            warn!("Failed removing transaction {} invalid in block template: {}", transaction_id, err);
                        }
                    }
                    drop(mempool);
                    if attempts >= self.config.maximum_build_block_template_attempts {
                        return Err(BuilderError::TooManyAttempts(attempts))?;
                    }
                }
                Err(err) => {
                    return Err(err)?;
                }
            }
        }
    }

    pub(crate) fn block_candidate_transactions(&self) -> Vec<CandidateTransaction> {
        self.mempool.read().block_candidate_transactions()
    }

    /// Clears the block template cache, forcing the next call to get_block_template to build a new block template.
    pub fn clear_block_template(&self) {
        self.block_template_cache.clear();
    }

    /// Validates the given transaction and adds it to the set of known transactions that have not yet been
    /// added to any block.
    ///
    /// Returns the accepted transaction followed by the orphans it unorphaned. The returned transactions
    /// are clones of objects owned by the mempool.
    pub fn validate_and_insert_transaction(
        &self,
        consensus: &dyn ConsensusApi,
        transaction: Transaction,
        priority: Priority,
        orphan: Orphan,
    ) -> MiningManagerResult<Vec<Arc<Transaction>>> {
        self.validate_and_insert_mutable_transaction(consensus, MutableTransaction::new(Arc::new(transaction)), priority, orphan)
    }

    pub fn validate_and_insert_mutable_transaction(
        &self,
        consensus: &dyn ConsensusApi,
        transaction: MutableTransaction,
        priority: Priority,
        orphan: Orphan,
    ) -> MiningManagerResult<Vec<Arc<Transaction>>> {
        self.validate_and_insert_mutable_transaction_at(consensus, transaction, priority, orphan, unix_now())
    }

    /// Same as `validate_and_insert_mutable_transaction` with `now` as the wall clock time in milliseconds
    pub(crate) fn validate_and_insert_mutable_transaction_at(
        &self,
        consensus: &dyn ConsensusApi,
        transaction: MutableTransaction,
        priority: Priority,
        orphan: Orphan,
        now: u64,
    ) -> MiningManagerResult<Vec<Arc<Transaction>>> {
        let result = self.validate_and_insert_single_transaction(consensus, transaction, priority, orphan, now);
        match result {
            Ok(Some(accepted_transaction)) => {
                self.counters.tx_accepted_counts.fetch_add(1, Ordering::Relaxed);
                let unorphaned_transactions =
                    self.mempool.write().get_unorphaned_transactions_after_accepted_transaction(&accepted_transaction);

                // The capacity may be exceeded since unorphaned transactions may themselves unorphan other transactions
                let mut accepted_transactions = Vec::with_capacity(unorphaned_transactions.len() + 1);
                accepted_transactions.push(accepted_transaction);
                accepted_transactions.extend(self.validate_and_insert_unorphaned_transactions(
                    consensus,
                    unorphaned_transactions,
                    now,
                ));
                Ok(accepted_transactions)
            }
            Ok(None) => Ok(vec![]),
            Err(err) => {
                self.counters.tx_rejected_counts.fetch_add(1, Ordering::Relaxed);
                Err(err)?
            }
        }
    }

    fn validate_and_insert_single_transaction(
        &self,
        consensus: &dyn ConsensusApi,
        transaction: MutableTransaction,
        priority: Priority,
        orphan: Orphan,
        now: u64,
    ) -> Result<Option<Arc<Transaction>>, RuleError> {
        // read lock on mempool
        let mut transaction = self.mempool.read().pre_validate_and_populate_transaction(consensus, transaction)?;
        // no lock on mempool
        let validation_result = consensus.validate_mempool_transaction(&mut transaction).map_err(RuleError::from);
        // write lock on mempool
        self.mempool.write().post_validate_and_insert_transaction(consensus, validation_result, transaction, priority, orphan, now)
    }

    /// Revalidates and inserts transactions out of the orphan pool, looping as long as accepted ones unorphan
    /// others. A transaction still missing an outpoint goes back to the orphan pool.
    fn validate_and_insert_unorphaned_transactions(
        &self,
        consensus: &dyn ConsensusApi,
        mut incoming_transactions: Vec<MempoolTransaction>,
        now: u64,
    ) -> Vec<Arc<Transaction>> {
        let mut accepted_transactions = Vec::with_capacity(incoming_transactions.len());
        while let Some(transaction) = incoming_transactions.pop() {
            let transaction_id = transaction.id();
            let priority = transaction.priority;
            let mut mtx = transaction.mtx;
            // no lock on mempool
            let validation_result = consensus.validate_mempool_transaction(&mut mtx).map_err(RuleError::from);
            // write lock on mempool
            let mut mempool = self.mempool.write();
            match mempool.post_validate_and_insert_transaction(consensus, validation_result, mtx, priority, Orphan::Allowed, now) {
                Ok(Some(accepted_transaction)) => {
                    incoming_transactions
                        .extend(mempool.get_unorphaned_transactions_after_accepted_transaction(&accepted_transaction));
                    accepted_transactions.push(accepted_transaction);
                }
                Ok(None) => {}
                Err(err) => {
                    debug!("Failed to unorphan transaction {} due to rule error: {}", transaction_id, err);
                }
            }
        }
        accepted_transactions
    }

    /// Reconciles the mempool with a newly accepted block: its transactions and their double spends leave the
    /// mempool, the orphans it unorphaned are revalidated and stale entries expire.
    ///
    /// Returns the unorphaned transactions which were accepted.
    pub fn handle_new_block_transactions(
        &self,
        consensus: &dyn ConsensusApi,
        block_transactions: &[Transaction],
    ) -> MiningManagerResult<Vec<Arc<Transaction>>> {
        let now = unix_now();
        // write lock on mempool
        let unorphaned_transactions = self.mempool.write().handle_new_block_transactions(block_transactions)?;
        // alternate no & write lock on mempool
        let accepted_transactions = self.validate_and_insert_unorphaned_transactions(consensus, unorphaned_transactions, now);
        self.expire_low_priority_transactions_at(consensus.get_virtual_daa_score(), now)?;
        self.clear_block_template();
        Ok(accepted_transactions)
    }

    pub fn expire_low_priority_transactions(&self, consensus: &dyn ConsensusApi) -> MiningManagerResult<()> {
        self.expire_low_priority_transactions_at(consensus.get_virtual_daa_score(), unix_now())
    }

    fn expire_low_priority_transactions_at(&self, virtual_daa_score: u64, now: u64) -> MiningManagerResult<()> {
        Ok(self.mempool.write().expire_low_priority_transactions(virtual_daa_score, now)?)
    }

    /// Returns a mempool transaction by its id. The transaction is an orphan if `is_fully_populated` is false.
    pub fn get_transaction(
        &self,
        transaction_id: &TransactionId,
        include_transaction_pool: bool,
        include_orphan_pool: bool,
    ) -> Option<MutableTransaction> {
        self.mempool.read().get_transaction(transaction_id, include_transaction_pool, include_orphan_pool)
    }

    pub fn has_transaction(&self, transaction_id: &TransactionId, include_transaction_pool: bool, include_orphan_pool: bool) -> bool {
        self.mempool.read().has_transaction(transaction_id, include_transaction_pool, include_orphan_pool)
    }

    pub fn get_all_transactions(
        &self,
        include_transaction_pool: bool,
        include_orphan_pool: bool,
    ) -> (Vec<MutableTransaction>, Vec<MutableTransaction>) {
        self.mempool.read().get_all_transactions(include_transaction_pool, include_orphan_pool)
    }

    pub fn transaction_count(&self, include_transaction_pool: bool, include_orphan_pool: bool) -> usize {
        self.mempool.read().transaction_count(include_transaction_pool, include_orphan_pool)
    }

    /// Whether the output value is too small for the cost of spending it. Dust is defined in terms of the
    /// minimum relay fee: an output costing more than a third of it to spend is dust.
    pub fn is_transaction_output_dust(&self, transaction_output: &TransactionOutput) -> bool {
        self.mempool.read().is_transaction_output_dust(transaction_output)
    }
}

/// Async proxy for the mining manager. Calls run on the blocking thread pool since they may hold the
/// mempool lock while consensus validates.
#[derive(Clone)]
pub struct MiningManagerProxy {
    inner: Arc<MiningManager>,
}

impl MiningManagerProxy {
    pub fn new(inner: Arc<MiningManager>) -> Self {
        Self { inner }
    }

    pub async fn get_block_template(self, consensus: DynConsensus, miner_data: MinerData) -> MiningManagerResult<BlockTemplate> {
        spawn_blocking(move || self.inner.get_block_template(consensus.as_ref(), &miner_data))
            .await
            .expect("mining manager task does not panic")
    }

    /// Clears the block template cache, forcing the next call to get_block_template to build a new block template.
    pub fn clear_block_template(&self) {
        self.inner.clear_block_template()
    }

    pub async fn validate_and_insert_transaction(
        self,
        consensus: DynConsensus,
        transaction: Transaction,
        priority: Priority,
        orphan: Orphan,
    ) -> MiningManagerResult<Vec<Arc<Transaction>>> {
        spawn_blocking(move || self.inner.validate_and_insert_transaction(consensus.as_ref(), transaction, priority, orphan))
            .await
            .expect("mining manager task does not panic")
    }

    pub async fn handle_new_block_transactions(
        self,
        consensus: DynConsensus,
        block_transactions: Arc<Vec<Transaction>>,
    ) -> MiningManagerResult<Vec<Arc<Transaction>>> {
        spawn_blocking(move || self.inner.handle_new_block_transactions(consensus.as_ref(), &block_transactions))
            .await
            .expect("mining manager task does not panic")
    }

    pub async fn expire_low_priority_transactions(self, consensus: DynConsensus) -> MiningManagerResult<()> {
        spawn_blocking(move || self.inner.expire_low_priority_transactions(consensus.as_ref()))
            .await
            .expect("mining manager task does not panic")
    }

    /// Returns a mempool transaction by its id. The transaction is an orphan if `is_fully_populated` is false.
    pub async fn get_transaction(
        self,
        transaction_id: TransactionId,
        include_transaction_pool: bool,
        include_orphan_pool: bool,
    ) -> Option<MutableTransaction> {
        spawn_blocking(move || self.inner.get_transaction(&transaction_id, include_transaction_pool, include_orphan_pool))
            .await
            .expect("mining manager task does not panic")
    }

    pub async fn has_transaction(
        self,
        transaction_id: TransactionId,
        include_transaction_pool: bool,
        include_orphan_pool: bool,
    ) -> bool {
        spawn_blocking(move || self.inner.has_transaction(&transaction_id, include_transaction_pool, include_orphan_pool))
            .await
            .expect("mining manager task does not panic")
    }

    pub async fn transaction_count(self, include_transaction_pool: bool, include_orphan_pool: bool) -> usize {
        spawn_blocking(move || self.inner.transaction_count(include_transaction_pool, include_orphan_pool))
            .await
            .expect("mining manager task does not panic")
    }

    pub async fn get_all_transactions(
        self,
        include_transaction_pool: bool,
        include_orphan_pool: bool,
    ) -> (Vec<MutableTransaction>, Vec<MutableTransaction>) {
        spawn_blocking(move || self.inner.get_all_transactions(include_transaction_pool, include_orphan_pool))
            .await
            .expect("mining manager task does not panic")
    }
}
