use super::selector::TransactionsSelector;
use crate::{block_template::BuilderResult, model::candidate_tx::CandidateTransaction};
use kestrel_consensus_core::{api::ConsensusApi, block::BlockTemplate, coinbase::MinerData};
use kestrel_core::time::Stopwatch;

pub(crate) struct BlockTemplateBuilder {
    /// Mass available to mempool transactions, the coinbase reserve excluded
    mass_budget: u64,
}

impl BlockTemplateBuilder {
    pub(crate) fn new(mass_budget: u64) -> Self {
        Self { mass_budget }
    }

    /// Builds a block template with the best paying candidates fitting the mass budget.
    ///
    /// The template parents are the virtual parents, its coinbase pays `miner_data` the subsidy and
    /// the fees of the selected transactions. Consensus validates the selection against the virtual
    /// UTXO set and reports the transactions it rejects with a
    /// [`kestrel_consensus_core::errors::block::RuleError::InvalidTransactions`] error, so the caller may remove them from the
    /// mempool and retry.
    pub(crate) fn build_block_template(
        &self,
        consensus: &dyn ConsensusApi,
        miner_data: &MinerData,
        transactions: Vec<CandidateTransaction>,
    ) -> BuilderResult<BlockTemplate> {
        let _sw = Stopwatch::<100>::with_threshold("build_block_template op");
        let selector = TransactionsSelector::new(self.mass_budget, transactions);
        let block_txs = selector.select_transactions();
        Ok(consensus.build_block_template(miner_data.clone(), block_txs)?)
    }
}
