use super::{VirtualStateProcessor, utxo_validation::UtxoProcessingContext};
use crate::{
    model::stores::{
        headers::HeaderStoreReader,
        pruning::PruningStoreReader,
        utxo_multisets::UtxoMultisetsStoreReader,
        virtual_state::{VirtualState, VirtualStateStoreReader},
    },
    processes::{difficulty::calc_work, transaction_validator::TxValidationFlags},
};
use kestrel_consensus_core::{
    block::{BlockTemplate, MutableBlock},
    coinbase::MinerData,
    errors::{
        block::RuleError,
        tx::TxRuleError,
    },
    header::Header,
    merkle::{calc_accepted_id_merkle_root, calc_hash_merkle_root},
    tx::{Transaction, TransactionId},
    utxo::utxo_view::compose_one_diff_layer,
};
use kestrel_hashes::Hash;
use kestrel_core::{time::unix_now, trace};
use std::{iter::once, sync::Arc};

impl VirtualStateProcessor {
    /// Builds a block template on top of the current virtual. The given transactions must all be valid
    /// against the virtual UTXO set, otherwise the failing ones are reported with `RuleError::InvalidTransactions`
    pub fn build_block_template(&self, miner_data: MinerData, txs: Vec<Transaction>) -> Result<BlockTemplate, RuleError> {
        // The virtual state and UTXO set are read under the same guards so that both reflect one virtual
        let virtual_state_read = self.virtual_state_store.read();
        let virtual_state = virtual_state_read.get().expect("virtual state is initialized");
        let virtual_utxo_read = self.virtual_utxo_store.read();

        let mut calculated_fees = Vec::with_capacity(txs.len());
        let mut invalid: Vec<(TransactionId, TxRuleError)> = Vec::new();
        for tx in txs.iter() {
            let validation_result =
                self.validate_transaction_in_utxo_context(tx, &*virtual_utxo_read, virtual_state.daa_score, TxValidationFlags::Full);
            match validation_result {
                Ok(validated) => calculated_fees.push(validated.calculated_fee),
                Err(err) => invalid.push((tx.id(), err)),
            }
        }
        drop(virtual_utxo_read);
        drop(virtual_state_read);
        if !invalid.is_empty() {
            return Err(RuleError::InvalidTransactions(invalid));
        }

        self.assemble_block_template(&virtual_state, miner_data, txs, calculated_fees)
    }

    /// Builds a template for a block with exactly `parents`, as if the virtual had these parents. The selected
    /// chain of the selected parent is verified first if still pending. Used for constructing DAG shapes in tests
    pub fn build_block_template_with_parents(
        &self,
        parents: Vec<Hash>,
        miner_data: MinerData,
        txs: Vec<Transaction>,
    ) -> Result<BlockTemplate, RuleError> {
        let pruning_point = self.pruning_point_store.read().pruning_point().expect("pruning point is initialized");
        let virtual_state = self.virtual_state_store.read().get().expect("virtual state is initialized");

        let pov_sink = self.ghostdag_manager.find_selected_parent(parents.iter().copied());
        if self.resolve_chain_candidate(pov_sink, pruning_point, &virtual_state) != Some(pov_sink) {
            return Err(RuleError::SelectedParentNotUtxoValid(pov_sink));
        }
        let version = self.window_manager.block_version_for_selected_parent(pov_sink);
        let ghostdag_data = Arc::new(self.ghostdag_manager.ghostdag(&parents, version.ghostdag_k));

        let daa_window = self.window_manager.block_daa_window(&ghostdag_data);
        let bits = self.window_manager.calculate_difficulty_bits(&ghostdag_data, &daa_window);
        let (past_median_time, _) = self.window_manager.calc_past_median_time(&ghostdag_data);

        let virtual_utxo_read = self.virtual_utxo_store.read();
        let mut pov_diff = self.utxo_diff_from_virtual(&virtual_state, pov_sink);
        let sink_multiset = self.utxo_multisets_store.get(pov_sink).expect("UTXO valid blocks have a multiset");
        let mut ctx = UtxoProcessingContext::new(ghostdag_data.clone(), sink_multiset);
        self.calculate_utxo_state(&mut ctx, &compose_one_diff_layer(&*virtual_utxo_read, &pov_diff), daa_window.daa_score);
        pov_diff.with_diff_in_place(&ctx.mergeset_diff).expect("the mergeset diff composes over the selected parent");

        let pov_view = compose_one_diff_layer(&*virtual_utxo_read, &pov_diff);
        let mut calculated_fees = Vec::with_capacity(txs.len());
        let mut invalid: Vec<(TransactionId, TxRuleError)> = Vec::new();
        for tx in txs.iter() {
            match self.validate_transaction_in_utxo_context(tx, &pov_view, daa_window.daa_score, TxValidationFlags::Full) {
                Ok(validated) => calculated_fees.push(validated.calculated_fee),
                Err(err) => invalid.push((tx.id(), err)),
            }
        }
        drop(pov_view);
        drop(virtual_utxo_read);
        if !invalid.is_empty() {
            return Err(RuleError::InvalidTransactions(invalid));
        }

        let pov_state = VirtualState::new(
            parents,
            daa_window.daa_score,
            bits,
            past_median_time,
            ctx.multiset,
            ctx.mergeset_diff,
            ctx.accepted_tx_ids,
            ctx.mergeset_rewards,
            daa_window.mergeset_non_daa,
            (*ghostdag_data).clone(),
        );
        self.assemble_block_template(&pov_state, miner_data, txs, calculated_fees)
    }

    fn assemble_block_template(
        &self,
        virtual_state: &VirtualState,
        miner_data: MinerData,
        txs: Vec<Transaction>,
        calculated_fees: Vec<u64>,
    ) -> Result<BlockTemplate, RuleError> {
        let ghostdag_data = &virtual_state.ghostdag_data;
        let coinbase = self
            .coinbase_manager
            .expected_coinbase_transaction(
                virtual_state.daa_score,
                miner_data.clone(),
                ghostdag_data,
                &virtual_state.mergeset_rewards,
                &virtual_state.mergeset_non_daa,
            )
            .map_err(RuleError::BadCoinbaseTransaction)?;
        let has_red_reward = coinbase.has_red_reward;
        let txs: Vec<Transaction> = once(coinbase.tx).chain(txs).collect();

        let version = self.window_manager.block_version(ghostdag_data).version;
        let parents_by_level = self.parents_manager.calc_block_parents(&virtual_state.parents);
        let hash_merkle_root = calc_hash_merkle_root(txs.iter());
        let accepted_id_merkle_root = calc_accepted_id_merkle_root(virtual_state.accepted_tx_ids.iter().copied());
        let utxo_commitment = virtual_state.multiset.finalize();
        let timestamp = unix_now().max(virtual_state.past_median_time + 1);
        let blue_work = ghostdag_data.blue_work + calc_work(virtual_state.bits);
        let current_pruning_point = self.pruning_point_store.read().pruning_point().expect("pruning point is initialized");
        let pruning_point = self
            .pruning_point_manager
            .expected_header_pruning_point(ghostdag_data.to_compact(), virtual_state.daa_score)
            .unwrap_or(current_pruning_point);

        let header = Header::new_finalized(
            version,
            parents_by_level,
            hash_merkle_root,
            accepted_id_merkle_root,
            utxo_commitment,
            timestamp,
            virtual_state.bits,
            0,
            virtual_state.daa_score,
            blue_work,
            ghostdag_data.blue_score,
            pruning_point,
        );

        let selected_parent_hash = ghostdag_data.selected_parent;
        let selected_parent_header = self.headers_store.get_header(selected_parent_hash).expect("the sink has a header");
        trace!("Built a block template with {} transactions over sink {}", txs.len(), selected_parent_hash);

        Ok(BlockTemplate::new(
            MutableBlock::new(header, txs),
            miner_data,
            has_red_reward,
            selected_parent_header.timestamp,
            selected_parent_header.daa_score,
            selected_parent_hash,
            calculated_fees,
        ))
    }
}
