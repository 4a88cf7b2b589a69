use super::VirtualStateProcessor;
use crate::{
    model::stores::{
        block_transactions::BlockTransactionsStoreReader,
        daa::DaaStoreReader,
        ghostdag::GhostdagData,
        virtual_state::VirtualStateStoreReader,
    },
    processes::transaction_validator::TxValidationFlags,
};
use kestrel_consensus_core::{
    BlockHashMap, BlockHashSet, HashMapCustomHasher,
    acceptance_data::{AcceptanceData, MergesetBlockAcceptanceData, TxAcceptanceEntry},
    coinbase::{BlockRewardData, MinerData},
    errors::{
        block::{BlockProcessResult, RuleError},
        coinbase::CoinbaseError,
        tx::{TxResult, TxRuleError},
    },
    header::Header,
    merkle::calc_accepted_id_merkle_root,
    multiset::MultisetExtensions,
    tx::{MutableTransaction, PopulatedTransaction, Transaction, TransactionId, ValidatedTransaction, VerifiableTransaction},
    utxo::{
        utxo_diff::UtxoDiff,
        utxo_view::{UtxoView, compose_one_diff_layer},
    },
};
use kestrel_core::trace;
use kestrel_hashes::Hash;
use kestrel_multiset::Multiset;
use rayon::prelude::*;
use std::{iter::once, ops::Deref, sync::Arc};

/// A context for processing the UTXO state of a block with respect to its selected parent.
/// Note this can also be the virtual block.
pub(super) struct UtxoProcessingContext {
    pub ghostdag_data: Arc<GhostdagData>,
    pub multiset: Multiset,
    pub mergeset_diff: UtxoDiff,
    pub accepted_tx_ids: Vec<TransactionId>,
    pub mergeset_acceptance_data: AcceptanceData,
    pub mergeset_rewards: BlockHashMap<BlockRewardData>,
}

impl UtxoProcessingContext {
    pub fn new(ghostdag_data: Arc<GhostdagData>, selected_parent_multiset: Multiset) -> Self {
        let mergeset_size = ghostdag_data.mergeset_size();
        Self {
            ghostdag_data,
            multiset: selected_parent_multiset,
            mergeset_diff: UtxoDiff::default(),
            accepted_tx_ids: Vec::with_capacity(1), // At least the selected parent coinbase
            mergeset_acceptance_data: Vec::with_capacity(mergeset_size),
            mergeset_rewards: BlockHashMap::with_capacity(mergeset_size),
        }
    }

    pub fn selected_parent(&self) -> Hash {
        self.ghostdag_data.selected_parent
    }
}

impl VirtualStateProcessor {
    /// Calculates the UTXO state and transaction acceptance data of a block relative to its selected parent state.
    ///
    /// Only the coinbase of the selected parent is accepted. The rest of the mergeset is applied in consensus
    /// order, each block against the view left by the blocks before it, so a transaction spending an outpoint
    /// already spent by an earlier mergeset block is simply not accepted
    pub(super) fn calculate_utxo_state<V: UtxoView + Sync>(
        &self,
        ctx: &mut UtxoProcessingContext,
        selected_parent_utxo_view: &V,
        pov_daa_score: u64,
    ) {
        let selected_parent = ctx.selected_parent();
        let selected_parent_transactions = self.block_transactions_store.get(selected_parent).expect("chain blocks have bodies");
        let validated_coinbase = ValidatedTransaction::new_coinbase(&selected_parent_transactions[0]);
        let coinbase_id = validated_coinbase.id();

        ctx.mergeset_diff.add_transaction(&validated_coinbase, pov_daa_score).expect("coinbase outputs are unique");
        ctx.multiset.add_transaction(&validated_coinbase, pov_daa_score);
        ctx.accepted_tx_ids.push(coinbase_id);

        let ghostdag_data = ctx.ghostdag_data.clone();
        let mergeset = once((selected_parent, selected_parent_transactions)).chain(
            ghostdag_data
                .consensus_ordered_mergeset_without_selected_parent(self.ghostdag_store.deref())
                .map(|block| (block, self.block_transactions_store.get(block).expect("mergeset blocks have bodies"))),
        );

        for (i, (merged_block, txs)) in mergeset.enumerate() {
            // The selected parent transactions were fully checked when it was verified as a chain block
            let is_selected_parent = i == 0;
            let flags = if is_selected_parent { TxValidationFlags::SkipScriptChecks } else { TxValidationFlags::Full };

            let results = {
                let composed_view = compose_one_diff_layer(selected_parent_utxo_view, &ctx.mergeset_diff);
                self.validate_transactions_in_parallel(&txs, &composed_view, pov_daa_score, flags)
            };

            let mut entries = Vec::with_capacity(txs.len());
            if is_selected_parent {
                entries.push(TxAcceptanceEntry {
                    transaction_id: coinbase_id,
                    index_within_block: 0,
                    accepted: true,
                    fee: 0,
                    input_entries: Vec::new(),
                });
            }

            let mut block_fee = 0u64;
            for (index, result) in (1u32..).zip(results) {
                match result {
                    Ok(validated_tx) => {
                        let transaction_id = validated_tx.id();
                        ctx.mergeset_diff.add_transaction(&validated_tx, pov_daa_score).expect("validated against the composed view");
                        ctx.multiset.add_transaction(&validated_tx, pov_daa_score);
                        ctx.accepted_tx_ids.push(transaction_id);
                        block_fee += validated_tx.calculated_fee;
                        entries.push(TxAcceptanceEntry {
                            transaction_id,
                            index_within_block: index,
                            accepted: true,
                            fee: validated_tx.calculated_fee,
                            input_entries: validated_tx.entries,
                        });
                    }
                    Err(err) => {
                        let transaction_id = txs[index as usize].id();
                        trace!("Transaction {} of merged block {} was not accepted: {}", transaction_id, merged_block, err);
                        entries.push(TxAcceptanceEntry {
                            transaction_id,
                            index_within_block: index,
                            accepted: false,
                            fee: 0,
                            input_entries: Vec::new(),
                        });
                    }
                }
            }
            ctx.mergeset_acceptance_data.push(MergesetBlockAcceptanceData { block_hash: merged_block, transactions: entries });

            // Trusted bodies skip the payload check, so a broken payload leaves the block without reward data
            // and fails the coinbase verification of whoever merges it
            if let Ok(coinbase_data) = self.coinbase_manager.deserialize_coinbase_payload(&txs[0].payload) {
                ctx.mergeset_rewards.insert(
                    merged_block,
                    BlockRewardData::new(coinbase_data.subsidy, block_fee, coinbase_data.miner_data.script_public_key),
                );
            }
        }
    }

    /// Verify that the current block fully respects its own UTXO view. We define a block as
    /// UTXO valid if all the following conditions hold:
    ///     1. The header blue score and blue work match its GHOSTDAG data.
    ///     2. The block header includes the expected `utxo_commitment`.
    ///     3. The block header includes the expected `accepted_id_merkle_root`.
    ///     4. The block coinbase transaction rewards the mergeset blocks correctly.
    ///     5. All non-coinbase block transactions are valid against its own UTXO view.
    pub(super) fn verify_expected_utxo_state<V: UtxoView + Sync>(
        &self,
        ctx: &UtxoProcessingContext,
        selected_parent_utxo_view: &V,
        header: &Header,
    ) -> BlockProcessResult<()> {
        if header.blue_score != ctx.ghostdag_data.blue_score {
            return Err(RuleError::UnexpectedBlueScore(header.blue_score, ctx.ghostdag_data.blue_score));
        }
        if header.blue_work != ctx.ghostdag_data.blue_work {
            return Err(RuleError::UnexpectedBlueWork(header.blue_work, ctx.ghostdag_data.blue_work));
        }

        let expected_commitment = ctx.multiset.finalize();
        if expected_commitment != header.utxo_commitment {
            return Err(RuleError::BadUTXOCommitment(header.utxo_commitment, expected_commitment));
        }

        let expected_accepted_id_merkle_root = calc_accepted_id_merkle_root(ctx.accepted_tx_ids.iter().copied());
        if expected_accepted_id_merkle_root != header.accepted_id_merkle_root {
            return Err(RuleError::BadAcceptedIDMerkleRoot(header.accepted_id_merkle_root, expected_accepted_id_merkle_root));
        }

        let txs = self.block_transactions_store.get(header.hash).expect("chain candidates have bodies");

        let mergeset_non_daa = self.daa_excluded_store.get_mergeset_non_daa(header.hash).expect("stored with the header");
        self.verify_coinbase_transaction(&txs[0], header.daa_score, &ctx.ghostdag_data, &ctx.mergeset_rewards, &mergeset_non_daa)?;

        let current_utxo_view = compose_one_diff_layer(selected_parent_utxo_view, &ctx.mergeset_diff);
        let failed: Vec<(TransactionId, TxRuleError)> = self
            .validate_transactions_in_parallel(&txs, &current_utxo_view, header.daa_score, TxValidationFlags::Full)
            .into_iter()
            .zip(txs.iter().skip(1))
            .filter_map(|(result, tx)| result.err().map(|err| (tx.id(), err)))
            .collect();
        if !failed.is_empty() {
            return Err(RuleError::InvalidTransactions(failed));
        }

        Ok(())
    }

    fn verify_coinbase_transaction(
        &self,
        coinbase: &Transaction,
        daa_score: u64,
        ghostdag_data: &GhostdagData,
        mergeset_rewards: &BlockHashMap<BlockRewardData>,
        mergeset_non_daa: &BlockHashSet,
    ) -> BlockProcessResult<()> {
        // Extract only the miner data, the rest of the payload must match the expected one
        let miner_data: MinerData = self
            .coinbase_manager
            .deserialize_coinbase_payload(&coinbase.payload)
            .map_err(RuleError::BadCoinbaseTransaction)?
            .miner_data;
        let expected = self
            .coinbase_manager
            .expected_coinbase_transaction(daa_score, miner_data, ghostdag_data, mergeset_rewards, mergeset_non_daa)
            .map_err(RuleError::BadCoinbaseTransaction)?;
        if coinbase.outputs != expected.tx.outputs || coinbase.payload != expected.tx.payload {
            return Err(RuleError::BadCoinbaseTransaction(CoinbaseError::UnexpectedOutputs));
        }
        Ok(())
    }

    /// Validates the non-coinbase transactions of a block against `utxo_view`. The result at position `i`
    /// belongs to the transaction at index `i + 1`
    pub(super) fn validate_transactions_in_parallel<'a, V: UtxoView + Sync>(
        &self,
        txs: &'a [Transaction],
        utxo_view: &V,
        pov_daa_score: u64,
        flags: TxValidationFlags,
    ) -> Vec<TxResult<ValidatedTransaction<'a>>> {
        txs.par_iter().skip(1).map(|tx| self.validate_transaction_in_utxo_context(tx, utxo_view, pov_daa_score, flags)).collect()
    }

    pub(super) fn validate_transaction_in_utxo_context<'a>(
        &self,
        transaction: &'a Transaction,
        utxo_view: &impl UtxoView,
        pov_daa_score: u64,
        flags: TxValidationFlags,
    ) -> TxResult<ValidatedTransaction<'a>> {
        let mut entries = Vec::with_capacity(transaction.inputs.len());
        let mut missing = Vec::new();
        for input in transaction.inputs.iter() {
            match utxo_view.get(&input.previous_outpoint) {
                Some(entry) => entries.push(entry),
                None => missing.push(input.previous_outpoint),
            }
        }
        if !missing.is_empty() {
            return Err(TxRuleError::MissingTxOutpoints(missing));
        }
        let populated_tx = PopulatedTransaction::new(transaction, entries);
        let fee = self.transaction_validator.validate_populated_transaction_and_get_fee(&populated_tx, pov_daa_score, flags)?;
        Ok(ValidatedTransaction::new(populated_tx, fee))
    }

    /// Validates a mempool transaction in the context of the virtual. Inputs not populated by the caller are
    /// looked up in the virtual UTXO set; on success the fee and mass of the transaction are set
    pub fn validate_mempool_transaction(&self, mutable_tx: &mut MutableTransaction) -> TxResult<()> {
        let virtual_state = self.virtual_state_store.read().get().expect("virtual state is initialized");
        let tx = mutable_tx.tx.as_ref();
        self.transaction_validator.validate_tx_in_isolation(tx, virtual_state.daa_score)?;
        self.transaction_validator.validate_tx_in_header_context(tx, virtual_state.daa_score, virtual_state.past_median_time)?;

        let virtual_utxo_read = self.virtual_utxo_store.read();
        for (input, entry) in tx.inputs.iter().zip(mutable_tx.entries.iter_mut()) {
            if entry.is_none() {
                *entry = virtual_utxo_read.get(&input.previous_outpoint);
            }
        }
        drop(virtual_utxo_read);

        let missing: Vec<_> = mutable_tx.missing_outpoints().collect();
        if !missing.is_empty() {
            return Err(TxRuleError::MissingTxOutpoints(missing));
        }

        let fee = self.transaction_validator.validate_populated_transaction_and_get_fee(
            &mutable_tx.as_verifiable(),
            virtual_state.daa_score,
            TxValidationFlags::SkipMassCheck,
        )?;
        mutable_tx.calculated_fee = Some(fee);
        mutable_tx.calculated_mass = Some(self.transaction_validator.mass_calculator().calc_tx_mass(mutable_tx.tx.as_ref()));
        Ok(())
    }
}
