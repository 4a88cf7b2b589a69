//! Async access to the synchronous consensus API.
//!
//! Consensus calls may block on the processing lock or on disk reads, so async callers must never
//! invoke them directly from a runtime worker. Each `async_*` method clones the consensus handle and
//! runs the call on the blocking thread pool.

use kestrel_consensus_core::{
    BlueWorkType, ChainPath,
    acceptance_data::AcceptanceData,
    api::{ConsensusApi, ConsensusStats, DynConsensus},
    block::{Block, BlockTemplate},
    blockstatus::BlockStatus,
    coinbase::MinerData,
    errors::{
        block::{BlockProcessResult, RuleError},
        consensus::ConsensusResult,
        pruning::PruningImportResult,
        tx::TxResult,
    },
    header::Header,
    pruning::PruningPointProof,
    trusted::{ExternalGhostdagData, PruningPointTrustedData, TrustedBlock},
    tx::{MutableTransaction, Transaction, TransactionOutpoint, UtxoEntry},
};
use kestrel_hashes::Hash;
use std::{ops::Deref, sync::Arc};
use tokio::task::spawn_blocking;

#[derive(Clone)]
pub struct ConsensusProxy {
    consensus: DynConsensus,
}

impl ConsensusProxy {
    pub fn new(consensus: DynConsensus) -> Self {
        Self { consensus }
    }

    /// Runs `op` on the blocking pool with a clone of the consensus handle
    async fn clone_and_spawn_blocking<F, R>(&self, op: F) -> R
    where
        F: FnOnce(&dyn ConsensusApi) -> R + Send + 'static,
        R: Send + 'static,
    {
        let consensus = self.consensus.clone();
        spawn_blocking(move || op(consensus.as_ref())).await.expect("consensus calls do not panic")
    }

    pub async fn async_validate_and_insert_block(&self, block: Block) -> BlockProcessResult<BlockStatus> {
        self.clone_and_spawn_blocking(move |c| c.validate_and_insert_block(block)).await
    }

    pub async fn async_validate_and_insert_trusted_block(&self, trusted_block: TrustedBlock) -> BlockProcessResult<BlockStatus> {
        self.clone_and_spawn_blocking(move |c| c.validate_and_insert_trusted_block(trusted_block)).await
    }

    pub async fn async_build_block_template(&self, miner_data: MinerData, txs: Vec<Transaction>) -> Result<BlockTemplate, RuleError> {
        self.clone_and_spawn_blocking(move |c| c.build_block_template(miner_data, txs)).await
    }

    /// Validates the transaction against the virtual and returns it with its entries, fee and mass populated
    pub async fn async_validate_mempool_transaction(
        &self,
        mut transaction: MutableTransaction,
    ) -> (MutableTransaction, TxResult<()>) {
        self.clone_and_spawn_blocking(move |c| {
            let res = c.validate_mempool_transaction(&mut transaction);
            (transaction, res)
        })
        .await
    }

    pub async fn async_get_virtual_daa_score(&self) -> u64 {
        self.clone_and_spawn_blocking(|c| c.get_virtual_daa_score()).await
    }

    pub async fn async_get_virtual_merge_depth_blue_work_threshold(&self) -> BlueWorkType {
        self.clone_and_spawn_blocking(|c| c.get_virtual_merge_depth_blue_work_threshold()).await
    }

    pub async fn async_get_sink(&self) -> Hash {
        self.clone_and_spawn_blocking(|c| c.get_sink()).await
    }

    pub async fn async_get_sink_timestamp(&self) -> u64 {
        self.clone_and_spawn_blocking(|c| c.get_sink_timestamp()).await
    }

    pub async fn async_get_headers_selected_tip(&self) -> Hash {
        self.clone_and_spawn_blocking(|c| c.get_headers_selected_tip()).await
    }

    pub async fn async_get_tips(&self) -> Vec<Hash> {
        self.clone_and_spawn_blocking(|c| c.get_tips()).await
    }

    pub async fn async_get_block_status(&self, hash: Hash) -> Option<BlockStatus> {
        self.clone_and_spawn_blocking(move |c| c.get_block_status(hash)).await
    }

    pub async fn async_get_header(&self, hash: Hash) -> ConsensusResult<Arc<Header>> {
        self.clone_and_spawn_blocking(move |c| c.get_header(hash)).await
    }

    pub async fn async_get_block(&self, hash: Hash) -> ConsensusResult<Block> {
        self.clone_and_spawn_blocking(move |c| c.get_block(hash)).await
    }

    pub async fn async_get_ghostdag_data(&self, hash: Hash) -> ConsensusResult<ExternalGhostdagData> {
        self.clone_and_spawn_blocking(move |c| c.get_ghostdag_data(hash)).await
    }

    pub async fn async_get_block_acceptance_data(&self, hash: Hash) -> ConsensusResult<Arc<AcceptanceData>> {
        self.clone_and_spawn_blocking(move |c| c.get_block_acceptance_data(hash)).await
    }

    pub async fn async_get_anticone(&self, block: Hash, context: Hash) -> ConsensusResult<Vec<Hash>> {
        self.clone_and_spawn_blocking(move |c| c.get_anticone(block, context)).await
    }

    pub async fn async_get_virtual_chain_from_block(&self, low: Hash) -> ConsensusResult<ChainPath> {
        self.clone_and_spawn_blocking(move |c| c.get_virtual_chain_from_block(low)).await
    }

    pub async fn async_is_chain_ancestor_of(&self, low: Hash, high: Hash) -> ConsensusResult<bool> {
        self.clone_and_spawn_blocking(move |c| c.is_chain_ancestor_of(low, high)).await
    }

    pub async fn async_get_hashes_between(&self, low: Hash, high: Hash, max_blocks: usize) -> ConsensusResult<(Vec<Hash>, Hash)> {
        self.clone_and_spawn_blocking(move |c| c.get_hashes_between(low, high, max_blocks)).await
    }

    pub async fn async_get_missing_block_body_hashes(&self, high: Hash) -> ConsensusResult<Vec<Hash>> {
        self.clone_and_spawn_blocking(move |c| c.get_missing_block_body_hashes(high)).await
    }

    pub async fn async_get_stats(&self) -> ConsensusStats {
        self.clone_and_spawn_blocking(|c| c.get_stats()).await
    }

    pub async fn async_is_nearly_synced(&self) -> bool {
        self.clone_and_spawn_blocking(|c| c.is_nearly_synced()).await
    }

    pub async fn async_create_block_locator_from_pruning_point(&self, high: Hash, limit: usize) -> ConsensusResult<Vec<Hash>> {
        self.clone_and_spawn_blocking(move |c| c.create_block_locator_from_pruning_point(high, limit)).await
    }

    pub async fn async_create_virtual_selected_chain_block_locator(
        &self,
        low: Option<Hash>,
        high: Option<Hash>,
    ) -> ConsensusResult<Vec<Hash>> {
        self.clone_and_spawn_blocking(move |c| c.create_virtual_selected_chain_block_locator(low, high)).await
    }

    pub async fn async_get_pruning_point(&self) -> Hash {
        self.clone_and_spawn_blocking(|c| c.get_pruning_point()).await
    }

    pub async fn async_get_pruning_point_proof(&self) -> Arc<PruningPointProof> {
        self.clone_and_spawn_blocking(|c| c.get_pruning_point_proof()).await
    }

    pub async fn async_get_pruning_point_anticone_and_trusted_data(&self) -> ConsensusResult<Arc<PruningPointTrustedData>> {
        self.clone_and_spawn_blocking(|c| c.get_pruning_point_anticone_and_trusted_data()).await
    }

    pub async fn async_get_pruning_point_utxos(
        &self,
        expected_pruning_point: Hash,
        from_outpoint: Option<TransactionOutpoint>,
        chunk_size: usize,
    ) -> ConsensusResult<Vec<(TransactionOutpoint, UtxoEntry)>> {
        self.clone_and_spawn_blocking(move |c| c.get_pruning_point_utxos(expected_pruning_point, from_outpoint, chunk_size)).await
    }

    pub async fn async_validate_pruning_proof(&self, proof: Arc<PruningPointProof>) -> PruningImportResult<()> {
        self.clone_and_spawn_blocking(move |c| c.validate_pruning_proof(&proof)).await
    }

    pub async fn async_apply_pruning_proof(
        &self,
        proof: PruningPointProof,
        trusted_data: Arc<PruningPointTrustedData>,
    ) -> PruningImportResult<()> {
        self.clone_and_spawn_blocking(move |c| c.apply_pruning_proof(proof, &trusted_data)).await
    }

    pub async fn async_start_pruning_point_utxo_set_import(&self) -> PruningImportResult<()> {
        self.clone_and_spawn_blocking(|c| c.start_pruning_point_utxo_set_import()).await
    }

    pub async fn async_append_imported_pruning_point_utxos(
        &self,
        utxos: Vec<(TransactionOutpoint, UtxoEntry)>,
    ) -> PruningImportResult<()> {
        self.clone_and_spawn_blocking(move |c| c.append_imported_pruning_point_utxos(&utxos)).await
    }

    pub async fn async_finish_pruning_point_utxo_set_import(&self, new_pruning_point: Hash) -> PruningImportResult<()> {
        self.clone_and_spawn_blocking(move |c| c.finish_pruning_point_utxo_set_import(new_pruning_point)).await
    }
}

impl Deref for ConsensusProxy {
    type Target = dyn ConsensusApi;

    fn deref(&self) -> &Self::Target {
        self.consensus.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::test_consensus::TestConsensus;
    use kestrel_consensus_core::config::{ConfigBuilder, params::SIMNET_PARAMS};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_calls_match_sync_calls() {
        let config = ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().build();
        let consensus = TestConsensus::new(&config);
        let genesis = config.genesis_hash();
        let block = consensus.build_block_with_parents(1.into(), vec![genesis]);

        let proxy = ConsensusProxy::new(consensus.consensus_clone());
        let status = proxy.async_validate_and_insert_block(block.to_immutable()).await.unwrap();
        assert!(status.is_utxo_valid_or_pending());
        assert_eq!(proxy.async_get_sink().await, 1.into());
        assert_eq!(proxy.async_get_sink().await, proxy.get_sink());
        assert_eq!(proxy.async_get_tips().await, vec![Hash::from(1u64)]);
    }
}
