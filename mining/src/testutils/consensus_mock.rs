use kestrel_consensus_core::{
    BlockHashSet, BlueWorkType, ChainPath,
    acceptance_data::AcceptanceData,
    api::{BlockCount, ConsensusApi, ConsensusStats},
    block::{Block, BlockTemplate, MutableBlock},
    blockstatus::BlockStatus,
    coinbase::MinerData,
    constants::{BLOCK_VERSION, TX_VERSION},
    errors::{
        block::{BlockProcessResult, RuleError},
        consensus::ConsensusResult,
        pruning::PruningImportResult,
        tx::{TxResult, TxRuleError},
    },
    header::Header,
    mass::transaction_estimated_serialized_size,
    merkle::calc_hash_merkle_root,
    pruning::PruningPointProof,
    subnets::SUBNETWORK_ID_COINBASE,
    trusted::{ExternalGhostdagData, PruningPointTrustedData, TrustedBlock},
    tx::{MutableTransaction, Transaction, TransactionId, TransactionOutpoint, TransactionOutput, UtxoEntry},
    utxo::utxo_collection::UtxoCollection,
};
use kestrel_core::time::unix_now;
use kestrel_hashes::{Hash, ZERO_HASH};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

const BLOCK_SUBSIDY: u64 = 50_000_000_000;

/// Consensus stand-in holding a flat UTXO set. Statuses registered per transaction id simulate
/// validation failures, both for the mempool and for block templates.
pub(crate) struct ConsensusMock {
    transactions: RwLock<HashMap<TransactionId, Arc<Transaction>>>,
    statuses: RwLock<HashMap<TransactionId, TxResult<()>>>,
    utxos: RwLock<UtxoCollection>,
    virtual_daa_score: AtomicU64,
}

impl ConsensusMock {
    pub(crate) fn new() -> Self {
        Self {
            transactions: RwLock::new(HashMap::default()),
            statuses: RwLock::new(HashMap::default()),
            utxos: RwLock::new(HashMap::default()),
            virtual_daa_score: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_status(&self, transaction_id: TransactionId, status: TxResult<()>) {
        self.statuses.write().insert(transaction_id, status);
    }

    pub(crate) fn set_virtual_daa_score(&self, daa_score: u64) {
        self.virtual_daa_score.store(daa_score, Ordering::SeqCst);
    }

    /// Applies `transaction` to the UTXO set as if a block accepted it at `block_daa_score`
    pub(crate) fn add_transaction(&self, transaction: Transaction, block_daa_score: u64) {
        let transaction_id = transaction.id();
        let mut utxos = self.utxos.write();
        for input in transaction.inputs.iter() {
            utxos.remove(&input.previous_outpoint);
        }
        for (i, output) in transaction.outputs.iter().enumerate() {
            utxos.insert(
                TransactionOutpoint::new(transaction_id, i as u32),
                UtxoEntry::new(output.value, output.script_public_key.clone(), block_daa_score, transaction.is_coinbase()),
            );
        }
        self.transactions.write().insert(transaction_id, Arc::new(transaction));
    }

    pub(crate) fn add_utxo(&self, outpoint: TransactionOutpoint, entry: UtxoEntry) {
        self.utxos.write().insert(outpoint, entry);
    }

    fn coinbase_transaction(&self, miner_data: &MinerData, fees: u64) -> Transaction {
        let output = TransactionOutput::new(BLOCK_SUBSIDY + fees, miner_data.script_public_key.clone());
        Transaction::new(TX_VERSION, vec![], vec![output], 0, SUBNETWORK_ID_COINBASE, 0, miner_data.extra_data.clone())
    }
}

impl ConsensusApi for ConsensusMock {
    fn build_block_template(&self, miner_data: MinerData, txs: Vec<Transaction>) -> Result<BlockTemplate, RuleError> {
        let invalid_transactions = {
            let statuses = self.statuses.read();
            txs.iter()
                .filter_map(|tx| match statuses.get(&tx.id()) {
                    Some(Err(err)) => Some((tx.id(), err.clone())),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        if !invalid_transactions.is_empty() {
            return Err(RuleError::InvalidTransactions(invalid_transactions));
        }

        let mut calculated_fees = Vec::with_capacity(txs.len());
        for tx in txs.iter() {
            let mut mtx = MutableTransaction::new(Arc::new(tx.clone()));
            self.validate_mempool_transaction(&mut mtx).map_err(|err| RuleError::InvalidTransactions(vec![(tx.id(), err)]))?;
            calculated_fees.push(mtx.calculated_fee.unwrap_or_default());
        }

        let mut block_txs = Vec::with_capacity(txs.len() + 1);
        block_txs.push(self.coinbase_transaction(&miner_data, calculated_fees.iter().sum()));
        block_txs.extend(txs);
        let now = unix_now();
        let hash_merkle_root = calc_hash_merkle_root(block_txs.iter());
        let daa_score = self.get_virtual_daa_score();
        let header = Header::new_finalized(
            BLOCK_VERSION,
            vec![],
            hash_merkle_root,
            ZERO_HASH,
            ZERO_HASH,
            now,
            123456789u32,
            0,
            daa_score,
            0u64.into(),
            0,
            ZERO_HASH,
        );
        let block = MutableBlock::new(header, block_txs);
        Ok(BlockTemplate::new(block, miner_data, false, now, daa_score, ZERO_HASH, calculated_fees))
    }

    fn validate_mempool_transaction(&self, transaction: &mut MutableTransaction) -> TxResult<()> {
        // A predefined status simulates an error
        if let Some(Err(err)) = self.statuses.read().get(&transaction.id()) {
            return Err(err.clone());
        }
        let utxos = self.utxos.read();
        let mut missing_outpoints = vec![];
        for (input, entry) in transaction.tx.inputs.iter().zip(transaction.entries.iter_mut()) {
            if entry.is_some() {
                continue;
            }
            match utxos.get(&input.previous_outpoint) {
                Some(utxo) => *entry = Some(utxo.clone()),
                None => missing_outpoints.push(input.previous_outpoint),
            }
        }
        if !missing_outpoints.is_empty() {
            return Err(TxRuleError::MissingTxOutpoints(missing_outpoints));
        }

        let total_in: u64 = transaction.entries.iter().flatten().map(|entry| entry.amount).sum();
        let total_out: u64 = transaction.tx.outputs.iter().map(|output| output.value).sum();
        if total_out > total_in {
            return Err(TxRuleError::SpendTooHigh(total_in, total_out));
        }
        transaction.calculated_fee = Some(total_in - total_out);
        if transaction.calculated_mass.is_none() {
            transaction.calculated_mass = Some(self.calculate_transaction_mass(&transaction.tx));
        }
        Ok(())
    }

    fn calculate_transaction_mass(&self, transaction: &Transaction) -> u64 {
        if transaction.is_coinbase() { 0 } else { transaction_estimated_serialized_size(transaction) }
    }

    fn get_virtual_daa_score(&self) -> u64 {
        self.virtual_daa_score.load(Ordering::SeqCst)
    }

    fn get_virtual_past_median_time(&self) -> u64 {
        unix_now()
    }

    fn get_virtual_parents(&self) -> BlockHashSet {
        BlockHashSet::default()
    }

    fn get_virtual_utxo(&self, outpoint: &TransactionOutpoint) -> Option<UtxoEntry> {
        self.utxos.read().get(outpoint).cloned()
    }

    fn get_virtual_merge_depth_blue_work_threshold(&self) -> BlueWorkType {
        BlueWorkType::ZERO
    }

    fn validate_and_insert_block(&self, _block: Block) -> BlockProcessResult<BlockStatus> {
        unimplemented!()
    }

    fn validate_and_insert_trusted_block(&self, _trusted_block: TrustedBlock) -> BlockProcessResult<BlockStatus> {
        unimplemented!()
    }

    fn get_sink(&self) -> Hash {
        ZERO_HASH
    }

    fn get_sink_timestamp(&self) -> u64 {
        unix_now()
    }

    fn get_headers_selected_tip(&self) -> Hash {
        ZERO_HASH
    }

    fn get_tips(&self) -> Vec<Hash> {
        vec![]
    }

    fn get_block_status(&self, _hash: Hash) -> Option<BlockStatus> {
        None
    }

    fn get_header(&self, _hash: Hash) -> ConsensusResult<Arc<Header>> {
        unimplemented!()
    }

    fn get_block(&self, _hash: Hash) -> ConsensusResult<Block> {
        unimplemented!()
    }

    fn get_ghostdag_data(&self, _hash: Hash) -> ConsensusResult<ExternalGhostdagData> {
        unimplemented!()
    }

    fn get_block_acceptance_data(&self, _hash: Hash) -> ConsensusResult<Arc<AcceptanceData>> {
        unimplemented!()
    }

    fn get_block_children(&self, _hash: Hash) -> Option<Vec<Hash>> {
        None
    }

    fn get_anticone(&self, _block: Hash, _context: Hash) -> ConsensusResult<Vec<Hash>> {
        unimplemented!()
    }

    fn get_virtual_chain_from_block(&self, _low: Hash) -> ConsensusResult<ChainPath> {
        unimplemented!()
    }

    fn is_chain_ancestor_of(&self, _low: Hash, _high: Hash) -> ConsensusResult<bool> {
        unimplemented!()
    }

    fn is_chain_block(&self, _hash: Hash) -> ConsensusResult<bool> {
        unimplemented!()
    }

    fn get_hashes_between(&self, _low: Hash, _high: Hash, _max_blocks: usize) -> ConsensusResult<(Vec<Hash>, Hash)> {
        unimplemented!()
    }

    fn get_missing_block_body_hashes(&self, _high: Hash) -> ConsensusResult<Vec<Hash>> {
        unimplemented!()
    }

    fn get_block_count(&self) -> BlockCount {
        BlockCount::default()
    }

    fn get_stats(&self) -> ConsensusStats {
        unimplemented!()
    }

    fn is_nearly_synced(&self) -> bool {
        true
    }

    fn create_block_locator_from_pruning_point(&self, _high: Hash, _limit: usize) -> ConsensusResult<Vec<Hash>> {
        unimplemented!()
    }

    fn create_virtual_selected_chain_block_locator(&self, _low: Option<Hash>, _high: Option<Hash>) -> ConsensusResult<Vec<Hash>> {
        unimplemented!()
    }

    fn get_pruning_point(&self) -> Hash {
        ZERO_HASH
    }

    fn get_pruning_point_proof(&self) -> Arc<PruningPointProof> {
        unimplemented!()
    }

    fn get_pruning_point_anticone_and_trusted_data(&self) -> ConsensusResult<Arc<PruningPointTrustedData>> {
        unimplemented!()
    }

    fn get_pruning_point_utxos(
        &self,
        _expected_pruning_point: Hash,
        _from_outpoint: Option<TransactionOutpoint>,
        _chunk_size: usize,
    ) -> ConsensusResult<Vec<(TransactionOutpoint, UtxoEntry)>> {
        unimplemented!()
    }

    fn validate_pruning_proof(&self, _proof: &PruningPointProof) -> PruningImportResult<()> {
        unimplemented!()
    }

    fn apply_pruning_proof(&self, _proof: PruningPointProof, _trusted_data: &PruningPointTrustedData) -> PruningImportResult<()> {
        unimplemented!()
    }

    fn start_pruning_point_utxo_set_import(&self) -> PruningImportResult<()> {
        unimplemented!()
    }

    fn append_imported_pruning_point_utxos(&self, _utxos: &[(TransactionOutpoint, UtxoEntry)]) -> PruningImportResult<()> {
        unimplemented!()
    }

    fn finish_pruning_point_utxo_set_import(&self, _new_pruning_point: Hash) -> PruningImportResult<()> {
        unimplemented!()
    }
}
