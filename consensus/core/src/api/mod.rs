use std::sync::Arc;

use crate::{
    BlockHashSet, BlueWorkType, ChainPath,
    acceptance_data::AcceptanceData,
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

pub mod stats;

pub use stats::{BlockCount, ConsensusStats, VirtualStateStats};

/// Abstracts the consensus external API. All calls are synchronous; async callers go through
/// a proxy which moves them to a blocking thread
pub trait ConsensusApi: Send + Sync {
    //
    // Mining and mempool
    //

    fn build_block_template(&self, miner_data: MinerData, txs: Vec<Transaction>) -> Result<BlockTemplate, RuleError>;

    /// Populates the transaction UTXO entries from the virtual UTXO set and validates it in the virtual context
    fn validate_mempool_transaction(&self, transaction: &mut MutableTransaction) -> TxResult<()>;

    fn calculate_transaction_mass(&self, transaction: &Transaction) -> u64;

    fn get_virtual_daa_score(&self) -> u64;

    fn get_virtual_past_median_time(&self) -> u64;

    fn get_virtual_parents(&self) -> BlockHashSet;

    fn get_virtual_utxo(&self, outpoint: &TransactionOutpoint) -> Option<UtxoEntry>;

    /// Blue work of the virtual merge depth root. A block with no more blue work than this is not in the
    /// future of the root and can only be merged if kosherized by another block
    fn get_virtual_merge_depth_blue_work_threshold(&self) -> BlueWorkType;

    //
    // Block processing
    //

    fn validate_and_insert_block(&self, block: Block) -> BlockProcessResult<BlockStatus>;

    fn validate_and_insert_trusted_block(&self, trusted_block: TrustedBlock) -> BlockProcessResult<BlockStatus>;

    //
    // Queries
    //

    fn get_sink(&self) -> Hash;

    fn get_sink_timestamp(&self) -> u64;

    /// Returns the highest header known, by blue work. This may be ahead of the sink during IBD
    fn get_headers_selected_tip(&self) -> Hash;

    fn get_tips(&self) -> Vec<Hash>;

    fn get_block_status(&self, hash: Hash) -> Option<BlockStatus>;

    fn get_header(&self, hash: Hash) -> ConsensusResult<Arc<Header>>;

    fn get_block(&self, hash: Hash) -> ConsensusResult<Block>;

    fn get_ghostdag_data(&self, hash: Hash) -> ConsensusResult<ExternalGhostdagData>;

    fn get_block_acceptance_data(&self, hash: Hash) -> ConsensusResult<Arc<AcceptanceData>>;

    fn get_block_children(&self, hash: Hash) -> Option<Vec<Hash>>;

    /// Returns the blocks in the past of `context` (inclusive) which are in the anticone of `block`, in topological order
    fn get_anticone(&self, block: Hash, context: Hash) -> ConsensusResult<Vec<Hash>>;

    /// Returns the selected chain changes leading from `low` to the current sink
    fn get_virtual_chain_from_block(&self, low: Hash) -> ConsensusResult<ChainPath>;

    fn is_chain_ancestor_of(&self, low: Hash, high: Hash) -> ConsensusResult<bool>;

    fn is_chain_block(&self, hash: Hash) -> ConsensusResult<bool>;

    /// Returns up to `max_blocks` hashes in the future of `low` and the past of `high` (inclusive), ordered by
    /// blue work, along with the highest hash reached
    fn get_hashes_between(&self, low: Hash, high: Hash, max_blocks: usize) -> ConsensusResult<(Vec<Hash>, Hash)>;

    /// Returns the blocks in the past of `high` and the future of the pruning point which have a header but
    /// no body, in topological order
    fn get_missing_block_body_hashes(&self, high: Hash) -> ConsensusResult<Vec<Hash>>;

    fn get_block_count(&self) -> BlockCount;

    fn get_stats(&self) -> ConsensusStats;

    fn is_nearly_synced(&self) -> bool;

    //
    // Block locators
    //

    /// Builds an exponentially spaced chain locator from `high` down to the pruning point
    fn create_block_locator_from_pruning_point(&self, high: Hash, limit: usize) -> ConsensusResult<Vec<Hash>>;

    /// Builds an exponentially spaced locator of the virtual selected chain between `high` (default the sink)
    /// and `low` (default the pruning point)
    fn create_virtual_selected_chain_block_locator(&self, low: Option<Hash>, high: Option<Hash>) -> ConsensusResult<Vec<Hash>>;

    //
    // Pruning
    //

    fn get_pruning_point(&self) -> Hash;

    fn get_pruning_point_proof(&self) -> Arc<PruningPointProof>;

    fn get_pruning_point_anticone_and_trusted_data(&self) -> ConsensusResult<Arc<PruningPointTrustedData>>;

    /// Returns a chunk of the pruning point UTXO set starting after `from_outpoint`. Fails if the pruning point
    /// is not `expected_pruning_point`
    fn get_pruning_point_utxos(
        &self,
        expected_pruning_point: Hash,
        from_outpoint: Option<TransactionOutpoint>,
        chunk_size: usize,
    ) -> ConsensusResult<Vec<(TransactionOutpoint, UtxoEntry)>>;

    fn validate_pruning_proof(&self, proof: &PruningPointProof) -> PruningImportResult<()>;

    /// Stores the proof headers and sets the pruning point to the last proof header
    fn apply_pruning_proof(&self, proof: PruningPointProof, trusted_data: &PruningPointTrustedData) -> PruningImportResult<()>;

    fn start_pruning_point_utxo_set_import(&self) -> PruningImportResult<()>;

    fn append_imported_pruning_point_utxos(&self, utxos: &[(TransactionOutpoint, UtxoEntry)]) -> PruningImportResult<()>;

    /// Verifies the imported set against the pruning point UTXO commitment and makes it the virtual UTXO set
    fn finish_pruning_point_utxo_set_import(&self, new_pruning_point: Hash) -> PruningImportResult<()>;
}

pub type DynConsensus = Arc<dyn ConsensusApi>;
