use crate::{BlockHashMap, BlueWorkType, KType, block::Block, header::Header};
use kestrel_hashes::Hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Represents semi-trusted externally provided Ghostdag data (by a network peer)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalGhostdagData {
    pub blue_score: u64,
    pub blue_work: BlueWorkType,
    pub selected_parent: Hash,
    pub mergeset_blues: Vec<Hash>,
    pub mergeset_reds: Vec<Hash>,
    pub blues_anticone_sizes: BlockHashMap<KType>,
}

/// Represents an externally provided block with associated Ghostdag data which
/// is only partially validated by the consensus layer. Note there is no actual trust
/// but rather these blocks are indirectly validated through the PoW mined over them
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustedBlock {
    pub block: Block,
    pub ghostdag: ExternalGhostdagData,
}

impl TrustedBlock {
    pub fn new(block: Block, ghostdag: ExternalGhostdagData) -> Self {
        Self { block, ghostdag }
    }
}

/// Represents an externally provided header with associated Ghostdag data which
/// is only partially validated by the consensus layer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustedHeader {
    pub header: Arc<Header>,
    pub ghostdag: ExternalGhostdagData,
}

impl TrustedHeader {
    pub fn new(header: Arc<Header>, ghostdag: ExternalGhostdagData) -> Self {
        Self { header, ghostdag }
    }
}

/// The data a node synced from a pruning point needs in order to validate blocks in the future of that pruning point
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PruningPointTrustedData {
    /// The pruning point followed by its anticone from the virtual point of view, in topological order
    pub anticone: Vec<Hash>,

    /// Headers of the difficulty and median time windows of the anticone blocks, and of the selected chain
    /// below the pruning point down to GHOSTDAG K depth, together with their GHOSTDAG data
    pub window_and_chain_headers: Vec<TrustedHeader>,
}
