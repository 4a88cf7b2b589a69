use kestrel_hashes::Hash;
use thiserror::Error;

use super::{
    block::RuleError, difficulty::DifficultyError, pruning::PruningImportError, sync::SyncManagerError, traversal::TraversalError,
};

#[derive(Error, Debug, Clone)]
pub enum ConsensusError {
    #[error("cannot find full block {0}")]
    BlockNotFound(Hash),

    #[error("cannot find header {0}")]
    HeaderNotFound(Hash),

    #[error("trying to query {0} which is in the past of the pruning point")]
    BlockPruned(Hash),

    #[error("some data is missing for block {0}")]
    MissingData(Hash),

    #[error("the database was created with schema version {0} for network {1} which is incompatible with schema version {2} for network {3}")]
    IncompatibleDatabase(u32, String, u32, String),

    #[error("got unexpected pruning point")]
    UnexpectedPruningPoint,

    #[error("pruning point UTXO set chunk index {0} is out of range")]
    PruningPointUtxoChunkOutOfRange(usize),

    #[error("{0}")]
    Rule(#[from] RuleError),

    #[error("{0}")]
    PruningImport(#[from] PruningImportError),

    #[error("{0}")]
    Difficulty(#[from] DifficultyError),

    #[error("{0}")]
    Traversal(#[from] TraversalError),

    #[error("{0}")]
    Sync(#[from] SyncManagerError),

    #[error("{0}")]
    General(&'static str),

    #[error("{0}")]
    GeneralOwned(String),
}

pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;
