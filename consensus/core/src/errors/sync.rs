use kestrel_hashes::Hash;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SyncManagerError {
    #[error("block {0} is unknown")]
    BlockNotFound(Hash),

    #[error("block {0} is not in the selected parent chain")]
    BlockNotInSelectedParentChain(Hash),

    #[error("low hash {0} is higher than high hash {1}")]
    LowHashHigherThanHighHash(Hash, Hash),

    #[error("pruning point {0} is not in the selected chain of {1}")]
    PruningPointNotInChain(Hash, Hash),
}

pub type SyncManagerResult<T> = std::result::Result<T, SyncManagerError>;
