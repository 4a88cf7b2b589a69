use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TraversalError {
    #[error("passed max allowed traversal ({0} > {1})")]
    ReachedMaxTraversalAllowed(u64, u64),

    #[error("block {0} is not in the selected chain of {1}")]
    NotInSelectedChain(kestrel_hashes::Hash, kestrel_hashes::Hash),
}

pub type TraversalResult<T> = std::result::Result<T, TraversalError>;
