use kestrel_consensus_core::errors::block::RuleError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum BuilderError {
    /// A consensus rule error
    #[error(transparent)]
    ConsensusError(#[from] RuleError),

    /// The virtual kept rejecting mempool transactions after repeated cleanups
    #[error("failed building a block template after {0} attempts")]
    TooManyAttempts(u64),
}

pub type BuilderResult<T> = std::result::Result<T, BuilderError>;
