use kestrel_hashes::Hash;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PruningImportError {
    #[error("pruning proof is empty")]
    ProofEmpty,

    #[error("pruning proof starts at {0} while the local genesis is {1}")]
    ProofGenesisMismatch(Hash, Hash),

    #[error("pruning proof header {0} points at pruning point {1} instead of the previous proof header {2}")]
    ProofChainBroken(Hash, Hash, Hash),

    #[error("pruning proof header {0} has invalid proof of work")]
    ProofInvalidPow(Hash),

    #[error("pruning proof ends at {0} while the announced pruning point is {1}")]
    ProofPruningPointMismatch(Hash, Hash),

    #[error("trusted data is missing block {0}")]
    TrustedDataMissingBlock(Hash),

    #[error("imported pruning point UTXO set multiset hash {0} does not match the header commitment {1}")]
    ImportedMultisetHashMismatch(Hash, Hash),

    #[error("an attempt to import the pruning point UTXO set before import was started")]
    ImportNotStarted,

    #[error("the pruning point UTXO set chunk contains the outpoint {0} more than once")]
    DuplicateImportedOutpoint(String),

    #[error("new pruning point {0} has no known header")]
    MissingPruningPointHeader(Hash),
}

pub type PruningImportResult<T> = std::result::Result<T, PruningImportError>;
