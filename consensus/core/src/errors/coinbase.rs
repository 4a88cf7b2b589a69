use kestrel_hashes::Hash;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoinbaseError {
    #[error("coinbase payload length is {0} while the minimum allowed length is {1}")]
    PayloadLenBelowMin(usize, usize),

    #[error("coinbase payload length is {0} while the maximum allowed length is {1}")]
    PayloadLenAboveMax(usize, usize),

    #[error("coinbase payload script public key length is {0} while the maximum allowed length is {1}")]
    PayloadScriptPublicKeyLenAboveMax(usize, u8),

    #[error(
        "coinbase payload length is {0} bytes but it needs to be at least {1} bytes long in order to accommodate the script public key"
    )]
    PayloadCantContainScriptPublicKey(usize, usize),

    #[error("missing reward data for block {0}")]
    MissingRewardData(Hash),

    #[error("coinbase outputs do not match the expected reward outputs")]
    UnexpectedOutputs,
}

pub type CoinbaseResult<T> = std::result::Result<T, CoinbaseError>;
