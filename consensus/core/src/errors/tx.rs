use crate::{constants::MAX_SOMPI, subnets::SubnetworkId, tx::TransactionOutpoint};
use kestrel_txscript_errors::TxScriptError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxRuleError {
    #[error("transaction has no inputs")]
    NoTxInputs,

    #[error("transaction has duplicate inputs")]
    DuplicateTxInputs,

    #[error("transaction has too many inputs: {0} while the limit is {1}")]
    TooManyInputs(usize, usize),

    #[error("transaction has too many outputs: {0} while the limit is {1}")]
    TooManyOutputs(usize, usize),

    #[error("transaction input #{0} signature script is above {1} bytes")]
    TooBigSignatureScript(usize, usize),

    #[error("transaction output #{0} script public key is above {1} bytes")]
    TooBigScriptPublicKey(usize, usize),

    #[error("transaction input #{0} is not finalized")]
    NotFinalized(usize),

    #[error("coinbase transaction has {0} inputs while none are expected")]
    CoinbaseWithInputs(usize),

    #[error("coinbase transaction has {0} outputs while at most {1} are allowed")]
    CoinbaseTooManyOutputs(usize, u64),

    #[error("coinbase transaction output #{0} script public key length is {1} while the maximum allowed is {2}")]
    CoinbaseTooLongScriptPublicKey(usize, usize, usize),

    #[error("coinbase payload length is {0} while the maximum allowed length is {1}")]
    BadCoinbasePayloadLen(usize, usize),

    #[error("transaction output #{0} has zero value")]
    TxOutValueZero(usize),

    #[error("transaction output #{0} has value {1} which is higher than the max allowed value of {MAX_SOMPI}")]
    BadTxOutValue(usize, u64),

    #[error("transaction total output value is higher than the max allowed value of {MAX_SOMPI}")]
    OutputsValueOverflow,

    #[error("transaction total input value is higher than the max allowed value of {MAX_SOMPI}")]
    InputAmountOverflow,

    #[error("transaction version {0} is unknown")]
    TransactionVersionIsUnknown(u16),

    #[error("transaction has a non native subnetwork {0} while non native subnetworks are disabled")]
    SubnetworksDisabled(SubnetworkId),

    #[error("registry transaction payload length is {0} while exactly {1} bytes are expected")]
    SubnetworkRegistry(usize, usize),

    #[error("transaction gas {1} is not allowed in subnetwork {0}")]
    InvalidGas(SubnetworkId, u64),

    #[error("transaction fee {0} is lower than its gas {1}")]
    InsufficientGasFee(u64, u64),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("one of the transaction sequence locks conditions was not met")]
    SequenceLockConditionsAreNotMet,

    #[error("transaction input #{0} tried to spend coinbase outpoint {1} with daa score of {2} while the merging block daa score is {3} and the coinbase maturity period of {4} hasn't passed yet")]
    ImmatureCoinbaseSpend(usize, TransactionOutpoint, u64, u64, u64),

    #[error("transaction output value {1} is higher than its total input value {0}")]
    SpendTooHigh(u64, u64),

    #[error("transaction is missing outpoints {0:?}")]
    MissingTxOutpoints(Vec<TransactionOutpoint>),

    #[error("transaction mass {0} is larger than the max allowed of {1}")]
    MassTooHigh(u64, u64),

    #[error("failed to verify the signature script: {0}")]
    SignatureInvalid(TxScriptError),

    #[error("transaction template hash does not match the committed one")]
    CheckTemplateVerify,

    #[error("outpoint {0} is spent more than once")]
    DoubleSpend(TransactionOutpoint),
}

impl From<TxScriptError> for TxRuleError {
    fn from(err: TxScriptError) -> Self {
        match err {
            TxScriptError::CheckTemplateVerify | TxScriptError::TemplateHashLength(_) => TxRuleError::CheckTemplateVerify,
            err => TxRuleError::SignatureInvalid(err),
        }
    }
}

pub type TxResult<T> = std::result::Result<T, TxRuleError>;
