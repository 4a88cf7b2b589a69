use kestrel_consensus_core::{
    errors::tx::TxRuleError,
    tx::{TransactionId, TransactionOutpoint},
};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Coarse rejection classes reported back to the submitter of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectCode {
    Invalid = 0x10,
    Duplicate = 0x12,
    NonStandard = 0x40,
    InsufficientFee = 0x42,
    RateLimited = 0x43,
    Frozen = 0x44,
    MempoolFull = 0x45,
}

impl Display for RejectCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectCode::Invalid => "invalid",
            RejectCode::Duplicate => "duplicate",
            RejectCode::NonStandard => "non-standard",
            RejectCode::InsufficientFee => "insufficient fee",
            RejectCode::RateLimited => "rate limited",
            RejectCode::Frozen => "frozen",
            RejectCode::MempoolFull => "mempool full",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// A consensus transaction rule error
    ///
    /// Note that following variants are converted:
    ///
    /// - TxRuleError::ImmatureCoinbaseSpend => RuleError::RejectImmatureSpend
    /// - TxRuleError::MissingTxOutpoints => RuleError::RejectMissingOutpoint
    #[error(transparent)]
    RejectTxRule(TxRuleError),

    #[error("at least one outpoint of transaction is lacking a matching UTXO entry")]
    RejectMissingOutpoint,

    #[error("transaction {0} is already in the mempool")]
    RejectDuplicate(TransactionId),

    #[error("output {0} already spent by transaction {1} in the memory pool")]
    RejectDoubleSpendInMempool(TransactionOutpoint, TransactionId),

    #[error("number of transactions in mempool ({0}) has reached the maximum allowed ({1})")]
    RejectMempoolIsFull(usize, usize),

    #[error("transaction {0} is not standard: {1}")]
    RejectNonStandard(TransactionId, String),

    #[error("transaction {0} has {1} fees which is under the required amount of {2}")]
    RejectInsufficientFee(TransactionId, u64, u64),

    #[error("one of the transaction inputs spends an immature UTXO: {0}")]
    RejectImmatureSpend(TxRuleError),

    #[error("transaction {0} doesn't exist in transaction pool")]
    RejectMissingTransaction(TransactionId),

    #[error("orphan transaction mass of {0} is larger than max allowed mass of {1}")]
    RejectBadOrphanMass(u64, u64),

    #[error("orphan transaction {0} is already in the orphan pool")]
    RejectDuplicateOrphan(TransactionId),

    #[error("orphan transaction {0} is double spending an input from already existing orphan {1}")]
    RejectDoubleSpendOrphan(TransactionId, TransactionId),

    #[error("transaction {0} is an orphan where orphan is disallowed")]
    RejectDisallowedOrphan(TransactionId),

    #[error("transaction {0} doesn't exist in orphan pool")]
    RejectMissingOrphanTransaction(TransactionId),

    #[error("transaction {0} creates {1} more outputs than it spends inputs and pays {2} fees while {3} are required")]
    RejectSpamTransaction(TransactionId, usize, u64, u64),

    #[error("transaction {0} is a compound transaction and its sender already submitted {1} within the last {2} ms")]
    RejectCompoundRateLimit(TransactionId, usize, u64),

    #[error("transaction {0} spends from or pays to frozen script {1}")]
    RejectFrozenAddress(TransactionId, String),
}

impl RuleError {
    pub fn reject_code(&self) -> RejectCode {
        match self {
            RuleError::RejectDuplicate(_) | RuleError::RejectDuplicateOrphan(_) => RejectCode::Duplicate,
            RuleError::RejectNonStandard(..) | RuleError::RejectBadOrphanMass(..) => RejectCode::NonStandard,
            RuleError::RejectInsufficientFee(..) | RuleError::RejectSpamTransaction(..) => RejectCode::InsufficientFee,
            RuleError::RejectCompoundRateLimit(..) => RejectCode::RateLimited,
            RuleError::RejectFrozenAddress(..) => RejectCode::Frozen,
            RuleError::RejectMempoolIsFull(..) => RejectCode::MempoolFull,
            _ => RejectCode::Invalid,
        }
    }

    /// Whether the peer relaying the transaction proves to be misbehaving. Policy rejections
    /// and races with the local virtual are not a peer fault
    pub fn is_invalid_by_consensus(&self) -> bool {
        matches!(self, RuleError::RejectTxRule(_))
    }
}

impl From<NonStandardError> for RuleError {
    fn from(item: NonStandardError) -> Self {
        match item {
            NonStandardError::RejectInsufficientFee(id, fee, minimum) => RuleError::RejectInsufficientFee(id, fee, minimum),
            item => RuleError::RejectNonStandard(*item.transaction_id(), item.to_string()),
        }
    }
}

impl From<TxRuleError> for RuleError {
    fn from(item: TxRuleError) -> Self {
        match item {
            TxRuleError::ImmatureCoinbaseSpend(..) => RuleError::RejectImmatureSpend(item),
            TxRuleError::MissingTxOutpoints(_) => RuleError::RejectMissingOutpoint,
            _ => RuleError::RejectTxRule(item),
        }
    }
}

pub type RuleResult<T> = std::result::Result<T, RuleError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NonStandardError {
    #[error("transaction version {1} is not in the valid range of {2}-{3}")]
    RejectVersion(TransactionId, u16, u16, u16),

    #[error("transaction mass of {1} is larger than max allowed size of {2}")]
    RejectMass(TransactionId, u64, u64),

    #[error("transaction input #{1}: signature script size of {2} bytes is larger than the maximum allowed size of {3} bytes")]
    RejectSignatureScriptSize(TransactionId, usize, u64, u64),

    #[error("transaction output #{1}: the version of the scriptPublicKey is higher than the known version")]
    RejectScriptPublicKeyVersion(TransactionId, usize),

    #[error("transaction output #{1}: non-standard script form")]
    RejectOutputScriptClass(TransactionId, usize),

    #[error("transaction output #{1}: payment of {2} is dust")]
    RejectDust(TransactionId, usize, u64),

    #[error("transaction input #{1}: non-standard script form")]
    RejectInputScriptClass(TransactionId, usize),

    #[error("transaction has {1} fees which is under the required amount of {2}")]
    RejectInsufficientFee(TransactionId, u64, u64),

    #[error("transaction input #{1} has {2} signature operations which is more than the allowed max amount of {3}")]
    RejectSignatureCount(TransactionId, usize, u64, u64),
}

impl NonStandardError {
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            NonStandardError::RejectVersion(id, _, _, _) => id,
            NonStandardError::RejectMass(id, _, _) => id,
            NonStandardError::RejectSignatureScriptSize(id, _, _, _) => id,
            NonStandardError::RejectScriptPublicKeyVersion(id, _) => id,
            NonStandardError::RejectOutputScriptClass(id, _) => id,
            NonStandardError::RejectDust(id, _, _) => id,
            NonStandardError::RejectInputScriptClass(id, _) => id,
            NonStandardError::RejectInsufficientFee(id, _, _) => id,
            NonStandardError::RejectSignatureCount(id, _, _, _) => id,
        }
    }
}

pub type NonStandardResult<T> = std::result::Result<T, NonStandardError>;
