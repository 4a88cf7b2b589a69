use std::fmt::Display;

use crate::{
    BlueWorkType,
    errors::{coinbase::CoinbaseError, tx::TxRuleError},
    tx::{TransactionId, TransactionOutpoint},
};
use itertools::Itertools;
use kestrel_hashes::Hash;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct VecDisplay<T: Display>(pub Vec<T>);
impl<T: Display> Display for VecDisplay<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.iter().map(|item| item.to_string()).join(", "))
    }
}

#[derive(Clone, Debug)]
pub struct TwoDimVecDisplay<T: Display + Clone>(pub Vec<Vec<T>>);
impl<T: Display + Clone> Display for TwoDimVecDisplay<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[\n\t{}\n]", self.0.iter().cloned().map(|item| VecDisplay(item).to_string()).join(", \n\t"))
    }
}

#[derive(Error, Debug, Clone)]
pub enum RuleError {
    #[error("wrong block version: got {0} but expected {1}")]
    WrongBlockVersion(u16, u16),

    #[error("the block timestamp is too far into the future: block timestamp is {0} but maximum timestamp allowed is {1}")]
    TimeTooFarIntoTheFuture(u64, u64),

    #[error("block has no parents")]
    NoParents,

    #[error("block has too many parents: got {0} when the limit is {1}")]
    TooManyParents(usize, usize),

    #[error("block has ORIGIN as one of its parents")]
    OriginParent,

    #[error("parent {0} is an ancestor of parent {1}")]
    InvalidParentsRelation(Hash, Hash),

    #[error("parent {0} is invalid")]
    InvalidParent(Hash),

    #[error("block has missing parents: {0}")]
    MissingParents(VecDisplay<Hash>),

    #[error("block is known to be invalid")]
    KnownInvalid,

    #[error("block {0} already exists with a body")]
    DuplicateBlock(Hash),

    #[error("block {0} is in the past of the pruning point")]
    PrunedBlock(Hash),

    #[error("block is missing its proof of work hash")]
    MissingPowHash,

    #[error("block has invalid proof-of-work")]
    InvalidPoW,

    #[error("difficulty bits {0:#010x} do not decode to a valid target below the network maximum")]
    InvalidDifficultyBits(u32),

    #[error("expected header daa score {1} but got {0}")]
    UnexpectedDAAScore(u64, u64),

    #[error("expected header blue score {1} but got {0}")]
    UnexpectedBlueScore(u64, u64),

    #[error("expected header blue work {1} but got {0}")]
    UnexpectedBlueWork(BlueWorkType, BlueWorkType),

    #[error("block difficulty of {0} is not the expected value of {1}")]
    UnexpectedDifficulty(u32, u32),

    #[error("block timestamp of {0} is not after expected {1}")]
    TimeTooOld(u64, u64),

    #[error("block mergeset size of {0} is above the limit of {1}")]
    ViolatingMergeLimit(usize, u64),

    #[error("expected header pruning point is {0} but got {1}")]
    UnexpectedPruningPoint(Hash, Hash),

    #[error("expected indirect parents {0} but got {1}")]
    UnexpectedParents(TwoDimVecDisplay<Hash>, TwoDimVecDisplay<Hash>),

    #[error("block has no transactions")]
    NoTransactions,

    #[error("block first transaction is not coinbase")]
    FirstTxNotCoinbase,

    #[error("block has second coinbase transaction at index {0}")]
    MultipleCoinbases(usize),

    #[error("bad coinbase payload: {0}")]
    BadCoinbasePayload(CoinbaseError),

    #[error("coinbase blue score of {0} is not the expected value of {1}")]
    BadCoinbasePayloadBlueScore(u64, u64),

    #[error("transaction in isolation validation failed for tx {0}: {1}")]
    TxInIsolationValidationFailed(TransactionId, TxRuleError),

    #[error("block exceeded mass limit of {0}")]
    ExceedsMassLimit(u64),

    #[error("outpoint {0} is spent more than once on the same block")]
    DoubleSpendInSameBlock(TransactionOutpoint),

    #[error("outpoint {0} is created and spent on the same block")]
    ChainedTransaction(TransactionOutpoint),

    #[error("transaction {0} is found more than once in the block")]
    DuplicateTransactions(TransactionId),

    #[error("block has invalid merkle root: got {1} but expected {0}")]
    BadMerkleRoot(Hash, Hash),

    #[error("block {0} violates the merge depth bound by merging {1} which is not in the past of any kosherizing block")]
    ViolatingBoundedMergeDepth(Hash, Hash),

    #[error("invalid transactions in block: {}", .0.iter().map(|(id, err)| format!("{id}: {err}")).join(", "))]
    InvalidTransactions(Vec<(TransactionId, TxRuleError)>),

    #[error("selected parent {0} is not on a UTXO valid chain")]
    SelectedParentNotUtxoValid(Hash),

    #[error("bad coinbase transaction: {0}")]
    BadCoinbaseTransaction(CoinbaseError),

    #[error("expected accepted id merkle root {1} but got {0}")]
    BadAcceptedIDMerkleRoot(Hash, Hash),

    #[error("expected UTXO commitment {1} but got {0}")]
    BadUTXOCommitment(Hash, Hash),

    #[error("trusted block {0} was not expected during this sync")]
    UnrequestedTrustedBlock(Hash),

    #[error("the selected parent {0} of a block with a body is missing its own body")]
    MissingSelectedParentBody(Hash),
}

pub type BlockProcessResult<T> = std::result::Result<T, RuleError>;
