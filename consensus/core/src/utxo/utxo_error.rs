use thiserror::Error;

use crate::tx::TransactionOutpoint;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UtxoAlgebraError {
    #[error("outpoint {0} both in self.remove and in other.remove")]
    DuplicateRemovePoint(TransactionOutpoint),

    #[error("outpoint {0} both in self.add and in other.add")]
    DuplicateAddPoint(TransactionOutpoint),

    #[error("outpoint {0} is removed with an entry which differs from the one previously added")]
    MismatchingRemovePoint(TransactionOutpoint),

    #[error("cannot remove outpoint {0} twice")]
    DoubleRemoveCall(TransactionOutpoint),

    #[error("cannot add outpoint {0} twice")]
    DoubleAddCall(TransactionOutpoint),

    #[error("cannot remove missing outpoint {0} from a UTXO set")]
    MissingOutpoint(TransactionOutpoint),
}

pub type UtxoResult<T> = std::result::Result<T, UtxoAlgebraError>;
