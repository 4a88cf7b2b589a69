//! Transaction validations which depend on the containing header (its DAA score and past median
//! time) but not on UTXO state or other transactions in the block

use kestrel_consensus_core::{
    constants::{LOCK_TIME_THRESHOLD, MAX_TX_IN_SEQUENCE_NUM},
    errors::tx::{TxResult, TxRuleError},
    tx::Transaction,
};

use super::TransactionValidator;

pub enum LockTimeType {
    Finalized,
    DaaScore,
    Time,
}

pub enum LockTimeArg {
    Finalized,
    DaaScore(u64),
    MedianTime(u64),
}

impl TransactionValidator {
    pub fn validate_tx_in_header_context(&self, tx: &Transaction, ctx_daa_score: u64, ctx_past_median_time: u64) -> TxResult<()> {
        let arg = match Self::get_lock_time_type(tx) {
            LockTimeType::Finalized => LockTimeArg::Finalized,
            LockTimeType::DaaScore => LockTimeArg::DaaScore(ctx_daa_score),
            LockTimeType::Time => LockTimeArg::MedianTime(ctx_past_median_time),
        };
        check_tx_is_finalized(tx, arg)
    }

    pub fn get_lock_time_type(tx: &Transaction) -> LockTimeType {
        match tx.lock_time {
            0 => LockTimeType::Finalized,
            // Below the threshold the lock time is a DAA score, otherwise a timestamp
            t if t < LOCK_TIME_THRESHOLD => LockTimeType::DaaScore,
            _ => LockTimeType::Time,
        }
    }
}

fn check_tx_is_finalized(tx: &Transaction, lock_time_arg: LockTimeArg) -> TxResult<()> {
    let block_time_or_daa_score = match lock_time_arg {
        LockTimeArg::Finalized => return Ok(()),
        LockTimeArg::DaaScore(daa_score) => daa_score,
        LockTimeArg::MedianTime(time) => time,
    };

    if tx.lock_time < block_time_or_daa_score {
        return Ok(());
    }

    // An unreached lock time is still final if all input sequences are maxed out
    if let Some(i) = tx.inputs.iter().position(|input| input.sequence != MAX_TX_IN_SEQUENCE_NUM) {
        return Err(TxRuleError::NotFinalized(i));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus_core::{
        config::params::SIMNET_PARAMS,
        subnets::SUBNETWORK_ID_NATIVE,
        tx::{TransactionInput, TransactionOutpoint},
    };
    use kestrel_hashes::Hash;
    use kestrel_txscript::SigCache;

    fn tx(lock_time: u64, sequence: u64) -> Transaction {
        let input = TransactionInput::new(TransactionOutpoint::new(Hash::from_u64_word(3), 0), vec![], sequence, 0);
        Transaction::new(0, vec![input], vec![], lock_time, SUBNETWORK_ID_NATIVE, 0, vec![])
    }

    #[test]
    fn test_lock_time() {
        let tv = TransactionValidator::new(&SIMNET_PARAMS, SigCache::new(10));
        assert_eq!(tv.validate_tx_in_header_context(&tx(0, 0), 0, 0), Ok(()));

        // DAA score lock
        assert_eq!(tv.validate_tx_in_header_context(&tx(100, 0), 101, 0), Ok(()));
        assert_eq!(tv.validate_tx_in_header_context(&tx(100, 0), 100, 0), Err(TxRuleError::NotFinalized(0)));
        assert_eq!(tv.validate_tx_in_header_context(&tx(100, MAX_TX_IN_SEQUENCE_NUM), 100, 0), Ok(()));

        // Time lock is compared against the past median time
        let t = LOCK_TIME_THRESHOLD + 1000;
        assert_eq!(tv.validate_tx_in_header_context(&tx(t, 0), u64::MAX, t + 1), Ok(()));
        assert_eq!(tv.validate_tx_in_header_context(&tx(t, 0), u64::MAX, t), Err(TxRuleError::NotFinalized(0)));
    }
}
