use super::{
    Mempool,
    errors::{NonStandardError, NonStandardResult, RuleError, RuleResult},
};
use kestrel_consensus_core::{
    constants::{MAX_SCRIPT_PUBLIC_KEY_VERSION, MAX_SOMPI},
    mass,
    tx::{MutableTransaction, TransactionOutput},
};
use kestrel_txscript::{get_sig_op_count_upper_bound, is_unspendable, script_class::ScriptClass};

/// MAX_STANDARD_P2SH_SIG_OPS is the maximum number of signature operations
/// that are considered standard in a pay-to-script-hash script.
const MAX_STANDARD_P2SH_SIG_OPS: u64 = 15;

/// MAXIMUM_STANDARD_SIGNATURE_SCRIPT_SIZE is the maximum size allowed for a
/// transaction input signature script to be considered standard. This
/// value allows for a 15-of-15 CHECKMULTISIG pay-to-script-hash with
/// compressed keys.
///
/// (1 + 15*74 + 3) + (15*34 + 3) + 23 = 1650
const MAXIMUM_STANDARD_SIGNATURE_SCRIPT_SIZE: u64 = 1650;

/// MAXIMUM_STANDARD_TRANSACTION_MASS is the maximum mass allowed for transactions that
/// are considered standard and will therefore be relayed and considered for mining.
pub(crate) const MAXIMUM_STANDARD_TRANSACTION_MASS: u64 = 100_000;

/// A transaction may create this many more outputs than it spends inputs before it has to pay
/// for each additional output
const FREE_EXTRA_OUTPUTS: usize = 2;

impl Mempool {
    pub(crate) fn check_transaction_standard_in_isolation(&self, transaction: &MutableTransaction) -> NonStandardResult<()> {
        let transaction_id = transaction.id();

        // The transaction must be a currently supported version.
        if transaction.tx.version > self.config.maximum_standard_transaction_version
            || transaction.tx.version < self.config.minimum_standard_transaction_version
        {
            return Err(NonStandardError::RejectVersion(
                transaction_id,
                transaction.tx.version,
                self.config.minimum_standard_transaction_version,
                self.config.maximum_standard_transaction_version,
            ));
        }

        // Since extremely large transactions with a lot of inputs can cost
        // almost as much to process as the sender fees, limit the maximum
        // size of a transaction.
        let transaction_mass = transaction.calculated_mass.unwrap_or_default();
        if transaction_mass > MAXIMUM_STANDARD_TRANSACTION_MASS {
            return Err(NonStandardError::RejectMass(transaction_id, transaction_mass, MAXIMUM_STANDARD_TRANSACTION_MASS));
        }

        for (i, input) in transaction.tx.inputs.iter().enumerate() {
            // Each transaction input signature script must not exceed the
            // maximum size allowed for a standard transaction.
            let signature_script_len = input.signature_script.len() as u64;
            if signature_script_len > MAXIMUM_STANDARD_SIGNATURE_SCRIPT_SIZE {
                return Err(NonStandardError::RejectSignatureScriptSize(
                    transaction_id,
                    i,
                    signature_script_len,
                    MAXIMUM_STANDARD_SIGNATURE_SCRIPT_SIZE,
                ));
            }
        }

        // None of the output public key scripts can be a non-standard script or be "dust".
        for (i, output) in transaction.tx.outputs.iter().enumerate() {
            if output.script_public_key.version() > MAX_SCRIPT_PUBLIC_KEY_VERSION {
                return Err(NonStandardError::RejectScriptPublicKeyVersion(transaction_id, i));
            }

            if !ScriptClass::from_script(&output.script_public_key).is_standard() {
                return Err(NonStandardError::RejectOutputScriptClass(transaction_id, i));
            }

            if self.is_transaction_output_dust(output) {
                return Err(NonStandardError::RejectDust(transaction_id, i, output.value));
            }
        }

        Ok(())
    }

    /// is_transaction_output_dust returns whether or not the passed transaction output
    /// amount is considered dust or not based on the configured minimum transaction
    /// relay fee.
    ///
    /// Dust is defined in terms of the minimum transaction relay fee. In particular,
    /// if the cost to the network to spend coins is more than 1/3 of the minimum
    /// transaction relay fee, it is considered dust.
    pub(crate) fn is_transaction_output_dust(&self, transaction_output: &TransactionOutput) -> bool {
        // Unspendable outputs are considered dust.
        if is_unspendable(transaction_output.script_public_key.script()) {
            return true;
        }

        // The total serialized size consists of the output and the associated
        // input script to redeem it. Since there is no input script
        // to redeem it yet, use the minimum size of a typical input script.
        //
        // Pay-to-pubkey bytes breakdown:
        //
        //  Output to pubkey (43 bytes):
        //   8 value, 1 script len, 34 script [1 OP_DATA_32,
        //   32 pubkey, 1 OP_CHECKSIG]
        //
        //  Input (105 bytes):
        //   36 prev outpoint, 1 script len, 64 script [1 OP_DATA_64,
        //   64 sig], 4 sequence
        //
        // The most common scripts are pay-to-pubkey, and as per the above
        // breakdown, the minimum size of a p2pk input script is 148 bytes.
        let total_serialized_size = mass::transaction_output_estimated_serialized_size(transaction_output) + 148;

        // The following is equivalent to (value/total_serialized_size) * (1/3) * 1000
        // without needing to do floating point math.
        //
        // With the default minimum relay fee of 1000 sompi/kg, pay-to-pubkey
        // outputs of less than 546 sompi are dust.
        transaction_output.value.saturating_mul(1000) / (3 * total_serialized_size) < self.config.minimum_relay_transaction_fee
    }

    /// check_transaction_standard_in_context performs a series of checks on a transaction's
    /// inputs to ensure they are "standard". A standard transaction input within the
    /// context of this function is one whose referenced public key script is of a
    /// standard form and, for pay-to-script-hash, does not have more than
    /// MAX_STANDARD_P2SH_SIG_OPS signature operations.
    /// In addition, makes sure that the transaction's fee is above the minimum for acceptance
    /// into the mempool and relay.
    pub(crate) fn check_transaction_standard_in_context(&self, transaction: &MutableTransaction) -> NonStandardResult<()> {
        let transaction_id = transaction.id();

        for (i, (input, entry)) in transaction.tx.inputs.iter().zip(transaction.entries.iter()).enumerate() {
            // Entries were populated by a successful consensus validation
            let Some(entry) = entry else { return Err(NonStandardError::RejectInputScriptClass(transaction_id, i)) };
            match ScriptClass::from_script(&entry.script_public_key) {
                ScriptClass::NonStandard => {
                    return Err(NonStandardError::RejectInputScriptClass(transaction_id, i));
                }
                ScriptClass::ScriptHash => {
                    let num_sig_ops = get_sig_op_count_upper_bound(&input.signature_script, &entry.script_public_key);
                    if num_sig_ops > MAX_STANDARD_P2SH_SIG_OPS {
                        return Err(NonStandardError::RejectSignatureCount(transaction_id, i, num_sig_ops, MAX_STANDARD_P2SH_SIG_OPS));
                    }
                }
                ScriptClass::PubKey | ScriptClass::PubKeyECDSA | ScriptClass::TemplateLock => {}
            }
        }

        let fee = transaction.calculated_fee.unwrap_or_default();
        let minimum_fee = self.minimum_required_transaction_relay_fee(transaction.calculated_mass.unwrap_or_default());
        if fee < minimum_fee {
            return Err(NonStandardError::RejectInsufficientFee(transaction_id, fee, minimum_fee));
        }

        Ok(())
    }

    /// Rejects fan-out transactions creating more than [`FREE_EXTRA_OUTPUTS`] outputs beyond their input
    /// count without paying the minimum relay fee once per extra output. Applies to non-standard
    /// transactions as well.
    pub(crate) fn check_transaction_spam(&self, transaction: &MutableTransaction) -> RuleResult<()> {
        let extra_outputs = transaction.tx.outputs.len().saturating_sub(transaction.tx.inputs.len());
        if extra_outputs <= FREE_EXTRA_OUTPUTS {
            return Ok(());
        }
        let fee = transaction.calculated_fee.unwrap_or_default();
        let required = self
            .minimum_required_transaction_relay_fee(transaction.calculated_mass.unwrap_or_default())
            .saturating_mul(extra_outputs as u64)
            .min(MAX_SOMPI);
        if fee < required {
            return Err(RuleError::RejectSpamTransaction(transaction.id(), extra_outputs, fee, required));
        }
        Ok(())
    }

    /// minimum_required_transaction_relay_fee returns the minimum transaction fee required
    /// for a transaction with the passed mass to be accepted into the mempool and relayed.
    pub(crate) fn minimum_required_transaction_relay_fee(&self, mass: u64) -> u64 {
        // MinimumRelayTransactionFee is in sompi/kg so multiply by mass (which is in grams)
        // and divide by 1000 to get minimum sompis.
        let mut minimum_fee = mass.saturating_mul(self.config.minimum_relay_transaction_fee) / 1000;

        if minimum_fee == 0 {
            minimum_fee = self.config.minimum_relay_transaction_fee;
        }

        // Set the minimum fee to the maximum possible value if the calculated
        // fee is not in the valid range for monetary amounts.
        minimum_fee.min(MAX_SOMPI)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MiningCounters, mempool::config::Config};
    use kestrel_consensus_core::tx::{ScriptPublicKey, TransactionOutpoint, UtxoEntry};
    use kestrel_hashes::Hash;
    use kestrel_txscript::{
        opcodes::codes::OpReturn,
        standard::{pay_to_pub_key, pay_to_script_hash_script, test_helpers::create_transaction},
    };
    use std::sync::Arc;

    fn mempool(accept_non_standard: bool) -> Mempool {
        Mempool::new(Arc::new(Config::build_default(1000, accept_non_standard, 500_000)), Arc::new(MiningCounters::default()))
    }

    fn transaction_to(spk: ScriptPublicKey, value: u64) -> MutableTransaction {
        let mut tx = create_transaction(&[TransactionOutpoint::new(Hash::from_u64_word(1), 0)], &[value]);
        tx.outputs[0].script_public_key = spk;
        tx.finalize();
        let mut mtx =
            MutableTransaction::with_entries(Arc::new(tx), vec![UtxoEntry::new(value + 10_000, pay_to_pub_key(&[1; 32]), 0, false)]);
        mtx.calculated_mass = Some(2000);
        mtx.calculated_fee = Some(10_000);
        mtx
    }

    #[test]
    fn test_calc_min_required_tx_relay_fee() {
        let mempool = mempool(false);
        assert_eq!(mempool.minimum_required_transaction_relay_fee(0), 1000);
        assert_eq!(mempool.minimum_required_transaction_relay_fee(100), 1000);
        assert_eq!(mempool.minimum_required_transaction_relay_fee(2000), 2000);
        assert_eq!(mempool.minimum_required_transaction_relay_fee(u64::MAX), MAX_SOMPI);
    }

    #[test]
    fn test_is_transaction_output_dust() {
        let mempool = mempool(false);
        let p2pk = pay_to_pub_key(&[1; 32]);
        assert!(!mempool.is_transaction_output_dust(&TransactionOutput::new(1000, p2pk.clone())));
        assert!(mempool.is_transaction_output_dust(&TransactionOutput::new(100, p2pk)));
        let unspendable = ScriptPublicKey::from_vec(0, vec![OpReturn]);
        assert!(mempool.is_transaction_output_dust(&TransactionOutput::new(1_000_000, unspendable)));
    }

    #[test]
    fn test_check_transaction_standard_in_isolation() {
        let mempool = mempool(false);
        assert!(mempool.check_transaction_standard_in_isolation(&transaction_to(pay_to_pub_key(&[2; 32]), 5000)).is_ok());
        assert!(mempool.check_transaction_standard_in_isolation(&transaction_to(pay_to_script_hash_script(&[1, 2]), 5000)).is_ok());

        let non_standard = ScriptPublicKey::from_vec(0, vec![1, 2, 3]);
        assert!(matches!(
            mempool.check_transaction_standard_in_isolation(&transaction_to(non_standard, 5000)),
            Err(NonStandardError::RejectOutputScriptClass(_, 0))
        ));
        assert!(matches!(
            mempool.check_transaction_standard_in_isolation(&transaction_to(pay_to_pub_key(&[2; 32]), 10)),
            Err(NonStandardError::RejectDust(_, 0, 10))
        ));

        let mut heavy = transaction_to(pay_to_pub_key(&[2; 32]), 5000);
        heavy.calculated_mass = Some(MAXIMUM_STANDARD_TRANSACTION_MASS + 1);
        assert!(matches!(mempool.check_transaction_standard_in_isolation(&heavy), Err(NonStandardError::RejectMass(..))));
    }

    #[test]
    fn test_check_transaction_standard_in_context() {
        let mempool = mempool(false);
        let mut tx = transaction_to(pay_to_pub_key(&[2; 32]), 5000);
        assert!(mempool.check_transaction_standard_in_context(&tx).is_ok());

        tx.calculated_fee = Some(1999);
        assert_eq!(
            mempool.check_transaction_standard_in_context(&tx),
            Err(NonStandardError::RejectInsufficientFee(tx.id(), 1999, 2000))
        );

        tx.calculated_fee = Some(10_000);
        tx.entries[0] = Some(UtxoEntry::new(20_000, ScriptPublicKey::from_vec(0, vec![1, 2, 3]), 0, false));
        assert!(matches!(mempool.check_transaction_standard_in_context(&tx), Err(NonStandardError::RejectInputScriptClass(_, 0))));
    }

    #[test]
    fn test_check_transaction_spam() {
        let mempool = mempool(true);
        let outpoint = TransactionOutpoint::new(Hash::from_u64_word(1), 0);
        let fan_out = |outputs: usize, fee: u64| {
            let mut mtx = MutableTransaction::new(Arc::new(create_transaction(&[outpoint], &vec![1000; outputs])));
            mtx.calculated_mass = Some(1000);
            mtx.calculated_fee = Some(fee);
            mtx
        };
        // Two extra outputs are free
        assert!(mempool.check_transaction_spam(&fan_out(3, 1000)).is_ok());
        // Each of the four extra outputs pays the minimum relay fee
        let tx = fan_out(5, 3999);
        assert_eq!(mempool.check_transaction_spam(&tx), Err(RuleError::RejectSpamTransaction(tx.id(), 4, 3999, 4000)));
        assert!(mempool.check_transaction_spam(&fan_out(5, 4000)).is_ok());
    }
}
