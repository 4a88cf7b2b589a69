use kestrel_consensus_core::{
    constants::{MAX_SOMPI, SEQUENCE_LOCK_TIME_DISABLED, SEQUENCE_LOCK_TIME_MASK},
    errors::tx::{TxResult, TxRuleError},
    hashing::sighash::SigHashReusedValues,
    tx::VerifiableTransaction,
};
use kestrel_txscript::{SigCache, TxScriptEngine};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use super::TransactionValidator;

/// Transactions with more inputs than this have their scripts checked in parallel
const CHECK_SCRIPTS_PARALLELISM_THRESHOLD: usize = 1;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TxValidationFlags {
    /// Full validation including script verification
    Full,

    /// Fee, sequence and maturity validations only. Used when the scripts are known to have been checked
    SkipScriptChecks,

    /// Used by the mempool which applies its own mass policy
    SkipMassCheck,
}

impl TransactionValidator {
    /// Validates a populated transaction from the point of view of a block with DAA score `pov_daa_score`
    /// and returns its fee
    pub fn validate_populated_transaction_and_get_fee(
        &self,
        tx: &(impl VerifiableTransaction + Sync),
        pov_daa_score: u64,
        flags: TxValidationFlags,
    ) -> TxResult<u64> {
        self.check_transaction_coinbase_maturity(tx, pov_daa_score)?;
        let total_in = check_transaction_input_amounts(tx)?;
        let total_out = check_transaction_output_values(tx, total_in)?;
        let fee = total_in - total_out;
        check_gas_fee(tx, fee)?;
        check_sequence_lock(tx, pov_daa_score)?;
        if flags != TxValidationFlags::SkipMassCheck {
            self.check_mass(tx, pov_daa_score)?;
        }

        match flags {
            TxValidationFlags::Full | TxValidationFlags::SkipMassCheck => self.check_scripts(tx)?,
            TxValidationFlags::SkipScriptChecks => {}
        }
        Ok(fee)
    }

    fn check_transaction_coinbase_maturity(&self, tx: &impl VerifiableTransaction, pov_daa_score: u64) -> TxResult<()> {
        let maturity = self.params.coinbase_maturity;
        if let Some((index, (input, entry))) = tx
            .populated_inputs()
            .enumerate()
            .find(|(_, (_, entry))| entry.is_coinbase && entry.block_daa_score + maturity > pov_daa_score)
        {
            return Err(TxRuleError::ImmatureCoinbaseSpend(
                index,
                input.previous_outpoint,
                entry.block_daa_score,
                pov_daa_score,
                maturity,
            ));
        }
        Ok(())
    }

    fn check_mass(&self, tx: &impl VerifiableTransaction, pov_daa_score: u64) -> TxResult<()> {
        let mass = self.mass_calculator.calc_tx_mass(tx.tx());
        let max_mass = self.params.block_version(pov_daa_score).max_block_mass;
        if mass > max_mass {
            return Err(TxRuleError::MassTooHigh(mass, max_mass));
        }
        Ok(())
    }

    pub fn check_scripts(&self, tx: &(impl VerifiableTransaction + Sync)) -> TxResult<()> {
        check_scripts(&self.sig_cache, tx)
    }
}

fn check_transaction_input_amounts(tx: &impl VerifiableTransaction) -> TxResult<u64> {
    let mut total: u64 = 0;
    for (_, entry) in tx.populated_inputs() {
        total = total.checked_add(entry.amount).filter(|&t| t <= MAX_SOMPI).ok_or(TxRuleError::InputAmountOverflow)?;
    }
    Ok(total)
}

fn check_transaction_output_values(tx: &impl VerifiableTransaction, total_in: u64) -> TxResult<u64> {
    // Output ranges were checked in isolation, so the sum cannot overflow
    let total_out: u64 = tx.outputs().iter().map(|out| out.value).sum();
    if total_in < total_out {
        return Err(TxRuleError::SpendTooHigh(total_in, total_out));
    }
    Ok(total_out)
}

fn check_gas_fee(tx: &impl VerifiableTransaction, fee: u64) -> TxResult<()> {
    let gas = tx.tx().gas;
    if gas > 0 && fee < gas {
        return Err(TxRuleError::InsufficientGasFee(fee, gas));
    }
    Ok(())
}

fn check_sequence_lock(tx: &impl VerifiableTransaction, pov_daa_score: u64) -> TxResult<()> {
    let pov_daa_score = pov_daa_score as i64;
    let locked = tx.populated_inputs().filter(|(input, _)| input.sequence & SEQUENCE_LOCK_TIME_DISABLED == 0).any(|(input, entry)| {
        // The relative lock is expressed in DAA score units from the DAA score of the spent entry.
        // One is subtracted to keep the lock time semantics of absolute locks
        let relative_lock = (input.sequence & SEQUENCE_LOCK_TIME_MASK) as i64;
        let lock_daa_score = entry.block_daa_score as i64 + relative_lock - 1;
        lock_daa_score >= pov_daa_score
    });
    if locked {
        return Err(TxRuleError::SequenceLockConditionsAreNotMet);
    }
    Ok(())
}

pub fn check_scripts(sig_cache: &SigCache, tx: &(impl VerifiableTransaction + Sync)) -> TxResult<()> {
    if tx.inputs().len() > CHECK_SCRIPTS_PARALLELISM_THRESHOLD {
        check_scripts_par_iter(sig_cache, tx)
    } else {
        check_scripts_sequential(sig_cache, tx)
    }
}

pub fn check_scripts_sequential(sig_cache: &SigCache, tx: &impl VerifiableTransaction) -> TxResult<()> {
    let mut reused_values = SigHashReusedValues::new();
    for (i, (input, entry)) in tx.populated_inputs().enumerate() {
        TxScriptEngine::from_transaction_input(tx, input, i, entry, &mut reused_values, sig_cache)?.execute()?;
    }
    Ok(())
}

pub fn check_scripts_par_iter(sig_cache: &SigCache, tx: &(impl VerifiableTransaction + Sync)) -> TxResult<()> {
    (0..tx.inputs().len()).into_par_iter().try_for_each(|idx| {
        let (input, entry) = tx.populated_input(idx);
        let mut reused_values = SigHashReusedValues::new();
        TxScriptEngine::from_transaction_input(tx, input, idx, entry, &mut reused_values, sig_cache)?.execute()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus_core::{
        config::params::SIMNET_PARAMS,
        constants::TX_VERSION,
        hashing::{
            sighash::calc_schnorr_signature_hash,
            sighash_type::SIG_HASH_ALL,
            template::calc_template_hash,
        },
        subnets::{SUBNETWORK_ID_NATIVE, SubnetworkId},
        tx::{
            PopulatedTransaction, ScriptPublicKey, Transaction, TransactionInput, TransactionOutpoint, TransactionOutput, UtxoEntry,
        },
    };
    use kestrel_hashes::Hash;
    use kestrel_txscript::{pay_to_pub_key, pay_to_template_hash, test_helpers::op_true_script};
    use secp256k1::{Keypair, Secp256k1};

    fn validator() -> TransactionValidator {
        TransactionValidator::new(&SIMNET_PARAMS, SigCache::new(1000))
    }

    fn input(word: u64, sequence: u64) -> TransactionInput {
        TransactionInput::new(TransactionOutpoint::new(Hash::from_u64_word(word), 0), vec![], sequence, 0)
    }

    fn tx(inputs: Vec<TransactionInput>, outputs: &[u64]) -> Transaction {
        let outputs = outputs.iter().map(|&v| TransactionOutput::new(v, op_true_script())).collect();
        Transaction::new(TX_VERSION, inputs, outputs, 0, SUBNETWORK_ID_NATIVE, 0, vec![])
    }

    fn entry(amount: u64, spk: ScriptPublicKey, daa_score: u64, is_coinbase: bool) -> UtxoEntry {
        UtxoEntry::new(amount, spk, daa_score, is_coinbase)
    }

    #[test]
    fn test_fee_and_amounts() {
        let tv = validator();
        let t = tx(vec![input(1, SEQUENCE_LOCK_TIME_DISABLED)], &[700]);
        let populated = PopulatedTransaction::new(&t, vec![entry(1000, op_true_script(), 0, false)]);
        assert_eq!(tv.validate_populated_transaction_and_get_fee(&populated, 10, TxValidationFlags::Full), Ok(300));

        let populated = PopulatedTransaction::new(&t, vec![entry(500, op_true_script(), 0, false)]);
        assert_eq!(
            tv.validate_populated_transaction_and_get_fee(&populated, 10, TxValidationFlags::Full),
            Err(TxRuleError::SpendTooHigh(500, 700))
        );
    }

    #[test]
    fn test_coinbase_maturity() {
        let tv = validator();
        let maturity = SIMNET_PARAMS.coinbase_maturity;
        let t = tx(vec![input(1, SEQUENCE_LOCK_TIME_DISABLED)], &[700]);
        let populated = PopulatedTransaction::new(&t, vec![entry(1000, op_true_script(), 5, true)]);
        assert!(matches!(
            tv.validate_populated_transaction_and_get_fee(&populated, 5 + maturity - 1, TxValidationFlags::Full),
            Err(TxRuleError::ImmatureCoinbaseSpend(0, _, 5, _, _))
        ));
        assert_eq!(tv.validate_populated_transaction_and_get_fee(&populated, 5 + maturity, TxValidationFlags::Full), Ok(300));
    }

    #[test]
    fn test_sequence_lock() {
        let tv = validator();
        // Relative lock of 10 DAA score units from an entry created at DAA score 100
        let t = tx(vec![input(1, 10)], &[1]);
        let populated = PopulatedTransaction::new(&t, vec![entry(10, op_true_script(), 100, false)]);
        assert_eq!(
            tv.validate_populated_transaction_and_get_fee(&populated, 109, TxValidationFlags::Full),
            Err(TxRuleError::SequenceLockConditionsAreNotMet)
        );
        assert_eq!(tv.validate_populated_transaction_and_get_fee(&populated, 110, TxValidationFlags::Full), Ok(9));
    }

    #[test]
    fn test_signature_verification() {
        let tv = validator();
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &[7u8; 32]).unwrap();
        let spk = pay_to_pub_key(&keypair.x_only_public_key().0.serialize());

        let mut t = tx(vec![input(1, SEQUENCE_LOCK_TIME_DISABLED), input(2, SEQUENCE_LOCK_TIME_DISABLED)], &[1500]);
        let entries = vec![entry(1000, spk.clone(), 0, false), entry(1000, spk, 0, false)];
        for i in 0..2 {
            let populated = PopulatedTransaction::new(&t, entries.clone());
            let hash = calc_schnorr_signature_hash(&populated, i, SIG_HASH_ALL, &mut SigHashReusedValues::new());
            let sig = keypair.sign_schnorr(secp256k1::Message::from_digest(hash.as_bytes()));
            let mut signature = vec![65u8];
            signature.extend_from_slice(sig.as_ref());
            signature.push(SIG_HASH_ALL.to_u8());
            t.inputs[i].signature_script = signature;
            t.inputs[i].sig_op_count = 1;
        }
        let populated = PopulatedTransaction::new(&t, entries.clone());
        assert_eq!(tv.validate_populated_transaction_and_get_fee(&populated, 10, TxValidationFlags::Full), Ok(500));
        // A second validation is served from the signature cache
        assert_eq!(tv.validate_populated_transaction_and_get_fee(&populated, 10, TxValidationFlags::Full), Ok(500));
        assert!(!tv.sig_cache().is_empty());

        t.outputs[0].value = 1400;
        let populated = PopulatedTransaction::new(&t, entries);
        assert!(matches!(
            tv.validate_populated_transaction_and_get_fee(&populated, 10, TxValidationFlags::Full),
            Err(TxRuleError::SignatureInvalid(_))
        ));
        assert_eq!(tv.validate_populated_transaction_and_get_fee(&populated, 10, TxValidationFlags::SkipScriptChecks), Ok(600));
    }

    #[test]
    fn test_check_template_verify_sensitivity() {
        let tv = validator();
        let template = {
            let mut t = tx(vec![input(1, 0), input(2, 5)], &[300, 400]);
            t.subnetwork_id = SubnetworkId::from_byte(12);
            t.payload = vec![1, 2, 3];
            t
        };
        let native_template = tx(vec![input(1, 0), input(2, 5)], &[300, 400]);

        let validate = |t: &Transaction, template_of: &Transaction| {
            let spk = pay_to_template_hash(calc_template_hash(template_of, 0));
            // Entries are looked up by outpoint so that input reordering keeps each entry with its input
            let entries = t
                .inputs
                .iter()
                .map(|i| {
                    let spk =
                        if i.previous_outpoint == template_of.inputs[0].previous_outpoint { spk.clone() } else { op_true_script() };
                    entry(1000, spk, 0, false)
                })
                .collect();
            tv.check_scripts(&PopulatedTransaction::new(t, entries))
        };

        assert_eq!(validate(&template, &template), Ok(()));
        assert_eq!(validate(&native_template, &native_template), Ok(()));

        let mutations: Vec<(&str, Box<dyn Fn(&mut Transaction)>)> = vec![
            ("lock time", Box::new(|t: &mut Transaction| t.lock_time += 1)),
            ("gas", Box::new(|t: &mut Transaction| t.gas += 1)),
            ("subnetwork", Box::new(|t: &mut Transaction| t.subnetwork_id = SubnetworkId::from_byte(13))),
            ("input sequence", Box::new(|t: &mut Transaction| t.inputs[1].sequence += 1)),
            ("input order", Box::new(|t: &mut Transaction| t.inputs.swap(0, 1))),
            ("output value", Box::new(|t: &mut Transaction| t.outputs[1].value += 1)),
            ("output order", Box::new(|t: &mut Transaction| t.outputs.swap(0, 1))),
            ("output count", Box::new(|t: &mut Transaction| t.outputs.push(TransactionOutput::new(1, op_true_script())))),
            ("payload", Box::new(|t: &mut Transaction| t.payload.push(4))),
        ];
        for (name, mutate) in mutations.iter() {
            let mut changed = template.clone();
            mutate(&mut changed);
            assert_eq!(validate(&changed, &template), Err(TxRuleError::CheckTemplateVerify), "mutating {name}");
        }

        // The payload of native transactions is not committed to
        let mut changed = native_template.clone();
        changed.payload = vec![9, 9];
        assert_eq!(validate(&changed, &native_template), Ok(()));
    }
}
