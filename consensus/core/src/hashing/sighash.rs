use kestrel_hashes::{Hash, Hasher, HasherBase, TransactionSigningHash, TransactionSigningHashECDSA, ZERO_HASH};

use crate::{
    subnets::SUBNETWORK_ID_NATIVE,
    tx::{ScriptPublicKey, TransactionOutpoint, TransactionOutput, VerifiableTransaction},
};

use super::{HasherExtensions, sighash_type::SigHashType};

/// Holds all fields used in the calculation of a transaction's sig_hash which are
/// the same for all transaction inputs.
/// Reuse of such values prevents the quadratic hashing problem.
#[derive(Default)]
pub struct SigHashReusedValues {
    previous_outputs_hash: Option<Hash>,
    sequences_hash: Option<Hash>,
    sig_op_counts_hash: Option<Hash>,
    outputs_hash: Option<Hash>,
    payload_hash: Option<Hash>,
}

impl SigHashReusedValues {
    pub fn new() -> Self {
        Default::default()
    }
}

pub fn previous_outputs_hash(
    tx: &impl VerifiableTransaction,
    hash_type: SigHashType,
    reused_values: &mut SigHashReusedValues,
) -> Hash {
    if hash_type.is_sighash_anyone_can_pay() {
        return ZERO_HASH;
    }

    if let Some(previous_outputs_hash) = reused_values.previous_outputs_hash {
        previous_outputs_hash
    } else {
        let mut hasher = TransactionSigningHash::new();
        for input in tx.inputs().iter() {
            hasher.update(input.previous_outpoint.transaction_id.as_bytes());
            hasher.write_u32(input.previous_outpoint.index);
        }
        let previous_outputs_hash = hasher.finalize();
        reused_values.previous_outputs_hash = Some(previous_outputs_hash);
        previous_outputs_hash
    }
}

pub fn sequences_hash(tx: &impl VerifiableTransaction, hash_type: SigHashType, reused_values: &mut SigHashReusedValues) -> Hash {
    if hash_type.is_sighash_single() || hash_type.is_sighash_anyone_can_pay() || hash_type.is_sighash_none() {
        return ZERO_HASH;
    }

    if let Some(sequences_hash) = reused_values.sequences_hash {
        sequences_hash
    } else {
        let mut hasher = TransactionSigningHash::new();
        for input in tx.inputs().iter() {
            hasher.write_u64(input.sequence);
        }
        let sequence_hash = hasher.finalize();
        reused_values.sequences_hash = Some(sequence_hash);
        sequence_hash
    }
}

pub fn sig_op_counts_hash(tx: &impl VerifiableTransaction, hash_type: SigHashType, reused_values: &mut SigHashReusedValues) -> Hash {
    if hash_type.is_sighash_anyone_can_pay() {
        return ZERO_HASH;
    }

    if let Some(sig_op_counts_hash) = reused_values.sig_op_counts_hash {
        sig_op_counts_hash
    } else {
        let mut hasher = TransactionSigningHash::new();
        for input in tx.inputs().iter() {
            hasher.write_u8(input.sig_op_count);
        }
        let sig_op_counts_hash = hasher.finalize();
        reused_values.sig_op_counts_hash = Some(sig_op_counts_hash);
        sig_op_counts_hash
    }
}

pub fn payload_hash(tx: &impl VerifiableTransaction, reused_values: &mut SigHashReusedValues) -> Hash {
    if tx.tx().subnetwork_id == SUBNETWORK_ID_NATIVE {
        return ZERO_HASH;
    }

    if let Some(payload_hash) = reused_values.payload_hash {
        payload_hash
    } else {
        let mut hasher = TransactionSigningHash::new();
        hasher.write_var_bytes(&tx.tx().payload);
        let payload_hash = hasher.finalize();
        reused_values.payload_hash = Some(payload_hash);
        payload_hash
    }
}

pub fn outputs_hash(
    tx: &impl VerifiableTransaction,
    hash_type: SigHashType,
    reused_values: &mut SigHashReusedValues,
    input_index: usize,
) -> Hash {
    if hash_type.is_sighash_none() {
        return ZERO_HASH;
    }

    if hash_type.is_sighash_single() {
        // If the relevant output exists - return its hash, otherwise return zero-hash
        if input_index >= tx.outputs().len() {
            return ZERO_HASH;
        }

        let mut hasher = TransactionSigningHash::new();
        hash_output(&mut hasher, &tx.outputs()[input_index]);
        return hasher.finalize();
    }

    // Otherwise, return hash of all outputs. Re-use hash if available.
    if let Some(outputs_hash) = reused_values.outputs_hash {
        outputs_hash
    } else {
        let mut hasher = TransactionSigningHash::new();
        for output in tx.outputs().iter() {
            hash_output(&mut hasher, output);
        }
        let outputs_hash = hasher.finalize();
        reused_values.outputs_hash = Some(outputs_hash);
        outputs_hash
    }
}

pub fn hash_outpoint(hasher: &mut impl Hasher, outpoint: TransactionOutpoint) {
    hasher.update(outpoint.transaction_id);
    hasher.write_u32(outpoint.index);
}

pub fn hash_output(hasher: &mut impl Hasher, output: &TransactionOutput) {
    hasher.write_u64(output.value);
    hash_script_public_key(hasher, &output.script_public_key);
}

pub fn hash_script_public_key(hasher: &mut impl Hasher, script_public_key: &ScriptPublicKey) {
    hasher.write_u16(script_public_key.version());
    hasher.write_var_bytes(script_public_key.script());
}

pub fn calc_schnorr_signature_hash(
    verifiable_tx: &impl VerifiableTransaction,
    input_index: usize,
    hash_type: SigHashType,
    reused_values: &mut SigHashReusedValues,
) -> Hash {
    let input = verifiable_tx.populated_input(input_index);
    let tx = verifiable_tx.tx();
    let mut hasher = TransactionSigningHash::new();
    hasher
        .write_u16(tx.version)
        .update(previous_outputs_hash(verifiable_tx, hash_type, reused_values))
        .update(sequences_hash(verifiable_tx, hash_type, reused_values))
        .update(sig_op_counts_hash(verifiable_tx, hash_type, reused_values));
    hash_outpoint(&mut hasher, input.0.previous_outpoint);
    hash_script_public_key(&mut hasher, &input.1.script_public_key);
    hasher
        .write_u64(input.1.amount)
        .write_u64(input.0.sequence)
        .write_u8(input.0.sig_op_count)
        .update(outputs_hash(verifiable_tx, hash_type, reused_values, input_index))
        .write_u64(tx.lock_time)
        .update(tx.subnetwork_id)
        .write_u64(tx.gas)
        .update(payload_hash(verifiable_tx, reused_values))
        .write_u8(hash_type.to_u8());
    hasher.finalize()
}

pub fn calc_ecdsa_signature_hash(
    tx: &impl VerifiableTransaction,
    input_index: usize,
    hash_type: SigHashType,
    reused_values: &mut SigHashReusedValues,
) -> Hash {
    let hash = calc_schnorr_signature_hash(tx, input_index, hash_type, reused_values);
    let mut hasher = TransactionSigningHashECDSA::new();
    hasher.update(hash);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hashing::sighash_type::{SIG_HASH_ALL, SIG_HASH_ANY_ONE_CAN_PAY, SIG_HASH_NONE, SIG_HASH_SINGLE},
        subnets::SubnetworkId,
        tx::{PopulatedTransaction, Transaction, TransactionInput, UtxoEntry},
    };

    fn build() -> (Transaction, Vec<UtxoEntry>) {
        let prev = Hash::from_u64_word(42);
        let spk = |b: u8| ScriptPublicKey::from_vec(0, vec![b; 34]);
        let tx = Transaction::new(
            0,
            (0..3).map(|i| TransactionInput::new(TransactionOutpoint::new(prev, i), vec![], i as u64, 1)).collect(),
            vec![TransactionOutput::new(300, spk(1)), TransactionOutput::new(300, spk(2))],
            1615462089000,
            SUBNETWORK_ID_NATIVE,
            0,
            vec![],
        );
        let entries = (0..3).map(|i| UtxoEntry::new(100 * (i + 1), spk(i as u8), 0, false)).collect();
        (tx, entries)
    }

    #[test]
    fn test_sighash_types_cover_expected_fields() {
        let (tx, entries) = build();
        let populated = PopulatedTransaction::new(&tx, entries.clone());
        let all = calc_schnorr_signature_hash(&populated, 0, SIG_HASH_ALL, &mut SigHashReusedValues::new());

        // Changing the second output breaks ALL but not SINGLE (input 0 covers output 0 only)
        let mut changed = tx.clone();
        changed.outputs[1].value = 301;
        changed.finalize();
        let changed_populated = PopulatedTransaction::new(&changed, entries.clone());
        assert_ne!(all, calc_schnorr_signature_hash(&changed_populated, 0, SIG_HASH_ALL, &mut SigHashReusedValues::new()));
        assert_eq!(
            calc_schnorr_signature_hash(&populated, 0, SIG_HASH_SINGLE, &mut SigHashReusedValues::new()),
            calc_schnorr_signature_hash(&changed_populated, 0, SIG_HASH_SINGLE, &mut SigHashReusedValues::new())
        );
        assert_eq!(
            calc_schnorr_signature_hash(&populated, 0, SIG_HASH_NONE, &mut SigHashReusedValues::new()),
            calc_schnorr_signature_hash(&changed_populated, 0, SIG_HASH_NONE, &mut SigHashReusedValues::new())
        );

        // Anyone-can-pay ignores other inputs
        let acp = SigHashType::from_u8(SIG_HASH_ALL.to_u8() | SIG_HASH_ANY_ONE_CAN_PAY.to_u8()).unwrap();
        let mut other_inputs = tx.clone();
        other_inputs.inputs[2].previous_outpoint.index = 9;
        other_inputs.finalize();
        let other_populated = PopulatedTransaction::new(&other_inputs, entries);
        assert_eq!(
            calc_schnorr_signature_hash(&populated, 0, acp, &mut SigHashReusedValues::new()),
            calc_schnorr_signature_hash(&other_populated, 0, acp, &mut SigHashReusedValues::new())
        );
    }

    #[test]
    fn test_reused_values_do_not_change_result() {
        let (mut tx, entries) = build();
        tx.subnetwork_id = SubnetworkId::from_byte(5);
        tx.payload = vec![1, 2, 3];
        tx.finalize();
        let populated = PopulatedTransaction::new(&tx, entries);
        let mut reused = SigHashReusedValues::new();
        for i in 0..3 {
            let with_cache = calc_schnorr_signature_hash(&populated, i, SIG_HASH_ALL, &mut reused);
            let fresh = calc_schnorr_signature_hash(&populated, i, SIG_HASH_ALL, &mut SigHashReusedValues::new());
            assert_eq!(with_cache, fresh);
        }
        assert_ne!(
            calc_ecdsa_signature_hash(&populated, 0, SIG_HASH_ALL, &mut reused),
            calc_schnorr_signature_hash(&populated, 0, SIG_HASH_ALL, &mut reused)
        );
    }
}
