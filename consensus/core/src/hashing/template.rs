//! The template hash committed to by `OP_CHECKTEMPLATEVERIFY`. It covers every field that
//! shapes the spending transaction except signature scripts, so a covenant can pin the
//! exact transaction which may spend an output.

use super::HasherExtensions;
use crate::tx::Transaction;
use kestrel_hashes::{Hash, HasherBase, TransactionTemplateHash, ZERO_HASH};

pub fn calc_template_hash(tx: &Transaction, input_index: u32) -> Hash {
    let mut hasher = TransactionTemplateHash::new();
    hasher
        .write_u16(tx.version)
        .write_u64(tx.lock_time)
        .write_u64(tx.gas)
        .update(tx.subnetwork_id)
        .update(template_payload_hash(tx))
        .update(inputs_hash(tx))
        .update(outputs_hash(tx))
        .write_u32(input_index);
    hasher.finalize()
}

fn template_payload_hash(tx: &Transaction) -> Hash {
    if tx.subnetwork_id.is_native() {
        return ZERO_HASH;
    }
    let mut hasher = TransactionTemplateHash::new();
    hasher.write_var_bytes(&tx.payload);
    hasher.finalize()
}

fn inputs_hash(tx: &Transaction) -> Hash {
    let mut hasher = TransactionTemplateHash::new();
    hasher.write_len(tx.inputs.len());
    for input in tx.inputs.iter() {
        hasher.update(input.previous_outpoint.transaction_id).write_u32(input.previous_outpoint.index).write_u64(input.sequence);
    }
    hasher.finalize()
}

fn outputs_hash(tx: &Transaction) -> Hash {
    let mut hasher = TransactionTemplateHash::new();
    hasher.write_len(tx.outputs.len());
    for output in tx.outputs.iter() {
        hasher
            .write_u64(output.value)
            .write_u16(output.script_public_key.version())
            .write_var_bytes(output.script_public_key.script());
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        subnets::{SUBNETWORK_ID_DATA, SUBNETWORK_ID_NATIVE},
        tx::{ScriptPublicKey, TransactionInput, TransactionOutpoint, TransactionOutput},
    };

    fn tx() -> Transaction {
        Transaction::new(
            0,
            vec![
                TransactionInput::new(TransactionOutpoint::new(Hash::from_u64_word(1), 0), vec![], 0, 1),
                TransactionInput::new(TransactionOutpoint::new(Hash::from_u64_word(2), 1), vec![], 0, 1),
            ],
            vec![
                TransactionOutput::new(5, ScriptPublicKey::from_vec(0, vec![1])),
                TransactionOutput::new(6, ScriptPublicKey::default()),
            ],
            0,
            SUBNETWORK_ID_NATIVE,
            0,
            vec![],
        )
    }

    #[test]
    fn test_signature_scripts_and_native_payload_are_not_committed() {
        let base = tx();
        let hash = calc_template_hash(&base, 0);
        let mut signed = base.clone();
        signed.inputs[0].signature_script = vec![7; 70];
        signed.payload = vec![1, 2];
        assert_eq!(calc_template_hash(&signed, 0), hash);
        assert_ne!(calc_template_hash(&base, 1), hash);

        let mut data = base.clone();
        data.subnetwork_id = SUBNETWORK_ID_DATA;
        let data_hash = calc_template_hash(&data, 0);
        data.payload = vec![1];
        assert_ne!(calc_template_hash(&data, 0), data_hash);
    }

    #[test]
    fn test_ordering_is_committed() {
        let base = tx();
        let hash = calc_template_hash(&base, 0);
        let mut swapped_inputs = base.clone();
        swapped_inputs.inputs.swap(0, 1);
        assert_ne!(calc_template_hash(&swapped_inputs, 0), hash);
        let mut swapped_outputs = base.clone();
        swapped_outputs.outputs.swap(0, 1);
        assert_ne!(calc_template_hash(&swapped_outputs, 0), hash);
    }
}
