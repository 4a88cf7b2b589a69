use super::HasherExtensions;
use crate::tx::{Transaction, TransactionId, TransactionInput, TransactionOutpoint, TransactionOutput};
use kestrel_hashes::{Hash, HasherBase};

bitflags::bitflags! {
    /// A bitmask defining which transaction fields we want to encode and which to ignore.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxEncodingFlags: u8 {
        const FULL = 0;
        const EXCLUDE_SIGNATURE_SCRIPT = 1 << 0;
        const EXCLUDE_MASS_COMMIT = 1 << 1;
    }
}

/// Returns the transaction hash. Note that this is different than the transaction ID.
pub fn hash(tx: &Transaction) -> Hash {
    let mut hasher = kestrel_hashes::TransactionHash::new();
    write_transaction(&mut hasher, tx, TxEncodingFlags::FULL);
    hasher.finalize()
}

/// Not intended for direct use by clients. Instead use `tx.id()`
pub(crate) fn id(tx: &Transaction) -> TransactionId {
    // Encode the transaction, replace signature script with zeroes, cut off
    // payload and hash the result.
    let mut hasher = kestrel_hashes::TransactionID::new();
    write_transaction(&mut hasher, tx, TxEncodingFlags::EXCLUDE_SIGNATURE_SCRIPT | TxEncodingFlags::EXCLUDE_MASS_COMMIT);
    hasher.finalize()
}

/// Write the transaction into the provided hasher according to the encoding flags
fn write_transaction<T: HasherBase>(hasher: &mut T, tx: &Transaction, encoding_flags: TxEncodingFlags) {
    hasher.update(tx.version.to_le_bytes()).write_len(tx.inputs.len());
    for input in tx.inputs.iter() {
        write_input(hasher, input, encoding_flags);
    }

    hasher.write_len(tx.outputs.len());
    for output in tx.outputs.iter() {
        write_output(hasher, output);
    }

    hasher.update(tx.lock_time.to_le_bytes()).update(tx.subnetwork_id).update(tx.gas.to_le_bytes()).write_var_bytes(&tx.payload);

    // The mass commitment is hashed only when set, so a zero mass (always the case for coinbase)
    // leaves the hash unchanged
    if !encoding_flags.contains(TxEncodingFlags::EXCLUDE_MASS_COMMIT) {
        let mass = tx.mass();
        if mass > 0 {
            hasher.update(mass.to_le_bytes());
        }
    }
}

#[inline(always)]
fn write_input<T: HasherBase>(hasher: &mut T, input: &TransactionInput, encoding_flags: TxEncodingFlags) {
    write_outpoint(hasher, &input.previous_outpoint);
    if !encoding_flags.contains(TxEncodingFlags::EXCLUDE_SIGNATURE_SCRIPT) {
        hasher.write_var_bytes(input.signature_script.as_slice()).update([input.sig_op_count]);
    } else {
        hasher.write_var_bytes(&[]);
    }
    hasher.update(input.sequence.to_le_bytes());
}

#[inline(always)]
fn write_outpoint<T: HasherBase>(hasher: &mut T, outpoint: &TransactionOutpoint) {
    hasher.update(outpoint.transaction_id).update(outpoint.index.to_le_bytes());
}

#[inline(always)]
fn write_output<T: HasherBase>(hasher: &mut T, output: &TransactionOutput) {
    hasher
        .update(output.value.to_le_bytes())
        .update(output.script_public_key.version().to_le_bytes())
        .write_var_bytes(output.script_public_key.script());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        subnets::{self, SubnetworkId},
        tx::ScriptPublicKey,
    };

    #[test]
    fn test_hash_and_id_domains_differ() {
        let tx = Transaction::new(0, vec![], vec![], 0, subnets::SUBNETWORK_ID_COINBASE, 0, vec![]);
        assert_ne!(hash(&tx), tx.id());

        // Mass commits to the hash only
        let massive = tx.clone().with_mass(100);
        assert_eq!(massive.id(), tx.id());
        assert_ne!(hash(&massive), hash(&tx));
    }

    #[test]
    fn test_id_commits_to_every_non_witness_field() {
        let base = Transaction::new(
            0,
            vec![TransactionInput::new(TransactionOutpoint::new(Hash::from_u64_word(1), 0), vec![], 7, 1)],
            vec![TransactionOutput::new(10, ScriptPublicKey::from_vec(0, vec![1, 2, 3]))],
            5,
            SubnetworkId::from_byte(9),
            3,
            vec![1],
        );
        let mutations: Vec<Box<dyn Fn(&mut Transaction)>> = vec![
            Box::new(|tx| tx.version = 1),
            Box::new(|tx| tx.inputs[0].previous_outpoint.index = 1),
            Box::new(|tx| tx.inputs[0].sequence = 8),
            Box::new(|tx| tx.outputs[0].value = 11),
            Box::new(|tx| tx.outputs[0].script_public_key = ScriptPublicKey::from_vec(1, vec![1, 2, 3])),
            Box::new(|tx| tx.lock_time = 6),
            Box::new(|tx| tx.subnetwork_id = SubnetworkId::from_byte(8)),
            Box::new(|tx| tx.gas = 4),
            Box::new(|tx| tx.payload = vec![2]),
        ];
        for mutate in mutations {
            let mut tx = base.clone();
            mutate(&mut tx);
            tx.finalize();
            assert_ne!(tx.id(), base.id());
        }
    }
}
