use kestrel_multiset::Multiset;

use crate::tx::{TransactionOutpoint, UtxoEntry, VerifiableTransaction};

/// UTXO set commitment helpers over [`Multiset`]. Each UTXO is committed to as one element,
/// so the commitment of a set does not depend on the order in which it was built
pub trait MultisetExtensions {
    fn add_utxo(&mut self, outpoint: &TransactionOutpoint, entry: &UtxoEntry);
    fn remove_utxo(&mut self, outpoint: &TransactionOutpoint, entry: &UtxoEntry);
    /// Removes the spent entries of `tx` and adds its outputs as created at `block_daa_score`
    fn add_transaction(&mut self, tx: &impl VerifiableTransaction, block_daa_score: u64);
}

impl MultisetExtensions for Multiset {
    fn add_utxo(&mut self, outpoint: &TransactionOutpoint, entry: &UtxoEntry) {
        self.add_element(&utxo_element_bytes(outpoint, entry));
    }

    fn remove_utxo(&mut self, outpoint: &TransactionOutpoint, entry: &UtxoEntry) {
        self.remove_element(&utxo_element_bytes(outpoint, entry));
    }

    fn add_transaction(&mut self, tx: &impl VerifiableTransaction, block_daa_score: u64) {
        for (input, entry) in tx.populated_inputs() {
            self.remove_utxo(&input.previous_outpoint, entry);
        }

        let tx_id = tx.id();
        let is_coinbase = tx.is_coinbase();
        for (i, output) in tx.outputs().iter().enumerate() {
            let outpoint = TransactionOutpoint::new(tx_id, i as u32);
            let entry = UtxoEntry::new(output.value, output.script_public_key.clone(), block_daa_score, is_coinbase);
            self.add_utxo(&outpoint, &entry);
        }
    }
}

fn utxo_element_bytes(outpoint: &TransactionOutpoint, entry: &UtxoEntry) -> Vec<u8> {
    let script = entry.script_public_key.script();
    let mut bytes = Vec::with_capacity(32 + 4 + 8 + 8 + 1 + 2 + 8 + script.len());
    bytes.extend_from_slice(&outpoint.transaction_id.as_bytes());
    bytes.extend_from_slice(&outpoint.index.to_le_bytes());
    bytes.extend_from_slice(&entry.amount.to_le_bytes());
    bytes.extend_from_slice(&entry.block_daa_score.to_le_bytes());
    bytes.push(entry.is_coinbase as u8);
    bytes.extend_from_slice(&entry.script_public_key.version().to_le_bytes());
    bytes.extend_from_slice(&(script.len() as u64).to_le_bytes());
    bytes.extend_from_slice(script);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::ScriptPublicKey;
    use kestrel_hashes::{Hash, ZERO_HASH};

    #[test]
    fn test_commitment_is_order_independent() {
        let utxos: Vec<_> = (0..5u64)
            .map(|i| {
                (
                    TransactionOutpoint::new(Hash::from_u64_word(i), i as u32),
                    UtxoEntry::new(i * 10, ScriptPublicKey::default(), i, i == 0),
                )
            })
            .collect();

        let mut forward = Multiset::new();
        utxos.iter().for_each(|(o, e)| forward.add_utxo(o, e));
        let mut backward = Multiset::new();
        utxos.iter().rev().for_each(|(o, e)| backward.add_utxo(o, e));
        assert_eq!(forward.finalize(), backward.finalize());

        forward.remove_utxo(&utxos[2].0, &utxos[2].1);
        assert_ne!(forward.finalize(), backward.finalize());
        forward.add_utxo(&utxos[2].0, &utxos[2].1);
        assert_eq!(forward.finalize(), backward.finalize());

        utxos.iter().for_each(|(o, e)| forward.remove_utxo(o, e));
        assert_eq!(forward.finalize(), ZERO_HASH);
    }
}
