use kestrel_consensus_core::tx::{MutableTransaction, ScriptPublicKey};
use std::collections::HashSet;

/// Addresses, as script public keys, which transactions may neither spend from nor pay to
#[derive(Default)]
pub(crate) struct FrozenScripts {
    scripts: HashSet<ScriptPublicKey>,
}

impl FrozenScripts {
    pub(crate) fn new(scripts: impl IntoIterator<Item = ScriptPublicKey>) -> Self {
        Self { scripts: scripts.into_iter().collect() }
    }

    /// First frozen script paid to by an output of `transaction`
    pub(crate) fn find_in_outputs<'a>(&self, transaction: &'a MutableTransaction) -> Option<&'a ScriptPublicKey> {
        transaction.tx.outputs.iter().map(|output| &output.script_public_key).find(|spk| self.scripts.contains(*spk))
    }

    /// First frozen script owning a UTXO spent by `transaction`. Only populated entries are inspected.
    pub(crate) fn find_in_inputs<'a>(&self, transaction: &'a MutableTransaction) -> Option<&'a ScriptPublicKey> {
        transaction.entries.iter().flatten().map(|entry| &entry.script_public_key).find(|spk| self.scripts.contains(*spk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus_core::tx::{TransactionOutpoint, TransactionOutput, UtxoEntry};
    use kestrel_hashes::Hash;
    use kestrel_txscript::standard::{pay_to_pub_key, test_helpers::create_transaction};
    use std::sync::Arc;

    #[test]
    fn test_frozen_inputs_and_outputs() {
        let frozen = pay_to_pub_key(&[7; 32]);
        let free = pay_to_pub_key(&[8; 32]);
        let scripts = FrozenScripts::new([frozen.clone()]);

        let mut tx = create_transaction(&[TransactionOutpoint::new(Hash::from_u64_word(1), 0)], &[]);
        tx.outputs.push(TransactionOutput::new(1000, free.clone()));
        let spending_frozen =
            MutableTransaction::with_entries(Arc::new(tx.clone()), vec![UtxoEntry::new(2000, frozen.clone(), 0, false)]);
        assert_eq!(scripts.find_in_inputs(&spending_frozen), Some(&frozen));
        assert!(scripts.find_in_outputs(&spending_frozen).is_none());

        tx.outputs.push(TransactionOutput::new(1000, frozen.clone()));
        tx.finalize();
        let paying_frozen = MutableTransaction::with_entries(Arc::new(tx), vec![UtxoEntry::new(2000, free, 0, false)]);
        assert!(scripts.find_in_inputs(&paying_frozen).is_none());
        assert_eq!(scripts.find_in_outputs(&paying_frozen), Some(&frozen));
    }
}
