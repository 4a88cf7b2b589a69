use crate::tx::{Transaction, TransactionId};
use kestrel_hashes::Hash;
use kestrel_merkle::calc_merkle_root;

/// The merkle root committed to by the header `hash_merkle_root` field. Leaves are full
/// transaction hashes, so signature scripts are committed too
pub fn calc_hash_merkle_root<'a>(txs: impl ExactSizeIterator<Item = &'a Transaction>) -> Hash {
    calc_merkle_root(txs.map(|tx| tx.hash()))
}

/// The merkle root committed to by the header `accepted_id_merkle_root` field. Leaves are
/// accepted transaction ids in acceptance order
pub fn calc_accepted_id_merkle_root(accepted_tx_ids: impl ExactSizeIterator<Item = TransactionId>) -> Hash {
    calc_merkle_root(accepted_tx_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        subnets::{SUBNETWORK_ID_COINBASE, SUBNETWORK_ID_NATIVE},
        tx::{ScriptPublicKey, TransactionInput, TransactionOutpoint, TransactionOutput},
    };

    #[test]
    fn test_hash_merkle_root_commits_to_signatures() {
        let coinbase = Transaction::new(0, vec![], vec![], 0, SUBNETWORK_ID_COINBASE, 0, vec![1, 2, 3]);
        let mut spend = Transaction::new(
            0,
            vec![TransactionInput::new(TransactionOutpoint::new(Hash::from_u64_word(9), 1), vec![1; 65], 0, 1)],
            vec![TransactionOutput::new(5, ScriptPublicKey::default())],
            0,
            SUBNETWORK_ID_NATIVE,
            0,
            vec![],
        );
        let root = calc_hash_merkle_root([coinbase.clone(), spend.clone()].iter());
        let id_root = calc_accepted_id_merkle_root([coinbase.id(), spend.id()].into_iter());

        spend.inputs[0].signature_script = vec![2; 65];
        spend.finalize();
        assert_ne!(calc_hash_merkle_root([coinbase.clone(), spend.clone()].iter()), root);
        assert_eq!(calc_accepted_id_merkle_root([coinbase.id(), spend.id()].into_iter()), id_root);

        assert_eq!(calc_hash_merkle_root([coinbase.clone()].iter()), coinbase.hash());
    }
}
