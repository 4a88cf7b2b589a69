use crate::tx::*;
use std::collections::HashMap;

pub type UtxoCollection = HashMap<TransactionOutpoint, UtxoEntry>;

pub trait UtxoCollectionExtensions {
    /// Checks if the `outpoint` key exists with an entry that holds `entry.block_daa_score == daa_score`
    fn contains_with_daa_score(&self, outpoint: &TransactionOutpoint, daa_score: u64) -> bool;

    /// Adds all entries from `other` to `self`, overriding existing values
    fn add_many(&mut self, other: &Self);

    /// Removes all keys of `other` from `self`
    fn remove_many(&mut self, other: &Self);

    /// Returns whether the intersection between the two collections is not empty.
    fn intersects(&self, other: &Self) -> bool;
}

impl UtxoCollectionExtensions for UtxoCollection {
    fn contains_with_daa_score(&self, outpoint: &TransactionOutpoint, daa_score: u64) -> bool {
        self.get(outpoint).is_some_and(|entry| entry.block_daa_score == daa_score)
    }

    fn add_many(&mut self, other: &Self) {
        for (k, v) in other.iter() {
            self.insert(*k, v.clone());
        }
    }

    fn remove_many(&mut self, other: &Self) {
        for k in other.keys() {
            self.remove(k);
        }
    }

    fn intersects(&self, other: &Self) -> bool {
        // Iterate the smaller set
        let (keys, other) = if self.len() <= other.len() { (self.keys(), other) } else { (other.keys(), self) };
        keys.into_iter().any(|k| other.contains_key(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_hashes::Hash;

    #[test]
    fn test_collection_extensions() {
        let entry = |daa| UtxoEntry::new(5, ScriptPublicKey::default(), daa, false);
        let op = |i| TransactionOutpoint::new(Hash::from_u64_word(i), 0);

        let mut a: UtxoCollection = [(op(1), entry(765)), (op(2), entry(1))].into_iter().collect();
        let b: UtxoCollection = [(op(2), entry(2)), (op(3), entry(3))].into_iter().collect();

        assert!(a.contains_with_daa_score(&op(1), 765));
        assert!(!a.contains_with_daa_score(&op(1), 764));
        assert!(a.intersects(&b));

        a.add_many(&b);
        assert_eq!(a.len(), 3);
        assert!(a.contains_with_daa_score(&op(2), 2));

        a.remove_many(&b);
        assert_eq!(a.len(), 1);
        assert!(!a.intersects(&b));
    }
}
