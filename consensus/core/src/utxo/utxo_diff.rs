use super::{
    utxo_collection::*,
    utxo_error::{UtxoAlgebraError, UtxoResult},
};
use crate::tx::{TransactionOutpoint, UtxoEntry, VerifiableTransaction};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;

pub trait ImmutableUtxoDiff {
    fn added(&self) -> &UtxoCollection;
    fn removed(&self) -> &UtxoCollection;
}

/// The difference between two UTXO sets. An outpoint may appear in both collections only
/// with entries of different DAA scores, meaning the base entry was spent and the outpoint
/// was recreated by a later acceptance of the same transaction.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoDiff {
    pub add: UtxoCollection,
    pub remove: UtxoCollection,
}

impl<T: ImmutableUtxoDiff> ImmutableUtxoDiff for &T {
    fn added(&self) -> &UtxoCollection {
        (*self).added()
    }
    fn removed(&self) -> &UtxoCollection {
        (*self).removed()
    }
}

impl ImmutableUtxoDiff for UtxoDiff {
    fn added(&self) -> &UtxoCollection {
        &self.add
    }

    fn removed(&self) -> &UtxoCollection {
        &self.remove
    }
}

/// A borrowed diff with add and remove swapped
pub struct ReversedUtxoDiff<'a> {
    inner: &'a UtxoDiff,
}

impl<'a> ReversedUtxoDiff<'a> {
    pub fn new(inner: &'a UtxoDiff) -> Self {
        Self { inner }
    }
}

impl ImmutableUtxoDiff for ReversedUtxoDiff<'_> {
    fn added(&self) -> &UtxoCollection {
        &self.inner.remove
    }

    fn removed(&self) -> &UtxoCollection {
        &self.inner.add
    }
}

impl UtxoDiff {
    pub fn new(add: UtxoCollection, remove: UtxoCollection) -> Self {
        Self { add, remove }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    pub fn as_reversed(&self) -> ReversedUtxoDiff<'_> {
        ReversedUtxoDiff::new(self)
    }

    /// Returns the inverse diff, i.e., the diff leading from the target set back to the base set
    pub fn to_reversed(self) -> Self {
        Self::new(self.remove, self.add)
    }

    pub fn inverted(&self) -> Self {
        self.clone().to_reversed()
    }

    pub fn with_diff(&self, other: &impl ImmutableUtxoDiff) -> UtxoResult<UtxoDiff> {
        let mut clone = self.clone();
        clone.with_diff_in_place(other)?;
        Ok(clone)
    }

    /// Composes `other` on top of this diff in-place. The result is equal to applying this
    /// diff and then `other` to the same base UTXO set. Removals of `other` are processed
    /// before its additions, matching the meaning of an outpoint present in both collections.
    pub fn with_diff_in_place(&mut self, other: &impl ImmutableUtxoDiff) -> UtxoResult<()> {
        for (outpoint, entry) in other.removed() {
            match self.add.get(outpoint) {
                Some(added) if added.block_daa_score == entry.block_daa_score => {
                    self.add.remove(outpoint);
                }
                Some(_) => return Err(UtxoAlgebraError::MismatchingRemovePoint(*outpoint)),
                None => match self.remove.entry(*outpoint) {
                    Entry::Occupied(_) => return Err(UtxoAlgebraError::DuplicateRemovePoint(*outpoint)),
                    Entry::Vacant(e) => {
                        e.insert(entry.clone());
                    }
                },
            }
        }

        for (outpoint, entry) in other.added() {
            if self.add.contains_key(outpoint) {
                return Err(UtxoAlgebraError::DuplicateAddPoint(*outpoint));
            }
            if self.remove.contains_with_daa_score(outpoint, entry.block_daa_score) {
                self.remove.remove(outpoint);
            } else {
                self.add.insert(*outpoint, entry.clone());
            }
        }

        Ok(())
    }

    /// Adds the effect of `transaction` being accepted with `block_daa_score` to this diff
    pub fn add_transaction(&mut self, transaction: &impl VerifiableTransaction, block_daa_score: u64) -> UtxoResult<()> {
        for (input, entry) in transaction.populated_inputs() {
            self.remove_entry(&input.previous_outpoint, entry)?;
        }

        let is_coinbase = transaction.is_coinbase();
        let tx_id = transaction.id();

        for (i, output) in transaction.outputs().iter().enumerate() {
            let outpoint = TransactionOutpoint::new(tx_id, i as u32);
            let entry = UtxoEntry::new(output.value, output.script_public_key.clone(), block_daa_score, is_coinbase);
            self.add_entry(outpoint, entry)?;
        }
        Ok(())
    }

    fn remove_entry(&mut self, outpoint: &TransactionOutpoint, entry: &UtxoEntry) -> UtxoResult<()> {
        if self.add.contains_with_daa_score(outpoint, entry.block_daa_score) {
            self.add.remove(outpoint);
        } else if let Entry::Vacant(e) = self.remove.entry(*outpoint) {
            e.insert(entry.clone());
        } else {
            return Err(UtxoAlgebraError::DoubleRemoveCall(*outpoint));
        }
        Ok(())
    }

    fn add_entry(&mut self, outpoint: TransactionOutpoint, entry: UtxoEntry) -> UtxoResult<()> {
        if self.remove.contains_with_daa_score(&outpoint, entry.block_daa_score) {
            self.remove.remove(&outpoint);
        } else if let Entry::Vacant(e) = self.add.entry(outpoint) {
            e.insert(entry);
        } else {
            return Err(UtxoAlgebraError::DoubleAddCall(outpoint));
        }
        Ok(())
    }
}

/// Applies `diff` to a fully materialized UTXO set
pub fn apply_diff_to_collection(set: &mut UtxoCollection, diff: &impl ImmutableUtxoDiff) -> UtxoResult<()> {
    for outpoint in diff.removed().keys() {
        if set.remove(outpoint).is_none() {
            return Err(UtxoAlgebraError::MissingOutpoint(*outpoint));
        }
    }
    set.add_many(diff.added());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{PopulatedTransaction, ScriptPublicKey, Transaction, TransactionInput, TransactionOutput};
    use crate::subnets::SUBNETWORK_ID_NATIVE;
    use kestrel_hashes::Hash;

    fn outpoint(i: u64) -> TransactionOutpoint {
        TransactionOutpoint::new(Hash::from_u64_word(i), 0)
    }

    fn entry(amount: u64, daa_score: u64) -> UtxoEntry {
        UtxoEntry::new(amount, ScriptPublicKey::default(), daa_score, false)
    }

    struct DiffBuilder(UtxoDiff);

    impl DiffBuilder {
        fn new() -> Self {
            Self(UtxoDiff::default())
        }

        fn add(mut self, outpoint: TransactionOutpoint, entry: UtxoEntry) -> Self {
            assert!(self.0.add.insert(outpoint, entry).is_none());
            self
        }

        fn remove(mut self, outpoint: TransactionOutpoint, entry: UtxoEntry) -> Self {
            assert!(self.0.remove.insert(outpoint, entry).is_none());
            self
        }

        fn build(self) -> UtxoDiff {
            self.0
        }
    }

    #[test]
    fn test_with_diff_rules() {
        let op = outpoint(0);
        let e1 = entry(10, 0);
        let e2 = entry(20, 1);

        struct Test {
            name: &'static str,
            this: UtxoDiff,
            other: UtxoDiff,
            expected: UtxoResult<UtxoDiff>,
        }

        let tests = [
            Test {
                name: "add in this, same add in other",
                this: DiffBuilder::new().add(op, e1.clone()).build(),
                other: DiffBuilder::new().add(op, e1.clone()).build(),
                expected: Err(UtxoAlgebraError::DuplicateAddPoint(op)),
            },
            Test {
                name: "add in this, remove in other",
                this: DiffBuilder::new().add(op, e1.clone()).build(),
                other: DiffBuilder::new().remove(op, e1.clone()).build(),
                expected: Ok(UtxoDiff::default()),
            },
            Test {
                name: "add in this, remove of a different entry in other",
                this: DiffBuilder::new().add(op, e1.clone()).build(),
                other: DiffBuilder::new().remove(op, e2.clone()).build(),
                expected: Err(UtxoAlgebraError::MismatchingRemovePoint(op)),
            },
            Test {
                name: "add in this, remove and re-add in other",
                this: DiffBuilder::new().add(op, e1.clone()).build(),
                other: DiffBuilder::new().remove(op, e1.clone()).add(op, e2.clone()).build(),
                expected: Ok(DiffBuilder::new().add(op, e2.clone()).build()),
            },
            Test {
                name: "remove in this, same add in other",
                this: DiffBuilder::new().remove(op, e1.clone()).build(),
                other: DiffBuilder::new().add(op, e1.clone()).build(),
                expected: Ok(UtxoDiff::default()),
            },
            Test {
                name: "remove in this, different add in other",
                this: DiffBuilder::new().remove(op, e1.clone()).build(),
                other: DiffBuilder::new().add(op, e2.clone()).build(),
                expected: Ok(DiffBuilder::new().remove(op, e1.clone()).add(op, e2.clone()).build()),
            },
            Test {
                name: "remove in this, remove in other",
                this: DiffBuilder::new().remove(op, e1.clone()).build(),
                other: DiffBuilder::new().remove(op, e1.clone()).build(),
                expected: Err(UtxoAlgebraError::DuplicateRemovePoint(op)),
            },
            Test {
                name: "remove and re-add in this, remove of the new entry in other",
                this: DiffBuilder::new().remove(op, e1.clone()).add(op, e2.clone()).build(),
                other: DiffBuilder::new().remove(op, e2.clone()).build(),
                expected: Ok(DiffBuilder::new().remove(op, e1.clone()).build()),
            },
            Test {
                name: "empty this, empty other",
                this: UtxoDiff::default(),
                other: UtxoDiff::default(),
                expected: Ok(UtxoDiff::default()),
            },
        ];

        for test in tests {
            assert_eq!(test.this.with_diff(&test.other), test.expected, "with_diff failed for test \"{}\"", test.name);
        }
    }

    #[test]
    fn test_inverse_laws() {
        let diffs = [
            DiffBuilder::new().add(outpoint(1), entry(1, 1)).remove(outpoint(2), entry(2, 2)).build(),
            DiffBuilder::new().remove(outpoint(3), entry(3, 3)).add(outpoint(3), entry(3, 4)).build(),
            UtxoDiff::default(),
        ];
        for diff in diffs {
            assert_eq!(diff.inverted().inverted(), diff);
            assert!(diff.with_diff(&diff.inverted()).unwrap().is_empty());
            assert!(diff.with_diff(&diff.as_reversed()).unwrap().is_empty());
        }
    }

    #[test]
    fn test_add_transaction_and_apply() {
        let spent = outpoint(7);
        let mut set: UtxoCollection = [(spent, entry(100, 3))].into_iter().collect();

        let tx = Transaction::new(
            0,
            vec![TransactionInput::new(spent, vec![], 0, 0)],
            vec![TransactionOutput::new(60, ScriptPublicKey::default()), TransactionOutput::new(30, ScriptPublicKey::default())],
            0,
            SUBNETWORK_ID_NATIVE,
            0,
            vec![],
        );
        let populated = PopulatedTransaction::new(&tx, vec![entry(100, 3)]);

        let mut diff = UtxoDiff::default();
        diff.add_transaction(&populated, 10).unwrap();
        assert_eq!(diff.remove.len(), 1);
        assert_eq!(diff.add.len(), 2);
        assert!(diff.add.values().all(|e| e.block_daa_score == 10));

        apply_diff_to_collection(&mut set, &diff).unwrap();
        assert!(!set.contains_key(&spent));
        assert_eq!(set.values().map(|e| e.amount).sum::<u64>(), 90);

        // Spending the same outpoint twice within a single diff is rejected
        assert_eq!(diff.add_transaction(&populated, 10), Err(UtxoAlgebraError::DoubleRemoveCall(spent)));

        // Applying the reversed diff restores the original set
        apply_diff_to_collection(&mut set, &diff.as_reversed()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&spent), Some(&entry(100, 3)));
    }
}
