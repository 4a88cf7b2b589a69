use super::utxo_diff::ImmutableUtxoDiff;
use crate::tx::*;

/// A read-only view of a UTXO set. Views are composable, and the entries are returned by
/// value so that views may be backed by persistent stores
pub trait UtxoView {
    fn get(&self, outpoint: &TransactionOutpoint) -> Option<UtxoEntry>;
}

impl<V: UtxoView> UtxoView for &V {
    fn get(&self, outpoint: &TransactionOutpoint) -> Option<UtxoEntry> {
        (*self).get(outpoint)
    }
}

impl UtxoView for super::utxo_collection::UtxoCollection {
    fn get(&self, outpoint: &TransactionOutpoint) -> Option<UtxoEntry> {
        std::collections::HashMap::get(self, outpoint).cloned()
    }
}

/// A view of `base` with `diff` applied on top of it
pub struct ComposedUtxoView<V: UtxoView, D: ImmutableUtxoDiff> {
    base: V,
    diff: D,
}

impl<V: UtxoView, D: ImmutableUtxoDiff> ComposedUtxoView<V, D> {
    pub fn new(base: V, diff: D) -> Self {
        Self { base, diff }
    }
}

impl<V: UtxoView, D: ImmutableUtxoDiff> UtxoView for ComposedUtxoView<V, D> {
    fn get(&self, outpoint: &TransactionOutpoint) -> Option<UtxoEntry> {
        if let Some(entry) = self.diff.added().get(outpoint) {
            return Some(entry.clone());
        }
        if self.diff.removed().contains_key(outpoint) {
            return None;
        }
        self.base.get(outpoint)
    }
}

pub fn compose_one_diff_layer<V: UtxoView, D: ImmutableUtxoDiff>(base: V, diff: D) -> ComposedUtxoView<V, D> {
    ComposedUtxoView::new(base, diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utxo::{utxo_collection::UtxoCollection, utxo_diff::UtxoDiff};
    use kestrel_hashes::Hash;

    #[test]
    fn test_composed_view_precedence() {
        let entry = |daa| UtxoEntry::new(1, ScriptPublicKey::default(), daa, false);
        let op = |i| TransactionOutpoint::new(Hash::from_u64_word(i), 0);

        let base: UtxoCollection = [(op(1), entry(1)), (op(2), entry(2))].into_iter().collect();
        let mut diff = UtxoDiff::default();
        diff.remove.insert(op(1), entry(1));
        diff.remove.insert(op(2), entry(2));
        diff.add.insert(op(2), entry(20));
        diff.add.insert(op(3), entry(3));

        let view = compose_one_diff_layer(&base, &diff);
        assert_eq!(view.get(&op(1)), None);
        assert_eq!(view.get(&op(2)), Some(entry(20)));
        assert_eq!(view.get(&op(3)), Some(entry(3)));
        assert_eq!(view.get(&op(4)), None);
    }
}
