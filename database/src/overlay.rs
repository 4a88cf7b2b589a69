use crate::{
    errors::StoreResult,
    key::prefix_upper_bound,
    kv::{KvIterator, KvPair, WriteBatch, remove_range},
};
use std::collections::BTreeMap;

/// Deferred work to run once the overlay writes become durable, typically cache updates
pub type CommitCallback = Box<dyn FnOnce() + Send + Sync>;

/// Uncommitted writes layered on top of some base view. Point entries hold `None` for deletions.
/// Range deletions are tracked separately and always precede the point entries, which holds
/// because point entries inside a newly deleted range are dropped at that moment.
#[derive(Default)]
pub(crate) struct Overlay {
    entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    deleted_ranges: Vec<(Vec<u8>, Vec<u8>)>,
    callbacks: Vec<CommitCallback>,
}

/// The overlay's knowledge about a single key
pub(crate) enum Lookup<'a> {
    Written(&'a [u8]),
    Deleted,
    Untouched,
}

impl Overlay {
    pub fn lookup(&self, key: &[u8]) -> Lookup<'_> {
        match self.entries.get(key) {
            Some(Some(value)) => Lookup::Written(value),
            Some(None) => Lookup::Deleted,
            None if self.in_deleted_range(key) => Lookup::Deleted,
            None => Lookup::Untouched,
        }
    }

    fn in_deleted_range(&self, key: &[u8]) -> bool {
        self.deleted_ranges.iter().any(|(from, to)| from.as_slice() <= key && key < to.as_slice())
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.entries.insert(key, None);
    }

    pub fn delete_range(&mut self, from: Vec<u8>, to: Vec<u8>) {
        remove_range(&mut self.entries, &from, &to);
        self.deleted_ranges.push((from, to));
    }

    pub fn on_commit(&mut self, callback: CommitCallback) {
        self.callbacks.push(callback);
    }

    /// Layers `other` on top of `self`
    pub fn merge(&mut self, other: Overlay) {
        for (from, to) in other.deleted_ranges {
            self.delete_range(from, to);
        }
        self.entries.extend(other.entries);
        self.callbacks.extend(other.callbacks);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.deleted_ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.deleted_ranges.len()
    }

    pub fn into_parts(self) -> (WriteBatch, Vec<CommitCallback>) {
        let mut batch = WriteBatch::new();
        for (from, to) in self.deleted_ranges {
            batch.delete_range(from, to);
        }
        for (key, value) in self.entries {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        (batch, self.callbacks)
    }

    /// Merges the overlay into a base iteration over `prefix`. The result is materialized since
    /// both sides have to be interleaved in key order
    pub fn iterate_over<'a>(&self, base: KvIterator<'a>, prefix: &[u8], seek_from: Option<&[u8]>) -> KvIterator<'a> {
        let mut merged = BTreeMap::<Vec<u8>, Box<[u8]>>::new();
        for item in base {
            match item {
                Ok((key, value)) => {
                    if !self.in_deleted_range(&key) {
                        merged.insert(key.into_vec(), value);
                    }
                }
                Err(err) => return Box::new(std::iter::once(Err(err))),
            }
        }

        let start = match seek_from {
            Some(seek) if seek > prefix => seek.to_vec(),
            _ => prefix.to_vec(),
        };
        let upper = prefix_upper_bound(prefix);
        let in_range = |key: &[u8]| key >= start.as_slice() && upper.as_ref().is_none_or(|upper| key < upper.as_slice());
        for (key, value) in self.entries.iter().filter(|(key, _)| in_range(key)) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone().into_boxed_slice());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        let items: Vec<StoreResult<KvPair>> = merged.into_iter().map(|(key, value)| Ok((key.into_boxed_slice(), value))).collect();
        Box::new(items.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKv};

    #[test]
    fn test_range_delete_then_write() {
        let mut overlay = Overlay::default();
        overlay.put(vec![1, 1], vec![1]);
        overlay.delete_range(vec![1], vec![2]);
        overlay.put(vec![1, 2], vec![2]);
        assert!(matches!(overlay.lookup(&[1, 1]), Lookup::Deleted));
        assert!(matches!(overlay.lookup(&[1, 2]), Lookup::Written(&[2])));
        assert!(matches!(overlay.lookup(&[2]), Lookup::Untouched));

        let kv = MemoryKv::new();
        let mut seed = WriteBatch::new();
        seed.put([1, 0], [0]);
        seed.put([1, 9], [9]);
        kv.write(seed).unwrap();
        let (batch, _) = overlay.into_parts();
        kv.write(batch).unwrap();
        let keys: Vec<_> = kv.iterator(&[1], None).map(|r| r.unwrap().0.to_vec()).collect();
        assert_eq!(keys, vec![vec![1, 2]]);
    }

    #[test]
    fn test_iterate_over_base() {
        let kv = MemoryKv::new();
        let mut seed = WriteBatch::new();
        for k in 0..5u8 {
            seed.put([3, k], [k]);
        }
        kv.write(seed).unwrap();

        let mut overlay = Overlay::default();
        overlay.delete(vec![3, 1]);
        overlay.put(vec![3, 7], vec![7]);
        overlay.put(vec![4, 0], vec![0]);
        let keys: Vec<_> =
            overlay.iterate_over(kv.iterator(&[3], None), &[3], None).map(|r| r.unwrap().0.to_vec()).collect();
        assert_eq!(keys, vec![vec![3, 0], vec![3, 2], vec![3, 3], vec![3, 4], vec![3, 7]]);

        let keys: Vec<_> = overlay
            .iterate_over(kv.iterator(&[3], Some(&[3, 3][..])), &[3], Some(&[3, 3][..]))
            .map(|r| r.unwrap().0.to_vec())
            .collect();
        assert_eq!(keys, vec![vec![3, 3], vec![3, 4], vec![3, 7]]);
    }
}
