use crate::{errors::StoreResult, key::prefix_upper_bound};
use parking_lot::RwLock;
use std::{collections::BTreeMap, ops::Bound};

/// A single raw (key, value) pair as yielded by backend iteration
pub type KvPair = (Box<[u8]>, Box<[u8]>);

/// Iteration over a key range, in lexicographic key order
pub type KvIterator<'a> = Box<dyn Iterator<Item = StoreResult<KvPair>> + 'a>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
    /// Deletes every key in `[from, to)`
    DeleteRange(Vec<u8>, Vec<u8>),
}

/// An ordered list of writes applied atomically by a backend
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.ops.push(BatchOp::Put(key.as_ref().to_vec(), value.as_ref().to_vec()));
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        self.ops.push(BatchOp::Delete(key.as_ref().to_vec()));
    }

    pub fn delete_range(&mut self, from: impl AsRef<[u8]>, to: impl AsRef<[u8]>) {
        self.ops.push(BatchOp::DeleteRange(from.as_ref().to_vec(), to.as_ref().to_vec()));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// The key-value engine underneath all stores. Keys are ordered lexicographically.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Applies all the batch operations atomically and in order
    fn write(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Iterates all keys starting with `prefix`, optionally starting at `seek_from` (inclusive).
    /// Returned keys are full keys
    fn iterator(&self, prefix: &[u8], seek_from: Option<&[u8]>) -> KvIterator<'_>;
}

/// An in-memory backend, used by tests and by ephemeral nodes
#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

pub(crate) fn remove_range(map: &mut BTreeMap<Vec<u8>, impl Sized>, from: &[u8], to: &[u8]) {
    if from >= to {
        return;
    }
    let keys: Vec<Vec<u8>> =
        map.range::<[u8], _>((Bound::Included(from), Bound::Excluded(to))).map(|(key, _)| key.clone()).collect();
    for key in keys {
        map.remove(&key);
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.map.read().contains_key(key))
    }

    fn write(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut map = self.map.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
                BatchOp::DeleteRange(from, to) => remove_range(&mut map, &from, &to),
            }
        }
        Ok(())
    }

    fn iterator(&self, prefix: &[u8], seek_from: Option<&[u8]>) -> KvIterator<'_> {
        let start = match seek_from {
            Some(seek) if seek > prefix => seek,
            _ => prefix,
        };
        let upper = prefix_upper_bound(prefix);
        let upper_bound = match &upper {
            Some(upper) if start >= upper.as_slice() => return Box::new(std::iter::empty()),
            Some(upper) => Bound::Excluded(upper.as_slice()),
            None => Bound::Unbounded,
        };
        // Snapshot the range so the lock is not held by the caller
        let items: Vec<StoreResult<KvPair>> = self
            .map
            .read()
            .range::<[u8], _>((Bound::Included(start), upper_bound))
            .map(|(key, value)| Ok((key.clone().into_boxed_slice(), value.clone().into_boxed_slice())))
            .collect();
        Box::new(items.into_iter())
    }
}
