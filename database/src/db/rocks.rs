use crate::{
    errors::StoreResult,
    kv::{BatchOp, KvIterator, KvStore, WriteBatch},
};
use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, ReadOptions};
use std::ops::Deref;

/// The RocksDB backend
pub struct RocksKv {
    inner: DBWithThreadMode<MultiThreaded>,
}

impl RocksKv {
    pub fn new(inner: DBWithThreadMode<MultiThreaded>) -> Self {
        Self { inner }
    }
}

impl Deref for RocksKv {
    type Target = DBWithThreadMode<MultiThreaded>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl KvStore for RocksKv {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.inner.get_pinned(key)?.map(|slice| slice.to_vec()))
    }

    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.inner.get_pinned(key)?.is_some())
    }

    fn write(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut rocks_batch = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => rocks_batch.put(key, value),
                BatchOp::Delete(key) => rocks_batch.delete(key),
                BatchOp::DeleteRange(from, to) => rocks_batch.delete_range(from, to),
            }
        }
        self.inner.write(rocks_batch)?;
        Ok(())
    }

    fn iterator(&self, prefix: &[u8], seek_from: Option<&[u8]>) -> KvIterator<'_> {
        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_range(rocksdb::PrefixRange(prefix.to_vec()));
        let mode = match seek_from {
            Some(seek_from) => IteratorMode::From(seek_from, Direction::Forward),
            None => IteratorMode::From(prefix, Direction::Forward),
        };
        Box::new(self.inner.iterator_opt(mode, read_opts).map(|item| item.map_err(Into::into)))
    }
}
