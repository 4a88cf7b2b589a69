use crate::{
    errors::StoreResult,
    key::prefix_upper_bound,
    kv::{KvIterator, KvStore, MemoryKv, WriteBatch},
    transaction::DbTransaction,
};
use std::{fmt::Debug, path::PathBuf, sync::Arc};

pub use conn_builder::ConnBuilder;
pub use rocks::RocksKv;

mod conn_builder;
mod rocks;

/// The node database: a key-value engine behind the [`KvStore`] abstraction
pub struct DB {
    backend: Box<dyn KvStore>,
}

impl DB {
    pub fn new(backend: impl KvStore + 'static) -> Self {
        Self { backend: Box::new(backend) }
    }

    /// A fresh empty in-memory database
    pub fn new_memory() -> Arc<Self> {
        Arc::new(Self::new(MemoryKv::new()))
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> StoreResult<Option<Vec<u8>>> {
        self.backend.get(key.as_ref())
    }

    pub fn has(&self, key: impl AsRef<[u8]>) -> StoreResult<bool> {
        self.backend.has(key.as_ref())
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.backend.write(batch)
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.backend.write(batch)
    }

    pub fn write(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.backend.write(batch)
    }

    /// Iterates the full keys of `bucket`, optionally starting at the full key `seek_from`
    pub fn raw_iterator(&self, bucket: &[u8], seek_from: Option<&[u8]>) -> KvIterator<'_> {
        self.backend.iterator(bucket, seek_from)
    }

    /// Iterates the entries of `bucket` in key order. Keys are returned without the bucket prefix.
    /// `seek_from` is a bucket-relative key
    pub fn cursor<'a>(
        &'a self,
        bucket: &[u8],
        seek_from: Option<&[u8]>,
    ) -> impl Iterator<Item = StoreResult<(Box<[u8]>, Vec<u8>)>> + use<'a> {
        let seek = seek_from.map(|suffix| [bucket, suffix].concat());
        let prefix_len = bucket.len();
        self.backend
            .iterator(bucket, seek.as_deref())
            .map(move |item| item.map(|(key, value)| (key[prefix_len..].into(), value.into_vec())))
    }

    /// Deletes every key of `bucket` within `batch`
    pub fn delete_bucket(&self, batch: &mut WriteBatch, bucket: &[u8]) {
        match prefix_upper_bound(bucket) {
            Some(upper) => batch.delete_range(bucket, upper),
            None => {
                // No upper bound exists, so fall back to deleting key by key
                for (key, _) in self.backend.iterator(bucket, None).flatten() {
                    batch.delete(key);
                }
            }
        }
    }

    /// Starts a transaction which observes its own writes and applies them atomically on commit
    pub fn begin_transaction(&self) -> DbTransaction<'_> {
        DbTransaction::new(self)
    }
}

impl Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DB")
    }
}

/// Deletes an existing RocksDB directory if it exists
pub fn delete_db(db_dir: PathBuf) -> StoreResult<()> {
    if !db_dir.exists() {
        return Ok(());
    }
    let options = rocksdb::Options::default();
    rocksdb::DB::destroy(&options, &db_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_trims_bucket() {
        let db = DB::new_memory();
        db.put([5, 1, 0xaa], [1]).unwrap();
        db.put([5, 1, 0xbb], [2]).unwrap();
        db.put([5, 2, 0xaa], [3]).unwrap();
        let entries: Vec<_> = db.cursor(&[5, 1], None).map(|r| r.unwrap()).collect();
        assert_eq!(entries, vec![(vec![0xaa].into_boxed_slice(), vec![1]), (vec![0xbb].into_boxed_slice(), vec![2])]);
        let entries: Vec<_> = db.cursor(&[5, 1], Some(&[0xab][..])).map(|r| r.unwrap().0.to_vec()).collect();
        assert_eq!(entries, vec![vec![0xbb]]);

        let mut batch = WriteBatch::new();
        db.delete_bucket(&mut batch, &[5, 1]);
        db.write(batch).unwrap();
        assert_eq!(db.cursor(&[5], None).count(), 1);
        db.delete([5, 2, 0xaa]).unwrap();
        assert!(!db.has([5, 2, 0xaa]).unwrap());
    }
}
