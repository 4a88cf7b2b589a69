use crate::{db::DB, errors::StoreResult, kv::WriteBatch};
use std::sync::Arc;

/// Abstraction over direct, batched, transactional and staged DB writing
pub trait DbWriter {
    const IS_BATCH: bool;

    fn put<K, V>(&mut self, key: K, value: V) -> StoreResult<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>;
    fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> StoreResult<()>;
    fn delete_range<K: AsRef<[u8]>>(&mut self, from: K, to: K) -> StoreResult<()>;

    /// Registers work to run once the written data is durable. Writers which write through
    /// immediately run it right away
    fn on_commit(&mut self, callback: impl FnOnce() + Send + Sync + 'static) {
        callback()
    }
}

enum DbRef<'a> {
    Borrowed(&'a DB),
    Owned(Arc<DB>),
}

impl DbRef<'_> {
    fn db(&self) -> &DB {
        match self {
            DbRef::Borrowed(db) => *db,
            DbRef::Owned(db) => db.as_ref(),
        }
    }
}

pub struct DirectDbWriter<'a> {
    db: DbRef<'a>,
}

impl<'a> DirectDbWriter<'a> {
    pub fn new(db: &'a DB) -> Self {
        Self { db: DbRef::Borrowed(db) }
    }

    pub fn from_arc(db: Arc<DB>) -> Self {
        Self { db: DbRef::Owned(db) }
    }
}

impl DbWriter for DirectDbWriter<'_> {
    const IS_BATCH: bool = false;

    fn put<K, V>(&mut self, key: K, value: V) -> StoreResult<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.db.db().put(key, value)
    }

    fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> StoreResult<()> {
        self.db.db().delete(key)
    }

    fn delete_range<K: AsRef<[u8]>>(&mut self, from: K, to: K) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete_range(from, to);
        self.db.db().write(batch)
    }
}

/// Collects writes into a plain batch. The caller is responsible for writing the batch,
/// and commit callbacks run eagerly, so this writer is meant for data without cached state
pub struct BatchDbWriter<'a> {
    batch: &'a mut WriteBatch,
}

impl<'a> BatchDbWriter<'a> {
    pub fn new(batch: &'a mut WriteBatch) -> Self {
        Self { batch }
    }
}

impl DbWriter for BatchDbWriter<'_> {
    const IS_BATCH: bool = true;

    fn put<K, V>(&mut self, key: K, value: V) -> StoreResult<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.batch.put(key, value);
        Ok(())
    }

    fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> StoreResult<()> {
        self.batch.delete(key);
        Ok(())
    }

    fn delete_range<K: AsRef<[u8]>>(&mut self, from: K, to: K) -> StoreResult<()> {
        self.batch.delete_range(from, to);
        Ok(())
    }
}

impl<T: DbWriter> DbWriter for &mut T {
    const IS_BATCH: bool = T::IS_BATCH;

    #[inline]
    fn put<K, V>(&mut self, key: K, value: V) -> StoreResult<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        (*self).put(key, value)
    }

    #[inline]
    fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> StoreResult<()> {
        (*self).delete(key)
    }

    #[inline]
    fn delete_range<K: AsRef<[u8]>>(&mut self, from: K, to: K) -> StoreResult<()> {
        (*self).delete_range(from, to)
    }

    #[inline]
    fn on_commit(&mut self, callback: impl FnOnce() + Send + Sync + 'static) {
        (*self).on_commit(callback)
    }
}
