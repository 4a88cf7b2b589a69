use crate::{
    db::DB,
    errors::{StoreError, StoreResult},
    key::{DbKey, prefix_upper_bound},
    staging::StagingArea,
};

use super::prelude::{Cache, DbWriter};
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::hash_map::RandomState, hash::BuildHasher, sync::Arc};

/// A concurrent DB store access with typed caching.
///
/// Cache updates are registered as commit callbacks on the writer, so writes staged in a
/// [`StagingArea`] or a transaction only reach the cache once they are durable.
pub struct CachedDbAccess<TKey, TData, S = RandomState>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
{
    db: Arc<DB>,

    // Cache
    cache: Cache<TKey, TData, S>,

    // DB bucket/path
    prefix: Vec<u8>,
}

impl<TKey, TData, S> Clone for CachedDbAccess<TKey, TData, S>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
{
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), cache: self.cache.clone(), prefix: self.prefix.clone() }
    }
}

pub type KeyDataResult<TData> = StoreResult<(Box<[u8]>, TData)>;

impl<TKey, TData, S> CachedDbAccess<TKey, TData, S>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync + 'static,
    TData: Clone + Send + Sync + 'static,
    S: BuildHasher + Default + Send + Sync + 'static,
{
    pub fn new(db: Arc<DB>, cache_size: u64, prefix: Vec<u8>) -> Self {
        Self { db, cache: Cache::new(cache_size), prefix }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn read_from_cache(&self, key: TKey) -> Option<TData> {
        self.cache.get(&key)
    }

    pub fn has(&self, key: TKey) -> StoreResult<bool>
    where
        TKey: AsRef<[u8]>,
    {
        Ok(self.cache.contains_key(&key) || self.db.has(DbKey::new(&self.prefix, key))?)
    }

    pub fn read(&self, key: TKey) -> StoreResult<TData>
    where
        TKey: AsRef<[u8]>,
        TData: DeserializeOwned,
    {
        if let Some(data) = self.cache.get(&key) {
            return Ok(data);
        }
        let db_key = DbKey::new(&self.prefix, key.clone());
        match self.db.get(&db_key)? {
            Some(bytes) => {
                let data: TData = bincode::deserialize(&bytes)?;
                self.cache.insert(key, data.clone());
                Ok(data)
            }
            None => Err(StoreError::KeyNotFound(db_key)),
        }
    }

    /// Checks existence as seen through `area`
    pub fn has_staged(&self, area: &StagingArea, key: TKey) -> StoreResult<bool>
    where
        TKey: AsRef<[u8]>,
    {
        match area.lookup(DbKey::new(&self.prefix, key.clone()).as_ref()) {
            Some(staged) => Ok(staged.is_some()),
            None => self.has(key),
        }
    }

    /// Reads the value as seen through `area`. Staged values are never cached
    pub fn read_staged(&self, area: &StagingArea, key: TKey) -> StoreResult<TData>
    where
        TKey: AsRef<[u8]>,
        TData: DeserializeOwned,
    {
        let db_key = DbKey::new(&self.prefix, key.clone());
        match area.lookup(db_key.as_ref()) {
            Some(Some(bytes)) => Ok(bincode::deserialize(&bytes)?),
            Some(None) => Err(StoreError::KeyNotFound(db_key)),
            None => self.read(key),
        }
    }

    /// Iterates all entries of the store. Keys are returned without the store prefix
    pub fn iterator(&self) -> impl Iterator<Item = KeyDataResult<TData>> + '_
    where
        TData: DeserializeOwned,
    {
        self.db.cursor(&self.prefix, None).map(|item| -> KeyDataResult<TData> {
            let (key, bytes) = item?;
            Ok((key, bincode::deserialize(&bytes)?))
        })
    }

    /// Iterates all entries of the store as seen through `area`
    pub fn iterator_staged(&self, area: &StagingArea) -> Vec<KeyDataResult<TData>>
    where
        TData: DeserializeOwned,
    {
        area.cursor(&self.db, &self.prefix, None)
            .into_iter()
            .map(|item| -> KeyDataResult<TData> {
                let (key, bytes) = item?;
                Ok((key, bincode::deserialize(&bytes)?))
            })
            .collect()
    }

    /// A dynamic iterator over a sub-bucket of the store (or all of it), optionally starting at
    /// a given key and skipping it
    pub fn seek_iterator(
        &self,
        bucket: Option<&[u8]>,
        seek_from: Option<TKey>,
        limit: usize,
        skip_first: bool,
    ) -> impl Iterator<Item = KeyDataResult<TData>> + '_
    where
        TKey: AsRef<[u8]>,
        TData: DeserializeOwned,
    {
        let mut db_key = DbKey::prefix_only(&self.prefix);
        if let Some(bucket) = bucket {
            db_key.add_bucket(bucket);
        }
        let seek_key = seek_from.map(|key| DbKey::new(&self.prefix, key));
        let prefix_len = self.prefix.len();
        let mut db_iterator = self.db.raw_iterator(db_key.as_ref(), seek_key.as_ref().map(|key| key.as_ref()));
        if skip_first {
            db_iterator.next();
        }
        db_iterator.take(limit).map(move |item| -> KeyDataResult<TData> {
            let (key, bytes) = item?;
            Ok((key[prefix_len..].into(), bincode::deserialize(&bytes)?))
        })
    }

    pub fn write(&self, mut writer: impl DbWriter, key: TKey, data: TData) -> StoreResult<()>
    where
        TKey: AsRef<[u8]>,
        TData: Serialize,
    {
        let bin_data = bincode::serialize(&data)?;
        writer.put(DbKey::new(&self.prefix, key.clone()), bin_data)?;
        let cache = self.cache.clone();
        writer.on_commit(move || cache.insert(key, data));
        Ok(())
    }

    pub fn write_many(&self, mut writer: impl DbWriter, iter: impl IntoIterator<Item = (TKey, TData)>) -> StoreResult<()>
    where
        TKey: AsRef<[u8]>,
        TData: Serialize,
    {
        let mut written = Vec::new();
        for (key, data) in iter {
            let bin_data = bincode::serialize(&data)?;
            writer.put(DbKey::new(&self.prefix, key.clone()), bin_data)?;
            written.push((key, data));
        }
        let cache = self.cache.clone();
        writer.on_commit(move || cache.insert_many(written));
        Ok(())
    }

    /// Writes without caching any of the data. This also clears the cache on commit
    pub fn write_many_without_cache(&self, mut writer: impl DbWriter, iter: impl IntoIterator<Item = (TKey, TData)>) -> StoreResult<()>
    where
        TKey: AsRef<[u8]>,
        TData: Serialize,
    {
        for (key, data) in iter {
            let bin_data = bincode::serialize(&data)?;
            writer.put(DbKey::new(&self.prefix, key), bin_data)?;
        }
        let cache = self.cache.clone();
        writer.on_commit(move || cache.remove_all());
        Ok(())
    }

    pub fn delete(&self, mut writer: impl DbWriter, key: TKey) -> StoreResult<()>
    where
        TKey: AsRef<[u8]>,
    {
        writer.delete(DbKey::new(&self.prefix, key.clone()))?;
        let cache = self.cache.clone();
        writer.on_commit(move || {
            cache.remove(&key);
        });
        Ok(())
    }

    pub fn delete_many(&self, mut writer: impl DbWriter, keys: impl IntoIterator<Item = TKey>) -> StoreResult<()>
    where
        TKey: AsRef<[u8]>,
    {
        let mut deleted = Vec::new();
        for key in keys {
            writer.delete(DbKey::new(&self.prefix, key.clone()))?;
            deleted.push(key);
        }
        let cache = self.cache.clone();
        writer.on_commit(move || cache.remove_many(deleted));
        Ok(())
    }

    /// Deletes all entries in the store with a single range deletion
    pub fn delete_all(&self, mut writer: impl DbWriter) -> StoreResult<()> {
        let Some(upper) = prefix_upper_bound(&self.prefix) else {
            return Err(StoreError::DataInconsistency(format!("store prefix {} has no upper bound", DbKey::prefix_only(&self.prefix))));
        };
        writer.delete_range(self.prefix.clone(), upper)?;
        let cache = self.cache.clone();
        writer.on_commit(move || cache.remove_all());
        Ok(())
    }
}
