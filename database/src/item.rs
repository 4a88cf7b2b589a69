use crate::{db::DB, errors::StoreError, staging::StagingArea};

use super::prelude::{DbKey, DbWriter};
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

/// A cached DB item with concurrency support
pub struct CachedDbItem<T> {
    db: Arc<DB>,
    key: Vec<u8>,
    cached_item: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for CachedDbItem<T> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), key: self.key.clone(), cached_item: self.cached_item.clone() }
    }
}

impl<T> CachedDbItem<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(db: Arc<DB>, key: Vec<u8>) -> Self {
        Self { db, key, cached_item: Arc::new(RwLock::new(None)) }
    }

    pub fn read(&self) -> Result<T, StoreError>
    where
        T: DeserializeOwned,
    {
        if let Some(item) = self.cached_item.read().clone() {
            return Ok(item);
        }
        if let Some(bytes) = self.db.get(&self.key)? {
            let item: T = bincode::deserialize(&bytes)?;
            *self.cached_item.write() = Some(item.clone());
            Ok(item)
        } else {
            Err(StoreError::KeyNotFound(DbKey::prefix_only(&self.key)))
        }
    }

    /// Reads the item as seen through `area`
    pub fn read_staged(&self, area: &StagingArea) -> Result<T, StoreError>
    where
        T: DeserializeOwned,
    {
        match area.lookup(&self.key) {
            Some(Some(bytes)) => Ok(bincode::deserialize(&bytes)?),
            Some(None) => Err(StoreError::KeyNotFound(DbKey::prefix_only(&self.key))),
            None => self.read(),
        }
    }

    pub fn write(&mut self, mut writer: impl DbWriter, item: &T) -> Result<(), StoreError>
    where
        T: Serialize,
    {
        let bin_data = bincode::serialize(item)?;
        writer.put(&self.key, bin_data)?;
        let cached_item = self.cached_item.clone();
        let item = item.clone();
        writer.on_commit(move || *cached_item.write() = Some(item));
        Ok(())
    }

    pub fn remove(&mut self, mut writer: impl DbWriter) -> Result<(), StoreError> {
        writer.delete(&self.key)?;
        let cached_item = self.cached_item.clone();
        writer.on_commit(move || *cached_item.write() = None);
        Ok(())
    }

    /// Applies `op` to the current item (as seen through `area` when given) and writes the result
    pub fn update<F>(&mut self, writer: impl DbWriter, area: Option<&StagingArea>, op: F) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(T) -> T,
    {
        let item = match area {
            Some(area) => self.read_staged(area)?,
            None => self.read()?,
        };
        let item = op(item);
        self.write(writer, &item)?;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::DirectDbWriter;

    #[test]
    fn test_item_update_through_staging() {
        let db = DB::new_memory();
        let mut item = CachedDbItem::<u64>::new(db.clone(), vec![42]);
        assert!(item.read().unwrap_err().is_key_not_found());
        item.write(DirectDbWriter::new(&db), &5).unwrap();

        let area = StagingArea::new();
        let updated = item.update(&area, Some(&area), |x| x + 1).unwrap();
        assert_eq!(updated, 6);
        assert_eq!(item.read_staged(&area).unwrap(), 6);
        assert_eq!(item.read().unwrap(), 5);
        area.commit_to_db(&db).unwrap();
        assert_eq!(item.read().unwrap(), 6);
    }
}
