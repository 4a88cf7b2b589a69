use crate::processes::reachability::interval::Interval;
use kestrel_consensus_core::{
    BlockHashMap, BlockHasher, HashMapCustomHasher,
    blockhash::{self, BlockHashes},
};
use kestrel_database::{
    prelude::{CachedDbAccess, CachedDbItem, DB, DbKey, StagingArea, StoreError},
    registry::DatabaseStorePrefixes,
};
use kestrel_hashes::Hash;

use serde::{Deserialize, Serialize};
use std::{collections::hash_map::Entry::Vacant, sync::Arc};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReachabilityData {
    pub children: BlockHashes,
    pub parent: Hash,
    pub interval: Interval,
    pub height: u64,
    pub future_covering_set: BlockHashes,
}

impl ReachabilityData {
    pub fn new(parent: Hash, interval: Interval, height: u64) -> Self {
        Self { children: Arc::new(vec![]), parent, interval, height, future_covering_set: Arc::new(vec![]) }
    }
}

/// Reader API for `ReachabilityStore`.
pub trait ReachabilityStoreReader {
    fn has(&self, hash: Hash) -> Result<bool, StoreError>;
    fn get_interval(&self, hash: Hash) -> Result<Interval, StoreError>;
    /// Returns the reachability *tree* parent of `hash`
    fn get_parent(&self, hash: Hash) -> Result<Hash, StoreError>;
    /// Returns the reachability *tree* children of `hash`
    fn get_children(&self, hash: Hash) -> Result<BlockHashes, StoreError>;
    fn get_future_covering_set(&self, hash: Hash) -> Result<BlockHashes, StoreError>;
    fn get_height(&self, hash: Hash) -> Result<u64, StoreError>;
}

/// Write API for `ReachabilityStore`. All write functions are deliberately `mut`
/// since reachability writes are not append-only and thus need to be guarded.
pub trait ReachabilityStore: ReachabilityStoreReader {
    fn init(&mut self, origin: Hash, capacity: Interval) -> Result<(), StoreError>;
    fn insert(&mut self, hash: Hash, parent: Hash, interval: Interval, height: u64) -> Result<(), StoreError>;
    fn set_interval(&mut self, hash: Hash, interval: Interval) -> Result<(), StoreError>;
    /// Appends `child` to the tree children of `hash` and returns the height of `hash`
    fn append_child(&mut self, hash: Hash, child: Hash) -> Result<u64, StoreError>;
    fn insert_future_covering_item(&mut self, hash: Hash, fci: Hash, insertion_index: usize) -> Result<(), StoreError>;
    fn set_reindex_root(&mut self, root: Hash) -> Result<(), StoreError>;
    fn get_reindex_root(&self) -> Result<Hash, StoreError>;
}

/// A DB + cache implementation of the reachability reader, with concurrent readers support.
/// Writes go through [`StagingReachabilityStore`]
#[derive(Clone)]
pub struct DbReachabilityStore {
    db: Arc<DB>,
    access: CachedDbAccess<Hash, Arc<ReachabilityData>, BlockHasher>,
    reindex_root: CachedDbItem<Hash>,
}

impl DbReachabilityStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self {
            db: Arc::clone(&db),
            access: CachedDbAccess::new(Arc::clone(&db), cache_size, DatabaseStorePrefixes::Reachability.into()),
            reindex_root: CachedDbItem::new(db, DatabaseStorePrefixes::ReachabilityReindexRoot.into()),
        }
    }

    pub fn clone_with_new_cache(&self, cache_size: u64) -> Self {
        Self::new(Arc::clone(&self.db), cache_size)
    }

    pub fn get_reindex_root(&self) -> Result<Hash, StoreError> {
        self.reindex_root.read()
    }
}

impl ReachabilityStoreReader for DbReachabilityStore {
    fn has(&self, hash: Hash) -> Result<bool, StoreError> {
        self.access.has(hash)
    }

    fn get_interval(&self, hash: Hash) -> Result<Interval, StoreError> {
        Ok(self.access.read(hash)?.interval)
    }

    fn get_parent(&self, hash: Hash) -> Result<Hash, StoreError> {
        Ok(self.access.read(hash)?.parent)
    }

    fn get_children(&self, hash: Hash) -> Result<BlockHashes, StoreError> {
        Ok(Arc::clone(&self.access.read(hash)?.children))
    }

    fn get_future_covering_set(&self, hash: Hash) -> Result<BlockHashes, StoreError> {
        Ok(Arc::clone(&self.access.read(hash)?.future_covering_set))
    }

    fn get_height(&self, hash: Hash) -> Result<u64, StoreError> {
        Ok(self.access.read(hash)?.height)
    }
}

/// Stages reachability mutations into a [`StagingArea`]. Reads observe the staged writes.
/// Readers of the underlying [`DbReachabilityStore`] keep seeing the committed state until
/// the area is committed, which the caller does while holding the store's write lock
pub struct StagingReachabilityStore<'a> {
    store: &'a DbReachabilityStore,
    area: &'a StagingArea<'a>,
}

impl<'a> StagingReachabilityStore<'a> {
    pub fn new(store: &'a DbReachabilityStore, area: &'a StagingArea<'a>) -> Self {
        Self { store, area }
    }

    fn read(&self, hash: Hash) -> Result<Arc<ReachabilityData>, StoreError> {
        self.store.access.read_staged(self.area, hash)
    }

    fn update(&mut self, hash: Hash, op: impl FnOnce(&mut ReachabilityData)) -> Result<Arc<ReachabilityData>, StoreError> {
        let mut data = self.read(hash)?;
        op(Arc::make_mut(&mut data));
        self.store.access.write(self.area, hash, data.clone())?;
        Ok(data)
    }
}

impl ReachabilityStoreReader for StagingReachabilityStore<'_> {
    fn has(&self, hash: Hash) -> Result<bool, StoreError> {
        self.store.access.has_staged(self.area, hash)
    }

    fn get_interval(&self, hash: Hash) -> Result<Interval, StoreError> {
        Ok(self.read(hash)?.interval)
    }

    fn get_parent(&self, hash: Hash) -> Result<Hash, StoreError> {
        Ok(self.read(hash)?.parent)
    }

    fn get_children(&self, hash: Hash) -> Result<BlockHashes, StoreError> {
        Ok(Arc::clone(&self.read(hash)?.children))
    }

    fn get_future_covering_set(&self, hash: Hash) -> Result<BlockHashes, StoreError> {
        Ok(Arc::clone(&self.read(hash)?.future_covering_set))
    }

    fn get_height(&self, hash: Hash) -> Result<u64, StoreError> {
        Ok(self.read(hash)?.height)
    }
}

impl ReachabilityStore for StagingReachabilityStore<'_> {
    fn init(&mut self, origin: Hash, capacity: Interval) -> Result<(), StoreError> {
        self.insert(origin, blockhash::NONE, capacity, 0)?;
        self.set_reindex_root(origin)?;
        Ok(())
    }

    fn insert(&mut self, hash: Hash, parent: Hash, interval: Interval, height: u64) -> Result<(), StoreError> {
        if self.has(hash)? {
            return Err(StoreError::HashAlreadyExists(hash));
        }
        self.store.access.write(self.area, hash, Arc::new(ReachabilityData::new(parent, interval, height)))
    }

    fn set_interval(&mut self, hash: Hash, interval: Interval) -> Result<(), StoreError> {
        self.update(hash, |data| data.interval = interval)?;
        Ok(())
    }

    fn append_child(&mut self, hash: Hash, child: Hash) -> Result<u64, StoreError> {
        Ok(self.update(hash, |data| Arc::make_mut(&mut data.children).push(child))?.height)
    }

    fn insert_future_covering_item(&mut self, hash: Hash, fci: Hash, insertion_index: usize) -> Result<(), StoreError> {
        self.update(hash, |data| Arc::make_mut(&mut data.future_covering_set).insert(insertion_index, fci))?;
        Ok(())
    }

    fn set_reindex_root(&mut self, root: Hash) -> Result<(), StoreError> {
        self.store.reindex_root.clone().write(self.area, &root)
    }

    fn get_reindex_root(&self) -> Result<Hash, StoreError> {
        self.store.reindex_root.read_staged(self.area)
    }
}

/// An in-memory store, used by the algorithmic tests
#[derive(Default)]
pub struct MemoryReachabilityStore {
    map: BlockHashMap<ReachabilityData>,
    reindex_root: Option<Hash>,
}

impl MemoryReachabilityStore {
    pub fn new() -> Self {
        Self { map: BlockHashMap::new(), reindex_root: None }
    }

    fn get_data_mut(&mut self, hash: Hash) -> Result<&mut ReachabilityData, StoreError> {
        match self.map.get_mut(&hash) {
            Some(data) => Ok(data),
            None => Err(StoreError::KeyNotFound(DbKey::new(DatabaseStorePrefixes::Reachability.as_ref(), hash))),
        }
    }

    fn get_data(&self, hash: Hash) -> Result<&ReachabilityData, StoreError> {
        match self.map.get(&hash) {
            Some(data) => Ok(data),
            None => Err(StoreError::KeyNotFound(DbKey::new(DatabaseStorePrefixes::Reachability.as_ref(), hash))),
        }
    }
}

impl ReachabilityStore for MemoryReachabilityStore {
    fn init(&mut self, origin: Hash, capacity: Interval) -> Result<(), StoreError> {
        self.insert(origin, blockhash::NONE, capacity, 0)?;
        self.set_reindex_root(origin)?;
        Ok(())
    }

    fn insert(&mut self, hash: Hash, parent: Hash, interval: Interval, height: u64) -> Result<(), StoreError> {
        if let Vacant(e) = self.map.entry(hash) {
            e.insert(ReachabilityData::new(parent, interval, height));
            Ok(())
        } else {
            Err(StoreError::HashAlreadyExists(hash))
        }
    }

    fn set_interval(&mut self, hash: Hash, interval: Interval) -> Result<(), StoreError> {
        let data = self.get_data_mut(hash)?;
        data.interval = interval;
        Ok(())
    }

    fn append_child(&mut self, hash: Hash, child: Hash) -> Result<u64, StoreError> {
        let data = self.get_data_mut(hash)?;
        Arc::make_mut(&mut data.children).push(child);
        Ok(data.height)
    }

    fn insert_future_covering_item(&mut self, hash: Hash, fci: Hash, insertion_index: usize) -> Result<(), StoreError> {
        let data = self.get_data_mut(hash)?;
        Arc::make_mut(&mut data.future_covering_set).insert(insertion_index, fci);
        Ok(())
    }

    fn set_reindex_root(&mut self, root: Hash) -> Result<(), StoreError> {
        self.reindex_root = Some(root);
        Ok(())
    }

    fn get_reindex_root(&self) -> Result<Hash, StoreError> {
        match self.reindex_root {
            Some(root) => Ok(root),
            None => Err(StoreError::KeyNotFound(DbKey::prefix_only(DatabaseStorePrefixes::ReachabilityReindexRoot.as_ref()))),
        }
    }
}

impl ReachabilityStoreReader for MemoryReachabilityStore {
    fn has(&self, hash: Hash) -> Result<bool, StoreError> {
        Ok(self.map.contains_key(&hash))
    }

    fn get_interval(&self, hash: Hash) -> Result<Interval, StoreError> {
        Ok(self.get_data(hash)?.interval)
    }

    fn get_parent(&self, hash: Hash) -> Result<Hash, StoreError> {
        Ok(self.get_data(hash)?.parent)
    }

    fn get_children(&self, hash: Hash) -> Result<BlockHashes, StoreError> {
        Ok(Arc::clone(&self.get_data(hash)?.children))
    }

    fn get_future_covering_set(&self, hash: Hash) -> Result<BlockHashes, StoreError> {
        Ok(Arc::clone(&self.get_data(hash)?.future_covering_set))
    }

    fn get_height(&self, hash: Hash) -> Result<u64, StoreError> {
        Ok(self.get_data(hash)?.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processes::reachability::inquirer;

    #[test]
    fn test_staged_store_is_invisible_until_commit() {
        let db = DB::new_memory();
        let store = DbReachabilityStore::new(db.clone(), 16);

        let area = StagingArea::new();
        let mut staging = StagingReachabilityStore::new(&store, &area);
        inquirer::init(&mut staging).unwrap();
        let (a, b): (Hash, Hash) = (1.into(), 2.into());
        inquirer::add_block(&mut staging, a, blockhash::ORIGIN, &mut std::iter::empty::<Hash>()).unwrap();
        inquirer::add_block(&mut staging, b, a, &mut std::iter::empty::<Hash>()).unwrap();
        assert!(inquirer::is_chain_ancestor_of(&staging, a, b).unwrap());
        assert_eq!(staging.get_height(b).unwrap(), 2);

        assert!(!store.has(a).unwrap());
        area.commit_to_db(&db).unwrap();
        assert!(store.has(a).unwrap());
        assert!(inquirer::is_dag_ancestor_of(&store, a, b).unwrap());
        assert_eq!(store.get_reindex_root().unwrap(), blockhash::ORIGIN);
    }
}
