use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::Rng;
use std::{collections::hash_map::RandomState, hash::BuildHasher, sync::Arc};

/// A bounded concurrent cache with random eviction. Clones share the same underlying map
pub struct Cache<TKey, TData, S = RandomState>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
{
    // IndexMap makes removing a random element cheap when the cache is full
    map: Arc<RwLock<IndexMap<TKey, TData, S>>>,
    size: usize,
}

impl<TKey, TData, S> Clone for Cache<TKey, TData, S>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
{
    fn clone(&self) -> Self {
        Self { map: self.map.clone(), size: self.size }
    }
}

impl<TKey, TData, S> Cache<TKey, TData, S>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
    S: BuildHasher + Default,
{
    pub fn new(size: u64) -> Self {
        // `size + 1` avoids a realloc when a new element exactly overflows capacity
        Self { map: Arc::new(RwLock::new(IndexMap::with_capacity_and_hasher(size as usize + 1, S::default()))), size: size as usize }
    }

    pub fn get(&self, key: &TKey) -> Option<TData> {
        self.map.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &TKey) -> bool {
        self.map.read().contains_key(key)
    }

    fn insert_impl(map: &mut IndexMap<TKey, TData, S>, size: usize, key: TKey, data: TData) {
        if map.len() == size && !map.contains_key(&key) {
            map.swap_remove_index(rand::thread_rng().gen_range(0..size));
        }
        map.insert(key, data);
    }

    pub fn insert(&self, key: TKey, data: TData) {
        if self.size == 0 {
            return;
        }
        Self::insert_impl(&mut self.map.write(), self.size, key, data);
    }

    pub fn insert_many(&self, iter: impl IntoIterator<Item = (TKey, TData)>) {
        if self.size == 0 {
            return;
        }
        let mut map = self.map.write();
        for (key, data) in iter {
            Self::insert_impl(&mut map, self.size, key, data);
        }
    }

    pub fn remove(&self, key: &TKey) -> Option<TData> {
        if self.size == 0 {
            return None;
        }
        self.map.write().swap_remove(key)
    }

    pub fn remove_many(&self, keys: impl IntoIterator<Item = TKey>) {
        if self.size == 0 {
            return;
        }
        let mut map = self.map.write();
        for key in keys {
            map.swap_remove(&key);
        }
    }

    pub fn remove_all(&self) {
        if self.size == 0 {
            return;
        }
        self.map.write().clear();
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_is_bounded() {
        let cache: Cache<u64, u64> = Cache::new(4);
        cache.insert_many((0..10).map(|i| (i, i * 2)));
        assert_eq!(cache.len(), 4);
        cache.insert(100, 1);
        assert_eq!(cache.get(&100), Some(1));
        // Overwriting an existing key does not evict
        cache.insert(100, 2);
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.get(&100), Some(2));
        cache.remove_all();
        assert!(cache.is_empty());

        let disabled: Cache<u64, u64> = Cache::new(0);
        disabled.insert(1, 1);
        assert!(!disabled.contains_key(&1));
    }
}
