use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::Rng;
use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// A bounded concurrent cache which evicts a random entry once full. Clones share the same storage.
#[derive(Clone)]
pub struct Cache<TKey: Clone + Hash + Eq + Send + Sync, TData: Clone + Send + Sync, S = RandomState> {
    // IndexMap makes removing a random element O(1) via swap_remove_index
    map: Arc<RwLock<IndexMap<TKey, TData, S>>>,
    size: usize,
    counters: Arc<CacheCounters>,
}

#[derive(Default)]
pub struct CacheCounters {
    pub get_counts: AtomicU64,
    pub hit_counts: AtomicU64,
    pub insert_counts: AtomicU64,
}

impl<TKey: Clone + Hash + Eq + Send + Sync, TData: Clone + Send + Sync, S: BuildHasher + Default> Cache<TKey, TData, S> {
    pub fn new(size: u64) -> Self {
        Self {
            map: Arc::new(RwLock::new(IndexMap::with_capacity_and_hasher(size as usize, S::default()))),
            size: size as usize,
            counters: Default::default(),
        }
    }

    pub(crate) fn get(&self, key: &TKey) -> Option<TData> {
        self.counters.get_counts.fetch_add(1, Ordering::Relaxed);
        let data = self.map.read().get(key).cloned();
        if data.is_some() {
            self.counters.hit_counts.fetch_add(1, Ordering::Relaxed);
        }
        data
    }

    pub(crate) fn insert(&self, key: TKey, data: TData) {
        if self.size == 0 {
            return;
        }
        self.counters.insert_counts.fetch_add(1, Ordering::Relaxed);
        let mut write_guard = self.map.write();
        if write_guard.len() >= self.size && !write_guard.contains_key(&key) {
            let evicted = rand::thread_rng().gen_range(0..write_guard.len());
            write_guard.swap_remove_index(evicted);
        }
        write_guard.insert(key, data);
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> &CacheCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_is_bounded() {
        let cache: Cache<u32, bool> = Cache::new(8);
        for i in 0..100 {
            cache.insert(i, i % 2 == 0);
            assert!(cache.len() <= 8);
        }
        assert_eq!(cache.len(), 8);
        assert_eq!(cache.get(&99), Some(false));
    }

    #[test]
    fn test_zero_sized_cache_stores_nothing() {
        let cache: Cache<u32, bool> = Cache::new(0);
        cache.insert(1, true);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.counters().get_counts.load(Ordering::Relaxed), 1);
        assert_eq!(cache.counters().hit_counts.load(Ordering::Relaxed), 0);
    }
}
