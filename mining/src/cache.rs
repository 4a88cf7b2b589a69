use kestrel_consensus_core::{block::BlockTemplate, coinbase::MinerData};
use parking_lot::{Mutex, MutexGuard};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering::SeqCst},
};

/// Default duration in milliseconds after which a cached template expires
pub(crate) const DEFAULT_CACHE_LIFETIME: u64 = 1_000;

pub(crate) struct Inner {
    /// Time, in milliseconds, at which the cache was last updated
    last_update_time: u64,

    block_template: Option<Arc<BlockTemplate>>,

    /// Duration in milliseconds after which the cached template expires
    cache_lifetime: u64,
}

impl Inner {
    fn new(cache_lifetime: u64) -> Self {
        Self { last_update_time: 0, block_template: None, cache_lifetime }
    }

    fn clear(&mut self) {
        self.block_template = None;
    }

    /// Returns the cached template if it is still fresh at `now` and was built for `miner_data`
    pub(crate) fn get_cached_template(&self, miner_data: &MinerData, now: u64) -> Option<Arc<BlockTemplate>> {
        // A clock going backwards invalidates the cache as well
        if now > self.last_update_time + self.cache_lifetime || now < self.last_update_time {
            return None;
        }
        self.block_template.as_ref().filter(|template| template.miner_data == *miner_data).cloned()
    }

    pub(crate) fn set_cached_template(&mut self, block_template: BlockTemplate, now: u64) -> Arc<BlockTemplate> {
        self.last_update_time = now;
        let block_template = Arc::new(block_template);
        self.block_template = Some(block_template.clone());
        block_template
    }
}

pub(crate) struct BlockTemplateCache {
    inner: Mutex<Inner>,
    clear_flag: AtomicBool,
}

impl BlockTemplateCache {
    pub(crate) fn new(cache_lifetime: Option<u64>) -> Self {
        Self { inner: Mutex::new(Inner::new(cache_lifetime.unwrap_or(DEFAULT_CACHE_LIFETIME))), clear_flag: AtomicBool::new(false) }
    }

    /// Signals the next thread acquiring the lock to drop the template, without blocking on the mutex
    pub(crate) fn clear(&self) {
        self.clear_flag.store(true, SeqCst)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        let mut guard = self.inner.lock();
        if self.clear_flag.swap(false, SeqCst) {
            guard.clear();
        }
        guard
    }
}
