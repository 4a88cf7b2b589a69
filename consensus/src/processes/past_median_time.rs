use crate::model::stores::headers::HeaderStoreReader;
use std::sync::Arc;

use super::window::BlockWindowHeap;

#[derive(Clone)]
pub struct PastMedianTimeManager<T: HeaderStoreReader> {
    headers_store: Arc<T>,
    genesis_timestamp: u64,
}

impl<T: HeaderStoreReader> PastMedianTimeManager<T> {
    pub fn new(headers_store: Arc<T>, genesis_timestamp: u64) -> Self {
        Self { headers_store, genesis_timestamp }
    }

    /// The median timestamp of the window. A block is required to have a greater timestamp
    pub fn calc_past_median_time(&self, window: &BlockWindowHeap) -> u64 {
        if window.is_empty() {
            return self.genesis_timestamp;
        }

        let mut window_timestamps: Vec<u64> =
            window.iter().map(|item| self.headers_store.get_timestamp(item.0.hash).expect("window blocks have headers")).collect();
        window_timestamps.sort_unstable(); // This is deterministic because we sort u64
        window_timestamps[window_timestamps.len() / 2]
    }
}
