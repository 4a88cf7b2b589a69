use std::sync::Arc;

use kestrel_consensus_core::pruning::PruningPointInfo;
use kestrel_database::prelude::{CachedDbAccess, CachedDbItem, DB, DbWriter, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;

/// Reader API for `PruningStore`.
pub trait PruningStoreReader {
    fn pruning_point(&self) -> StoreResult<Hash>;
    fn pruning_point_candidate(&self) -> StoreResult<Hash>;
    fn pruning_point_index(&self) -> StoreResult<u64>;

    /// Returns full pruning point info, including its index and the next pruning point candidate
    fn get(&self) -> StoreResult<PruningPointInfo>;

    /// The pruning point at `index`, where index 0 is genesis
    fn past_pruning_point(&self, index: u64) -> StoreResult<Hash>;
}

pub trait PruningStore: PruningStoreReader {
    fn set(&mut self, writer: impl DbWriter, info: PruningPointInfo) -> StoreResult<()>;
    fn insert_past_pruning_point(&self, writer: impl DbWriter, index: u64, hash: Hash) -> StoreResult<()>;
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct PastPruningPointKey([u8; 8]);

impl From<u64> for PastPruningPointKey {
    fn from(index: u64) -> Self {
        Self(index.to_be_bytes())
    }
}

impl AsRef<[u8]> for PastPruningPointKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A DB + cache implementation of `PruningStore` trait
#[derive(Clone)]
pub struct DbPruningStore {
    access: CachedDbItem<PruningPointInfo>,
    past_pruning_points_access: CachedDbAccess<PastPruningPointKey, Hash>,
}

impl DbPruningStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            access: CachedDbItem::new(db.clone(), DatabaseStorePrefixes::PruningPoint.into()),
            past_pruning_points_access: CachedDbAccess::new(db, 64, DatabaseStorePrefixes::PastPruningPoints.into()),
        }
    }
}

impl PruningStoreReader for DbPruningStore {
    fn pruning_point(&self) -> StoreResult<Hash> {
        Ok(self.access.read()?.pruning_point)
    }

    fn pruning_point_candidate(&self) -> StoreResult<Hash> {
        Ok(self.access.read()?.candidate)
    }

    fn pruning_point_index(&self) -> StoreResult<u64> {
        Ok(self.access.read()?.index)
    }

    fn get(&self) -> StoreResult<PruningPointInfo> {
        self.access.read()
    }

    fn past_pruning_point(&self, index: u64) -> StoreResult<Hash> {
        self.past_pruning_points_access.read(index.into())
    }
}

impl PruningStore for DbPruningStore {
    fn set(&mut self, writer: impl DbWriter, info: PruningPointInfo) -> StoreResult<()> {
        self.access.write(writer, &info)
    }

    fn insert_past_pruning_point(&self, writer: impl DbWriter, index: u64, hash: Hash) -> StoreResult<()> {
        self.past_pruning_points_access.write(writer, index.into(), hash)
    }
}
