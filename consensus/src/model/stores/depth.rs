use std::sync::Arc;

use kestrel_consensus_core::BlockHasher;
use kestrel_database::prelude::{CachedDbAccess, DB, DbWriter, StoreError, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use serde::{Deserialize, Serialize};

pub trait DepthStoreReader {
    fn merge_depth_root(&self, hash: Hash) -> StoreResult<Hash>;
    fn finality_point(&self, hash: Hash) -> StoreResult<Hash>;
}

pub trait DepthStore: DepthStoreReader {
    // This is append only
    fn insert(&self, writer: impl DbWriter, hash: Hash, merge_depth_root: Hash, finality_point: Hash) -> StoreResult<()>;
}

#[derive(Clone, Copy, Serialize, Deserialize)]
struct BlockDepthInfo {
    merge_depth_root: Hash,
    finality_point: Hash,
}

/// Caches, per block, the chain ancestors at merge depth and at finality depth so that
/// descendants can locate theirs by walking forward from the selected parent's
#[derive(Clone)]
pub struct DbDepthStore {
    access: CachedDbAccess<Hash, BlockDepthInfo, BlockHasher>,
}

impl DbDepthStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self { access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::BlockDepth.into()) }
    }
}

impl DepthStoreReader for DbDepthStore {
    fn merge_depth_root(&self, hash: Hash) -> StoreResult<Hash> {
        Ok(self.access.read(hash)?.merge_depth_root)
    }

    fn finality_point(&self, hash: Hash) -> StoreResult<Hash> {
        Ok(self.access.read(hash)?.finality_point)
    }
}

impl DepthStore for DbDepthStore {
    fn insert(&self, writer: impl DbWriter, hash: Hash, merge_depth_root: Hash, finality_point: Hash) -> StoreResult<()> {
        if self.access.has(hash)? {
            return Err(StoreError::HashAlreadyExists(hash));
        }
        self.access.write(writer, hash, BlockDepthInfo { merge_depth_root, finality_point })
    }
}
