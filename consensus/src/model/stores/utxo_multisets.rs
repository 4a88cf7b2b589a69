use kestrel_consensus_core::BlockHasher;
use kestrel_database::prelude::{CachedDbAccess, DB, DbWriter, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use kestrel_multiset::Multiset;
use std::sync::Arc;

pub trait UtxoMultisetsStoreReader {
    fn get(&self, hash: Hash) -> StoreResult<Multiset>;
}

pub trait UtxoMultisetsStore: UtxoMultisetsStoreReader {
    fn insert(&self, writer: impl DbWriter, hash: Hash, multiset: Multiset) -> StoreResult<()>;
    fn delete(&self, writer: impl DbWriter, hash: Hash) -> StoreResult<()>;
}

/// The multiset of `utxo(b)` for every UTXO-verified block `b`. Its finalized hash is the header commitment
#[derive(Clone)]
pub struct DbUtxoMultisetsStore {
    access: CachedDbAccess<Hash, Multiset, BlockHasher>,
}

impl DbUtxoMultisetsStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self { access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::UtxoMultisets.into()) }
    }
}

impl UtxoMultisetsStoreReader for DbUtxoMultisetsStore {
    fn get(&self, hash: Hash) -> StoreResult<Multiset> {
        self.access.read(hash)
    }
}

impl UtxoMultisetsStore for DbUtxoMultisetsStore {
    fn insert(&self, writer: impl DbWriter, hash: Hash, multiset: Multiset) -> StoreResult<()> {
        // A block whose diff is rewritten keeps its multiset, so overwriting is allowed here
        self.access.write(writer, hash, multiset)
    }

    fn delete(&self, writer: impl DbWriter, hash: Hash) -> StoreResult<()> {
        self.access.delete(writer, hash)
    }
}
