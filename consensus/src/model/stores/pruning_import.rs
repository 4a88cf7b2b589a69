use std::sync::Arc;

use kestrel_database::prelude::{CachedDbItem, DB, DbWriter, StoreResult, StoreResultExt};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use kestrel_multiset::Multiset;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportPhase {
    /// Chunks are being streamed into the imported UTXO set
    Streaming,
    /// The imported set was verified and is being promoted to the pruning point and virtual sets
    Finishing,
}

/// Persisted progress of a pruning point UTXO set import
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PruningImportState {
    pub phase: ImportPhase,
    /// The pruning point whose UTXO set is being imported, once known
    pub pruning_point: Option<Hash>,
    pub imported_count: u64,
    pub multiset: Multiset,
}

impl PruningImportState {
    pub fn started() -> Self {
        Self { phase: ImportPhase::Streaming, pruning_point: None, imported_count: 0, multiset: Multiset::new() }
    }
}

#[derive(Clone)]
pub struct DbPruningImportStore {
    access: CachedDbItem<PruningImportState>,
}

impl DbPruningImportStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self { access: CachedDbItem::new(db, DatabaseStorePrefixes::PruningImportState.into()) }
    }

    /// Returns `None` when no import is in progress
    pub fn get(&self) -> StoreResult<Option<PruningImportState>> {
        self.access.read().optional()
    }

    pub fn set(&mut self, writer: impl DbWriter, state: &PruningImportState) -> StoreResult<()> {
        self.access.write(writer, state)
    }

    pub fn clear(&mut self, writer: impl DbWriter) -> StoreResult<()> {
        self.access.remove(writer)
    }
}
