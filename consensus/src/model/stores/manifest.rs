use std::sync::Arc;

use kestrel_database::prelude::{CachedDbItem, DB, DbWriter, StoreResult, StoreResultExt};
use kestrel_database::registry::DatabaseStorePrefixes;
use serde::{Deserialize, Serialize};

/// Bumped whenever the on-disk layout of any consensus store changes
pub const SCHEMA_VERSION: u32 = 1;

/// Identifies what a consensus database was created for. A node refuses to open a
/// database written by another schema version or for another network
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusManifest {
    pub schema_version: u32,
    pub network: String,
}

impl ConsensusManifest {
    pub fn new(network: String) -> Self {
        Self { schema_version: SCHEMA_VERSION, network }
    }
}

#[derive(Clone)]
pub struct DbManifestStore {
    access: CachedDbItem<ConsensusManifest>,
}

impl DbManifestStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self { access: CachedDbItem::new(db, DatabaseStorePrefixes::ConsensusManifest.into()) }
    }

    /// Returns `None` for a fresh database
    pub fn get(&self) -> StoreResult<Option<ConsensusManifest>> {
        self.access.read().optional()
    }

    pub fn set(&mut self, writer: impl DbWriter, manifest: &ConsensusManifest) -> StoreResult<()> {
        self.access.write(writer, manifest)
    }
}
