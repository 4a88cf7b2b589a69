use std::sync::Arc;

use kestrel_database::prelude::{CachedDbItem, DB, DbWriter, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;

use crate::processes::ghostdag::ordering::SortableBlock;

/// Reader API for `HeadersSelectedTipStore`.
pub trait HeadersSelectedTipStoreReader {
    fn get(&self) -> StoreResult<SortableBlock>;
}

pub trait HeadersSelectedTipStore: HeadersSelectedTipStoreReader {
    fn set(&mut self, writer: impl DbWriter, block: SortableBlock) -> StoreResult<()>;
}

/// The header with the highest blue work among all known headers
#[derive(Clone)]
pub struct DbHeadersSelectedTipStore {
    access: CachedDbItem<SortableBlock>,
}

impl DbHeadersSelectedTipStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self { access: CachedDbItem::new(db, DatabaseStorePrefixes::HeadersSelectedTip.into()) }
    }
}

impl HeadersSelectedTipStoreReader for DbHeadersSelectedTipStore {
    fn get(&self) -> StoreResult<SortableBlock> {
        self.access.read()
    }
}

impl HeadersSelectedTipStore for DbHeadersSelectedTipStore {
    fn set(&mut self, writer: impl DbWriter, block: SortableBlock) -> StoreResult<()> {
        self.access.write(writer, &block)
    }
}
