mod access;
mod cache;
mod db;
mod errors;
mod item;
mod key;
mod kv;
mod overlay;
mod staging;
mod transaction;
mod writer;

pub mod registry;
pub mod utils;

pub mod prelude {
    use crate::{db, errors};

    pub use super::access::{CachedDbAccess, KeyDataResult};
    pub use super::cache::Cache;
    pub use super::item::CachedDbItem;
    pub use super::key::{DbKey, prefix_upper_bound};
    pub use super::kv::{BatchOp, KvIterator, KvPair, KvStore, MemoryKv, WriteBatch};
    pub use super::overlay::CommitCallback;
    pub use super::staging::StagingArea;
    pub use super::transaction::DbTransaction;
    pub use super::writer::{BatchDbWriter, DbWriter, DirectDbWriter};
    pub use db::{ConnBuilder, DB, RocksKv, delete_db};
    pub use errors::{StoreError, StoreResult, StoreResultExt, StoreResultUnitExt};
}
