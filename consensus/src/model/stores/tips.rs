use std::sync::Arc;

use kestrel_consensus_core::{BlockHashSet, HashMapCustomHasher};
use kestrel_database::prelude::{CachedDbItem, DB, DbWriter, StagingArea, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;

/// Reader API for `TipsStore`.
pub trait TipsStoreReader {
    fn get(&self) -> StoreResult<Arc<BlockHashSet>>;
}

pub trait TipsStore: TipsStoreReader {
    /// Adds `new_tip` and removes every one of its parents from the tip set, reading the
    /// current set through `area` so that several additions can be staged together
    fn add_tip(&mut self, area: &StagingArea, new_tip: Hash, new_tip_parents: &[Hash]) -> StoreResult<Arc<BlockHashSet>>;

    /// Removes tips which can no longer be extended by valid blocks (e.g. disqualified ones)
    fn prune_tips(&mut self, area: &StagingArea, pruned_tips: &[Hash]) -> StoreResult<()>;

    fn init(&mut self, writer: impl DbWriter, tips: &[Hash]) -> StoreResult<()>;
}

/// The tips of the DAG restricted to blocks which have a body
#[derive(Clone)]
pub struct DbTipsStore {
    access: CachedDbItem<Arc<BlockHashSet>>,
}

impl DbTipsStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self { access: CachedDbItem::new(db, DatabaseStorePrefixes::Tips.into()) }
    }

    pub fn is_initialized(&self) -> StoreResult<bool> {
        match self.access.read() {
            Ok(_) => Ok(true),
            Err(err) if err.is_key_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl TipsStoreReader for DbTipsStore {
    fn get(&self) -> StoreResult<Arc<BlockHashSet>> {
        self.access.read()
    }
}

impl TipsStore for DbTipsStore {
    fn add_tip(&mut self, area: &StagingArea, new_tip: Hash, new_tip_parents: &[Hash]) -> StoreResult<Arc<BlockHashSet>> {
        self.access.update(area, Some(area), |tips| {
            let mut tips = Arc::unwrap_or_clone(tips);
            for parent in new_tip_parents {
                tips.remove(parent);
            }
            tips.insert(new_tip);
            Arc::new(tips)
        })
    }

    fn prune_tips(&mut self, area: &StagingArea, pruned_tips: &[Hash]) -> StoreResult<()> {
        if pruned_tips.is_empty() {
            return Ok(());
        }
        self.access.update(area, Some(area), |tips| {
            let mut tips = Arc::unwrap_or_clone(tips);
            for pruned in pruned_tips {
                tips.remove(pruned);
            }
            Arc::new(tips)
        })?;
        Ok(())
    }

    fn init(&mut self, writer: impl DbWriter, tips: &[Hash]) -> StoreResult<()> {
        let mut set = BlockHashSet::with_capacity(tips.len());
        set.extend(tips.iter().copied());
        self.access.write(writer, &Arc::new(set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_database::prelude::DirectDbWriter;

    #[test]
    fn test_tips_replace_parents() {
        let db = DB::new_memory();
        let mut store = DbTipsStore::new(db.clone());
        assert!(!store.is_initialized().unwrap());
        store.init(DirectDbWriter::new(&db), &[1.into()]).unwrap();

        let area = StagingArea::new();
        store.add_tip(&area, 2.into(), &[1.into()]).unwrap();
        store.add_tip(&area, 3.into(), &[1.into()]).unwrap();
        let staged = store.add_tip(&area, 4.into(), &[2.into()]).unwrap();
        assert_eq!(staged.len(), 2);
        assert_eq!(store.get().unwrap().len(), 1);
        area.commit_to_db(&db).unwrap();

        let tips = store.get().unwrap();
        assert!(tips.contains(&3.into()) && tips.contains(&4.into()));
    }
}
