use crate::{
    db::DB,
    errors::{StoreError, StoreResult},
    kv::KvIterator,
    overlay::{CommitCallback, Lookup, Overlay},
    transaction::DbTransaction,
    writer::DbWriter,
};
use parking_lot::RwLock;

/// A set of uncommitted writes which reads can observe before they reach the database.
/// Areas nest: a child sees its parent's writes, and committing the child merges its writes
/// into the parent. Only the root area commits into a [`DbTransaction`]. Dropping an area
/// without committing discards its writes together with any pending commit callbacks.
#[derive(Default)]
pub struct StagingArea<'a> {
    parent: Option<&'a StagingArea<'a>>,
    overlay: RwLock<Overlay>,
}

impl<'a> StagingArea<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a nested area on top of this one
    pub fn child<'b>(&'b self) -> StagingArea<'b>
    where
        'a: 'b,
    {
        StagingArea { parent: Some(self), overlay: Default::default() }
    }

    /// Returns `Some(Some(value))` if staged, `Some(None)` if staged as deleted and `None` when
    /// neither this area nor any of its ancestors touched the key
    pub fn lookup(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        match self.overlay.read().lookup(key) {
            Lookup::Written(value) => return Some(Some(value.to_vec())),
            Lookup::Deleted => return Some(None),
            Lookup::Untouched => {}
        }
        self.parent.and_then(|parent| parent.lookup(key))
    }

    /// Reads a key as seen through this area, falling back to `db`
    pub fn get(&self, db: &DB, key: impl AsRef<[u8]>) -> StoreResult<Option<Vec<u8>>> {
        match self.lookup(key.as_ref()) {
            Some(staged) => Ok(staged),
            None => db.get(key),
        }
    }

    /// Layers the staged writes of this area (and its ancestors) over a base iteration of `prefix`
    pub fn iterate_over<'b>(&self, base: KvIterator<'b>, prefix: &[u8], seek_from: Option<&[u8]>) -> KvIterator<'b> {
        let base = match self.parent {
            Some(parent) => parent.iterate_over(base, prefix, seek_from),
            None => base,
        };
        self.overlay.read().iterate_over(base, prefix, seek_from)
    }

    /// Iterates `bucket` as seen through this area. Keys are returned without the bucket prefix
    pub fn cursor(&self, db: &DB, bucket: &[u8], seek_from: Option<&[u8]>) -> Vec<StoreResult<(Box<[u8]>, Vec<u8>)>> {
        let seek = seek_from.map(|suffix| [bucket, suffix].concat());
        let prefix_len = bucket.len();
        self.iterate_over(db.raw_iterator(bucket, seek.as_deref()), bucket, seek.as_deref())
            .map(|item| item.map(|(key, value)| (key[prefix_len..].into(), value.into_vec())))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.overlay.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.overlay.read().len()
    }

    /// Merges this nested area into its parent
    pub fn commit_to_parent(self) -> StoreResult<()> {
        let Some(parent) = self.parent else {
            return Err(StoreError::DataInconsistency("staging area has no parent to commit into".to_string()));
        };
        parent.overlay.write().merge(self.overlay.into_inner());
        Ok(())
    }

    /// Moves all staged writes of this root area into `txn`. Commit callbacks run once `txn` commits
    pub fn commit(self, txn: &mut DbTransaction) -> StoreResult<()> {
        if self.parent.is_some() {
            return Err(StoreError::DataInconsistency("nested staging areas commit into their parent".to_string()));
        }
        txn.absorb(self.overlay.into_inner());
        Ok(())
    }

    /// Commits this root area directly and atomically to `db`
    pub fn commit_to_db(self, db: &DB) -> StoreResult<()> {
        let mut txn = db.begin_transaction();
        self.commit(&mut txn)?;
        txn.commit()
    }
}

impl DbWriter for &StagingArea<'_> {
    const IS_BATCH: bool = true;

    fn put<K, V>(&mut self, key: K, value: V) -> StoreResult<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.overlay.write().put(key.as_ref().to_vec(), value.as_ref().to_vec());
        Ok(())
    }

    fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> StoreResult<()> {
        self.overlay.write().delete(key.as_ref().to_vec());
        Ok(())
    }

    fn delete_range<K: AsRef<[u8]>>(&mut self, from: K, to: K) -> StoreResult<()> {
        self.overlay.write().delete_range(from.as_ref().to_vec(), to.as_ref().to_vec());
        Ok(())
    }

    fn on_commit(&mut self, callback: impl FnOnce() + Send + Sync + 'static) {
        self.overlay.write().on_commit(Box::new(callback) as CommitCallback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[test]
    fn test_nested_areas() {
        let db = DB::new_memory();
        db.put([1, 1], [1]).unwrap();

        let root = StagingArea::new();
        (&root).put([1, 2], [2]).unwrap();
        {
            let child = root.child();
            (&child).delete([1, 1]).unwrap();
            (&child).put([1, 3], [3]).unwrap();
            assert_eq!(child.get(&db, [1, 1]).unwrap(), None);
            assert_eq!(child.get(&db, [1, 2]).unwrap(), Some(vec![2]));
            let keys: Vec<_> = child.cursor(&db, &[1], None).into_iter().map(|r| r.unwrap().0.to_vec()).collect();
            assert_eq!(keys, vec![vec![2], vec![3]]);
            // Not committed, so the parent never sees it
        }
        assert_eq!(root.get(&db, [1, 1]).unwrap(), Some(vec![1]));
        assert_eq!(root.get(&db, [1, 3]).unwrap(), None);

        let child = root.child();
        (&child).put([1, 3], [3]).unwrap();
        child.commit_to_parent().unwrap();
        assert_eq!(root.get(&db, [1, 3]).unwrap(), Some(vec![3]));
        assert_eq!(db.get([1, 3]).unwrap(), None);

        root.commit_to_db(&db).unwrap();
        assert_eq!(db.get([1, 2]).unwrap(), Some(vec![2]));
        assert_eq!(db.get([1, 3]).unwrap(), Some(vec![3]));
    }

    #[test]
    fn test_callbacks_wait_for_durable_commit() {
        let db = DB::new_memory();
        let counter = Arc::new(AtomicUsize::new(0));

        let root = StagingArea::new();
        let c = counter.clone();
        (&root).on_commit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let mut txn = db.begin_transaction();
        root.commit(&mut txn).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        txn.commit().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let root = StagingArea::new();
        let c = counter.clone();
        (&root).on_commit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(root);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
