use crate::{
    db::DB,
    errors::StoreResult,
    kv::KvIterator,
    overlay::{CommitCallback, Lookup, Overlay},
    writer::DbWriter,
};

/// A database transaction. Reads observe the transaction's own prior writes; `commit` applies all
/// writes in a single atomic batch and `rollback` (or dropping) discards them.
pub struct DbTransaction<'a> {
    db: &'a DB,
    overlay: Overlay,
}

impl<'a> DbTransaction<'a> {
    pub(crate) fn new(db: &'a DB) -> Self {
        Self { db, overlay: Overlay::default() }
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> StoreResult<Option<Vec<u8>>> {
        match self.overlay.lookup(key.as_ref()) {
            Lookup::Written(value) => Ok(Some(value.to_vec())),
            Lookup::Deleted => Ok(None),
            Lookup::Untouched => self.db.get(key),
        }
    }

    pub fn has(&self, key: impl AsRef<[u8]>) -> StoreResult<bool> {
        match self.overlay.lookup(key.as_ref()) {
            Lookup::Written(_) => Ok(true),
            Lookup::Deleted => Ok(false),
            Lookup::Untouched => self.db.has(key),
        }
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.overlay.put(key.as_ref().to_vec(), value.as_ref().to_vec());
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        self.overlay.delete(key.as_ref().to_vec());
    }

    /// Iterates `bucket` as seen by this transaction. Keys are returned without the bucket prefix
    pub fn cursor<'s>(
        &'s self,
        bucket: &[u8],
        seek_from: Option<&[u8]>,
    ) -> impl Iterator<Item = StoreResult<(Box<[u8]>, Vec<u8>)>> + use<'s, 'a> {
        let seek = seek_from.map(|suffix| [bucket, suffix].concat());
        let base: KvIterator<'_> = self.db.raw_iterator(bucket, seek.as_deref());
        let prefix_len = bucket.len();
        self.overlay
            .iterate_over(base, bucket, seek.as_deref())
            .map(move |item| item.map(|(key, value)| (key[prefix_len..].into(), value.into_vec())))
    }

    pub fn is_empty(&self) -> bool {
        self.overlay.is_empty()
    }

    pub fn commit(self) -> StoreResult<()> {
        let (batch, callbacks) = self.overlay.into_parts();
        self.db.write(batch)?;
        callbacks.into_iter().for_each(|callback| callback());
        Ok(())
    }

    pub fn rollback(self) {}

    pub(crate) fn absorb(&mut self, overlay: Overlay) {
        self.overlay.merge(overlay);
    }
}

impl DbWriter for DbTransaction<'_> {
    const IS_BATCH: bool = true;

    fn put<K, V>(&mut self, key: K, value: V) -> StoreResult<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        DbTransaction::put(self, key, value);
        Ok(())
    }

    fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> StoreResult<()> {
        DbTransaction::delete(self, key);
        Ok(())
    }

    fn delete_range<K: AsRef<[u8]>>(&mut self, from: K, to: K) -> StoreResult<()> {
        self.overlay.delete_range(from.as_ref().to_vec(), to.as_ref().to_vec());
        Ok(())
    }

    fn on_commit(&mut self, callback: impl FnOnce() + Send + Sync + 'static) {
        self.overlay.on_commit(Box::new(callback) as CommitCallback);
    }
}

#[cfg(test)]
mod tests {
    use crate::db::DB;

    #[test]
    fn test_transaction_reads_own_writes() {
        let db = DB::new_memory();
        db.put([1, 1], [10]).unwrap();
        db.put([1, 2], [20]).unwrap();

        let mut txn = db.begin_transaction();
        txn.put([1, 3], [30]);
        txn.delete([1, 1]);
        assert_eq!(txn.get([1, 3]).unwrap(), Some(vec![30]));
        assert_eq!(txn.get([1, 1]).unwrap(), None);
        assert!(txn.has([1, 2]).unwrap());
        let keys: Vec<_> = txn.cursor(&[1], None).map(|r| r.unwrap().0.to_vec()).collect();
        assert_eq!(keys, vec![vec![2], vec![3]]);

        // Nothing is visible outside before commit
        assert_eq!(db.get([1, 3]).unwrap(), None);
        assert_eq!(db.get([1, 1]).unwrap(), Some(vec![10]));

        txn.commit().unwrap();
        assert_eq!(db.get([1, 3]).unwrap(), Some(vec![30]));
        assert_eq!(db.get([1, 1]).unwrap(), None);
    }

    #[test]
    fn test_rollback_discards() {
        let db = DB::new_memory();
        let mut txn = db.begin_transaction();
        txn.put([9], [9]);
        txn.rollback();
        assert!(!db.has([9]).unwrap());

        {
            let mut txn = db.begin_transaction();
            txn.put([9], [9]);
            // Dropped without commit
        }
        assert!(!db.has([9]).unwrap());
    }
}
