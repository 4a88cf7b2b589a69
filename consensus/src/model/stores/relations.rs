use kestrel_consensus_core::{BlockHasher, blockhash::BlockHashes};
use kestrel_database::prelude::{CachedDbAccess, DB, DbKey, DbWriter, StoreError};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::{HASH_SIZE, Hash};
use std::sync::Arc;

/// Reader API for `RelationsStore`.
pub trait RelationsStoreReader {
    fn get_parents(&self, hash: Hash) -> Result<BlockHashes, StoreError>;
    fn get_children(&self, hash: Hash) -> Result<BlockHashes, StoreError>;
    fn has(&self, hash: Hash) -> Result<bool, StoreError>;
}

/// Write API for `RelationsStore`. Relations are append-only
pub trait RelationsStore: RelationsStoreReader {
    /// Inserts `parents` for `hash` and registers `hash` as a child of each of them
    fn insert(&self, writer: impl DbWriter, hash: Hash, parents: BlockHashes) -> Result<(), StoreError>;
}

/// Child entries are keyed by `parent || child` so that registering a child never requires
/// reading the current children list
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct ParentChildKey([u8; 2 * HASH_SIZE]);

impl ParentChildKey {
    fn new(parent: Hash, child: Hash) -> Self {
        let mut bytes = [0u8; 2 * HASH_SIZE];
        bytes[..HASH_SIZE].copy_from_slice(parent.as_bytes().as_slice());
        bytes[HASH_SIZE..].copy_from_slice(child.as_bytes().as_slice());
        Self(bytes)
    }
}

impl AsRef<[u8]> for ParentChildKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A DB + cache implementation of `RelationsStore` trait, with concurrent readers support.
#[derive(Clone)]
pub struct DbRelationsStore {
    parents_access: CachedDbAccess<Hash, BlockHashes, BlockHasher>,
    children_access: CachedDbAccess<ParentChildKey, ()>,
}

impl DbRelationsStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self {
            parents_access: CachedDbAccess::new(db.clone(), cache_size, DatabaseStorePrefixes::RelationsParents.into()),
            // Children are always read through a bucket scan, so the entry cache is kept minimal
            children_access: CachedDbAccess::new(db, 0, DatabaseStorePrefixes::RelationsChildren.into()),
        }
    }
}

impl RelationsStoreReader for DbRelationsStore {
    fn get_parents(&self, hash: Hash) -> Result<BlockHashes, StoreError> {
        self.parents_access.read(hash)
    }

    fn get_children(&self, hash: Hash) -> Result<BlockHashes, StoreError> {
        if !self.parents_access.has(hash)? {
            return Err(StoreError::KeyNotFound(DbKey::new(self.parents_access.prefix(), hash)));
        }
        let bucket = hash.as_bytes();
        let mut children = Vec::new();
        for item in self.children_access.seek_iterator(Some(bucket.as_slice()), None, usize::MAX, false) {
            let (key, _) = item?;
            let child = Hash::try_from_slice(&key[HASH_SIZE..])
                .ok_or_else(|| StoreError::DataInconsistency(format!("malformed child key under parent {hash}")))?;
            children.push(child);
        }
        Ok(BlockHashes::new(children))
    }

    fn has(&self, hash: Hash) -> Result<bool, StoreError> {
        self.parents_access.has(hash)
    }
}

impl RelationsStore for DbRelationsStore {
    fn insert(&self, mut writer: impl DbWriter, hash: Hash, parents: BlockHashes) -> Result<(), StoreError> {
        if self.parents_access.has(hash)? {
            return Err(StoreError::HashAlreadyExists(hash));
        }
        for parent in parents.iter().copied() {
            self.children_access.write(&mut writer, ParentChildKey::new(parent, hash), ())?;
        }
        self.parents_access.write(&mut writer, hash, parents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_database::prelude::{DirectDbWriter, StagingArea};

    #[test]
    fn test_relations_children_accumulate() {
        let db = DB::new_memory();
        let store = DbRelationsStore::new(db.clone(), 16);
        store.insert(DirectDbWriter::new(&db), 1.into(), BlockHashes::new(vec![])).unwrap();

        let area = StagingArea::new();
        store.insert(&area, 2.into(), BlockHashes::new(vec![1.into()])).unwrap();
        store.insert(&area, 3.into(), BlockHashes::new(vec![1.into()])).unwrap();
        store.insert(&area, 4.into(), BlockHashes::new(vec![2.into(), 3.into()])).unwrap();
        area.commit_to_db(&db).unwrap();

        let mut children = store.get_children(1.into()).unwrap().to_vec();
        children.sort();
        assert_eq!(children, vec![2.into(), 3.into()]);
        assert_eq!(store.get_children(2.into()).unwrap().as_slice(), &[4.into()]);
        assert!(store.get_children(4.into()).unwrap().is_empty());
        assert_eq!(store.get_parents(4.into()).unwrap().len(), 2);
        assert!(store.get_children(9.into()).unwrap_err().is_key_not_found());
        assert!(store.insert(DirectDbWriter::new(&db), 4.into(), BlockHashes::new(vec![])).unwrap_err().is_already_exists());
    }
}
