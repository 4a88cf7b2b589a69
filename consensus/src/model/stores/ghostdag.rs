use crate::processes::ghostdag::ordering::SortableBlock;

use kestrel_consensus_core::{
    BlockHashMap, BlockHasher, BlueWorkType, HashKTypeMap, HashMapCustomHasher, KType, blockhash::BlockHashes,
    trusted::ExternalGhostdagData,
};
use kestrel_database::prelude::{CachedDbAccess, DB, DbWriter, StoreError};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use itertools::EitherOrBoth::{Both, Left, Right};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GhostdagData {
    pub blue_score: u64,
    pub blue_work: BlueWorkType,
    pub selected_parent: Hash,
    pub mergeset_blues: BlockHashes,
    pub mergeset_reds: BlockHashes,
    pub blues_anticone_sizes: HashKTypeMap,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactGhostdagData {
    pub blue_score: u64,
    pub blue_work: BlueWorkType,
    pub selected_parent: Hash,
}

impl GhostdagData {
    pub fn new(
        blue_score: u64,
        blue_work: BlueWorkType,
        selected_parent: Hash,
        mergeset_blues: BlockHashes,
        mergeset_reds: BlockHashes,
        blues_anticone_sizes: HashKTypeMap,
    ) -> Self {
        Self { blue_score, blue_work, selected_parent, mergeset_blues, mergeset_reds, blues_anticone_sizes }
    }

    pub fn new_with_selected_parent(selected_parent: Hash, k: KType) -> Self {
        let mut mergeset_blues: Vec<Hash> = Vec::with_capacity(k as usize + 1);
        let mut blues_anticone_sizes: BlockHashMap<KType> = BlockHashMap::with_capacity(k as usize);
        mergeset_blues.push(selected_parent);
        blues_anticone_sizes.insert(selected_parent, 0);

        Self {
            blue_score: Default::default(),
            blue_work: Default::default(),
            selected_parent,
            mergeset_blues: BlockHashes::new(mergeset_blues),
            mergeset_reds: Default::default(),
            blues_anticone_sizes: HashKTypeMap::new(blues_anticone_sizes),
        }
    }

    /// The data of genesis or of a block whose past is unknown (ORIGIN as the selected parent)
    pub fn new_root(blue_work: BlueWorkType, selected_parent: Hash) -> Self {
        Self {
            blue_score: 0,
            blue_work,
            selected_parent,
            mergeset_blues: Default::default(),
            mergeset_reds: Default::default(),
            blues_anticone_sizes: Default::default(),
        }
    }

    pub fn mergeset_size(&self) -> usize {
        self.mergeset_blues.len() + self.mergeset_reds.len()
    }

    /// Returns an iterator to the mergeset in ascending blue work order (tie-breaking by hash)
    pub fn ascending_mergeset_without_selected_parent<'a>(
        &'a self,
        store: &'a (impl GhostdagStoreReader + ?Sized),
    ) -> impl Iterator<Item = SortableBlock> + 'a {
        let sortable = move |h: Hash| SortableBlock::new(h, store.get_blue_work(h).expect("mergeset blocks have ghostdag data"));
        self.mergeset_blues
            .iter()
            .skip(1) // Skip the selected parent
            .cloned()
            .map(sortable)
            .merge_join_by(self.mergeset_reds.iter().cloned().map(sortable), |a, b| a.cmp(b))
            .map(|r| match r {
                Left(b) | Right(b) => b,
                Both(_, _) => panic!("distinct blocks are never equal"),
            })
    }

    /// Returns an iterator to the mergeset in descending blue work order (tie-breaking by hash)
    pub fn descending_mergeset_without_selected_parent<'a>(
        &'a self,
        store: &'a (impl GhostdagStoreReader + ?Sized),
    ) -> impl Iterator<Item = SortableBlock> + 'a {
        let sortable = move |h: Hash| SortableBlock::new(h, store.get_blue_work(h).expect("mergeset blocks have ghostdag data"));
        self.mergeset_blues
            .iter()
            .skip(1)
            .rev()
            .cloned()
            .map(sortable)
            .merge_join_by(self.mergeset_reds.iter().rev().cloned().map(sortable), |a, b| b.cmp(a))
            .map(|r| match r {
                Left(b) | Right(b) => b,
                Both(_, _) => panic!("distinct blocks are never equal"),
            })
    }

    /// The order in which mergeset blocks are applied to the UTXO state: the selected parent
    /// first, then the rest of the mergeset by ascending blue work
    pub fn consensus_ordered_mergeset<'a>(
        &'a self,
        store: &'a (impl GhostdagStoreReader + ?Sized),
    ) -> impl Iterator<Item = Hash> + 'a {
        self.mergeset_blues.first().cloned().into_iter().chain(self.ascending_mergeset_without_selected_parent(store).map(|s| s.hash))
    }

    pub fn consensus_ordered_mergeset_without_selected_parent<'a>(
        &'a self,
        store: &'a (impl GhostdagStoreReader + ?Sized),
    ) -> impl Iterator<Item = Hash> + 'a {
        self.ascending_mergeset_without_selected_parent(store).map(|s| s.hash)
    }

    pub fn unordered_mergeset_without_selected_parent(&self) -> impl Iterator<Item = Hash> + '_ {
        self.mergeset_blues.iter().skip(1).cloned().chain(self.mergeset_reds.iter().cloned())
    }

    pub fn unordered_mergeset(&self) -> impl Iterator<Item = Hash> + '_ {
        self.mergeset_blues.iter().cloned().chain(self.mergeset_reds.iter().cloned())
    }

    pub fn to_compact(&self) -> CompactGhostdagData {
        CompactGhostdagData { blue_score: self.blue_score, blue_work: self.blue_work, selected_parent: self.selected_parent }
    }
}

impl GhostdagData {
    pub fn add_blue(&mut self, block: Hash, blue_anticone_size: KType, block_blues_anticone_sizes: &BlockHashMap<KType>) {
        // Add the new blue block to mergeset blues
        BlockHashes::make_mut(&mut self.mergeset_blues).push(block);

        // Get a mut ref to internal anticone size map
        let blues_anticone_sizes = HashKTypeMap::make_mut(&mut self.blues_anticone_sizes);

        // Insert the new blue block with its blue anticone size to the map
        blues_anticone_sizes.insert(block, blue_anticone_size);

        // Insert/update map entries for blocks affected by this insertion
        for (blue, size) in block_blues_anticone_sizes {
            blues_anticone_sizes.insert(*blue, size + 1);
        }
    }

    pub fn add_red(&mut self, block: Hash) {
        BlockHashes::make_mut(&mut self.mergeset_reds).push(block);
    }

    pub fn finalize_score_and_work(&mut self, blue_score: u64, blue_work: BlueWorkType) {
        self.blue_score = blue_score;
        self.blue_work = blue_work;
    }
}

impl From<&GhostdagData> for ExternalGhostdagData {
    fn from(value: &GhostdagData) -> Self {
        Self {
            blue_score: value.blue_score,
            blue_work: value.blue_work,
            selected_parent: value.selected_parent,
            mergeset_blues: value.mergeset_blues.as_ref().clone(),
            mergeset_reds: value.mergeset_reds.as_ref().clone(),
            blues_anticone_sizes: value.blues_anticone_sizes.as_ref().clone(),
        }
    }
}

impl From<ExternalGhostdagData> for GhostdagData {
    fn from(value: ExternalGhostdagData) -> Self {
        Self {
            blue_score: value.blue_score,
            blue_work: value.blue_work,
            selected_parent: value.selected_parent,
            mergeset_blues: Arc::new(value.mergeset_blues),
            mergeset_reds: Arc::new(value.mergeset_reds),
            blues_anticone_sizes: Arc::new(value.blues_anticone_sizes),
        }
    }
}

pub trait GhostdagStoreReader {
    fn get_blue_score(&self, hash: Hash) -> Result<u64, StoreError>;
    fn get_blue_work(&self, hash: Hash) -> Result<BlueWorkType, StoreError>;
    fn get_selected_parent(&self, hash: Hash) -> Result<Hash, StoreError>;
    fn get_mergeset_blues(&self, hash: Hash) -> Result<BlockHashes, StoreError>;
    fn get_mergeset_reds(&self, hash: Hash) -> Result<BlockHashes, StoreError>;
    fn get_blues_anticone_sizes(&self, hash: Hash) -> Result<HashKTypeMap, StoreError>;

    /// Returns full block data for the requested hash
    fn get_data(&self, hash: Hash) -> Result<Arc<GhostdagData>, StoreError>;

    fn get_compact_data(&self, hash: Hash) -> Result<CompactGhostdagData, StoreError>;

    /// Check if the store contains data for the requested hash
    fn has(&self, hash: Hash) -> Result<bool, StoreError>;
}

pub trait GhostdagStore: GhostdagStoreReader {
    /// Insert GHOSTDAG data for block `hash` into the store. Note that GHOSTDAG data
    /// is added once and never modified, so no need for specific setters for each element.
    /// Blocks whose data arrived from a peer together with the pruning point are flagged `trusted`
    fn insert(&self, writer: impl DbWriter, hash: Hash, data: Arc<GhostdagData>, trusted: bool) -> Result<(), StoreError>;

    fn is_trusted(&self, hash: Hash) -> Result<bool, StoreError>;
}

/// A DB + cache implementation of `GhostdagStore` trait, with concurrency support.
#[derive(Clone)]
pub struct DbGhostdagStore {
    db: Arc<DB>,
    access: CachedDbAccess<Hash, Arc<GhostdagData>, BlockHasher>,
    trusted_access: CachedDbAccess<Hash, (), BlockHasher>,
}

impl DbGhostdagStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self {
            db: Arc::clone(&db),
            access: CachedDbAccess::new(db.clone(), cache_size, DatabaseStorePrefixes::Ghostdag.into()),
            trusted_access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::TrustedGhostdag.into()),
        }
    }

    pub fn clone_with_new_cache(&self, cache_size: u64) -> Self {
        Self::new(Arc::clone(&self.db), cache_size)
    }
}

impl GhostdagStoreReader for DbGhostdagStore {
    fn get_blue_score(&self, hash: Hash) -> Result<u64, StoreError> {
        Ok(self.access.read(hash)?.blue_score)
    }

    fn get_blue_work(&self, hash: Hash) -> Result<BlueWorkType, StoreError> {
        Ok(self.access.read(hash)?.blue_work)
    }

    fn get_selected_parent(&self, hash: Hash) -> Result<Hash, StoreError> {
        Ok(self.access.read(hash)?.selected_parent)
    }

    fn get_mergeset_blues(&self, hash: Hash) -> Result<BlockHashes, StoreError> {
        Ok(Arc::clone(&self.access.read(hash)?.mergeset_blues))
    }

    fn get_mergeset_reds(&self, hash: Hash) -> Result<BlockHashes, StoreError> {
        Ok(Arc::clone(&self.access.read(hash)?.mergeset_reds))
    }

    fn get_blues_anticone_sizes(&self, hash: Hash) -> Result<HashKTypeMap, StoreError> {
        Ok(Arc::clone(&self.access.read(hash)?.blues_anticone_sizes))
    }

    fn get_data(&self, hash: Hash) -> Result<Arc<GhostdagData>, StoreError> {
        self.access.read(hash)
    }

    fn get_compact_data(&self, hash: Hash) -> Result<CompactGhostdagData, StoreError> {
        Ok(self.access.read(hash)?.to_compact())
    }

    fn has(&self, hash: Hash) -> Result<bool, StoreError> {
        self.access.has(hash)
    }
}

impl GhostdagStore for DbGhostdagStore {
    fn insert(&self, mut writer: impl DbWriter, hash: Hash, data: Arc<GhostdagData>, trusted: bool) -> Result<(), StoreError> {
        if self.access.has(hash)? {
            return Err(StoreError::HashAlreadyExists(hash));
        }
        self.access.write(&mut writer, hash, data)?;
        if trusted {
            self.trusted_access.write(&mut writer, hash, ())?;
        }
        Ok(())
    }

    fn is_trusted(&self, hash: Hash) -> Result<bool, StoreError> {
        self.trusted_access.has(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_database::prelude::DirectDbWriter;

    #[test]
    fn test_mergeset_iterators() {
        let db = DB::new_memory();
        let store = DbGhostdagStore::new(db.clone(), 32);

        let factory = |w: u64| Arc::new(GhostdagData { blue_work: w.into(), ..Default::default() });

        // Blues
        store.insert(DirectDbWriter::new(&db), 1.into(), factory(2), false).unwrap();
        store.insert(DirectDbWriter::new(&db), 2.into(), factory(7), false).unwrap();
        store.insert(DirectDbWriter::new(&db), 3.into(), factory(11), false).unwrap();

        // Reds
        store.insert(DirectDbWriter::new(&db), 4.into(), factory(4), false).unwrap();
        store.insert(DirectDbWriter::new(&db), 5.into(), factory(9), false).unwrap();
        store.insert(DirectDbWriter::new(&db), 6.into(), factory(11), false).unwrap(); // Tie-breaking case

        let mut data = GhostdagData::new_with_selected_parent(1.into(), 5);
        data.add_blue(2.into(), Default::default(), &Default::default());
        data.add_blue(3.into(), Default::default(), &Default::default());

        data.add_red(4.into());
        data.add_red(5.into());
        data.add_red(6.into());

        let mut expected: Vec<Hash> = vec![4.into(), 2.into(), 5.into(), 3.into(), 6.into()];
        assert_eq!(expected, data.ascending_mergeset_without_selected_parent(&store).map(|b| b.hash).collect::<Vec<_>>());

        expected.reverse();
        assert_eq!(expected, data.descending_mergeset_without_selected_parent(&store).map(|b| b.hash).collect::<Vec<_>>());

        let ordered = data.consensus_ordered_mergeset(&store).collect::<Vec<_>>();
        assert_eq!(ordered[0], 1.into());
        assert_eq!(ordered.len(), data.mergeset_size());
    }

    #[test]
    fn test_insert_once_and_trusted_flag() {
        let db = DB::new_memory();
        let store = DbGhostdagStore::new(db.clone(), 8);
        let data = Arc::new(GhostdagData::new_with_selected_parent(9.into(), 3));
        store.insert(DirectDbWriter::new(&db), 10.into(), data.clone(), true).unwrap();
        assert!(matches!(store.insert(DirectDbWriter::new(&db), 10.into(), data, false), Err(StoreError::HashAlreadyExists(_))));
        assert!(store.is_trusted(10.into()).unwrap());
        assert_eq!(store.get_selected_parent(10.into()).unwrap(), 9.into());

        let external = ExternalGhostdagData::from(store.get_data(10.into()).unwrap().as_ref());
        assert_eq!(GhostdagData::from(external), *store.get_data(10.into()).unwrap());
    }
}
