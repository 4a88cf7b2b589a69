use kestrel_consensus_core::{
    tx::{TransactionOutpoint, UtxoEntry},
    utxo::{utxo_diff::ImmutableUtxoDiff, utxo_view::UtxoView},
};
use kestrel_database::prelude::{CachedDbAccess, DB, DbWriter, StoreError, StoreResult, StoreResultExt};
use kestrel_hashes::{HASH_SIZE, Hash};
use std::{fmt::Display, sync::Arc};

pub trait UtxoSetStoreReader {
    fn get(&self, outpoint: &TransactionOutpoint) -> StoreResult<UtxoEntry>;

    /// Returns up to `limit` entries in key order, starting at `from_outpoint` (or at the first key)
    fn seek_iterator(
        &self,
        from_outpoint: Option<TransactionOutpoint>,
        limit: usize,
        skip_first: bool,
    ) -> StoreResult<Vec<(TransactionOutpoint, UtxoEntry)>>;
}

pub trait UtxoSetStore: UtxoSetStoreReader {
    /// Updates the store according to the UTXO diff, adding and deleting entries correspondingly.
    /// `self` is `mut` since concurrent writers would interfere with cache consistency
    fn write_diff(&mut self, writer: impl DbWriter, utxo_diff: &impl ImmutableUtxoDiff) -> StoreResult<()>;
    fn write_many(&mut self, writer: impl DbWriter, utxos: &[(TransactionOutpoint, UtxoEntry)]) -> StoreResult<()>;
    fn clear(&mut self, writer: impl DbWriter) -> StoreResult<()>;
}

pub const UTXO_KEY_SIZE: usize = HASH_SIZE + size_of::<u32>();

/// `transaction id || big-endian output index`, so that the outputs of a transaction are adjacent and ordered
#[derive(Eq, Hash, PartialEq, Debug, Copy, Clone)]
struct UtxoKey([u8; UTXO_KEY_SIZE]);

impl AsRef<[u8]> for UtxoKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for UtxoKey {
    type Error = StoreError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        <[u8; UTXO_KEY_SIZE]>::try_from(slice)
            .map(Self)
            .map_err(|_| StoreError::DataInconsistency(format!("utxo key of length {} is malformed", slice.len())))
    }
}

impl From<TransactionOutpoint> for UtxoKey {
    fn from(outpoint: TransactionOutpoint) -> Self {
        let mut bytes = [0; UTXO_KEY_SIZE];
        bytes[..HASH_SIZE].copy_from_slice(&outpoint.transaction_id.as_bytes());
        bytes[HASH_SIZE..].copy_from_slice(&outpoint.index.to_be_bytes());
        Self(bytes)
    }
}

impl From<UtxoKey> for TransactionOutpoint {
    fn from(key: UtxoKey) -> Self {
        let mut id = [0; HASH_SIZE];
        id.copy_from_slice(&key.0[..HASH_SIZE]);
        let mut index = [0; 4];
        index.copy_from_slice(&key.0[HASH_SIZE..]);
        Self::new(Hash::from_bytes(id), u32::from_be_bytes(index))
    }
}

impl Display for UtxoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        TransactionOutpoint::from(*self).fmt(f)
    }
}

/// A persistent UTXO set. The same layout serves the virtual UTXO set, the pruning point
/// UTXO set and the set being imported during IBD, each under its own prefix
#[derive(Clone)]
pub struct DbUtxoSetStore {
    access: CachedDbAccess<UtxoKey, Arc<UtxoEntry>>,
}

impl DbUtxoSetStore {
    pub fn new(db: Arc<DB>, cache_size: u64, prefix: Vec<u8>) -> Self {
        Self { access: CachedDbAccess::new(db, cache_size, prefix) }
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.seek_iterator(None, 1, false)?.is_empty())
    }

    /// Iterates the full set. Intended for offline consistency checks and tests
    pub fn iterator(&self) -> impl Iterator<Item = StoreResult<(TransactionOutpoint, UtxoEntry)>> + '_ {
        self.access.iterator().map(|item| {
            let (key, entry) = item?;
            let outpoint: TransactionOutpoint = UtxoKey::try_from(key.as_ref())?.into();
            Ok((outpoint, entry.as_ref().clone()))
        })
    }
}

impl UtxoView for DbUtxoSetStore {
    fn get(&self, outpoint: &TransactionOutpoint) -> Option<UtxoEntry> {
        UtxoSetStoreReader::get(self, outpoint).optional().ok().flatten()
    }
}

impl UtxoSetStoreReader for DbUtxoSetStore {
    fn get(&self, outpoint: &TransactionOutpoint) -> StoreResult<UtxoEntry> {
        Ok(self.access.read((*outpoint).into())?.as_ref().clone())
    }

    fn seek_iterator(
        &self,
        from_outpoint: Option<TransactionOutpoint>,
        limit: usize,
        skip_first: bool,
    ) -> StoreResult<Vec<(TransactionOutpoint, UtxoEntry)>> {
        let seek_key = from_outpoint.map(UtxoKey::from);
        self.access
            .seek_iterator(None, seek_key, limit, skip_first)
            .map(|item| {
                let (key, entry) = item?;
                let outpoint: TransactionOutpoint = UtxoKey::try_from(key.as_ref())?.into();
                Ok((outpoint, entry.as_ref().clone()))
            })
            .collect()
    }
}

impl UtxoSetStore for DbUtxoSetStore {
    fn write_diff(&mut self, mut writer: impl DbWriter, utxo_diff: &impl ImmutableUtxoDiff) -> StoreResult<()> {
        self.access.delete_many(&mut writer, utxo_diff.removed().keys().map(|o| (*o).into()))?;
        self.access.write_many(&mut writer, utxo_diff.added().iter().map(|(o, e)| ((*o).into(), Arc::new(e.clone()))))
    }

    fn write_many(&mut self, writer: impl DbWriter, utxos: &[(TransactionOutpoint, UtxoEntry)]) -> StoreResult<()> {
        self.access.write_many(writer, utxos.iter().map(|(o, e)| ((*o).into(), Arc::new(e.clone()))))
    }

    fn clear(&mut self, writer: impl DbWriter) -> StoreResult<()> {
        self.access.delete_all(writer)
    }
}
