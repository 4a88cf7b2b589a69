use std::sync::Arc;

use kestrel_consensus_core::{BlockHasher, BlockLevel, header::Header};
use kestrel_database::prelude::{CachedDbAccess, DB, DbWriter, StoreError};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use serde::{Deserialize, Serialize};

pub trait HeaderStoreReader {
    fn get_daa_score(&self, hash: Hash) -> Result<u64, StoreError>;
    fn get_blue_score(&self, hash: Hash) -> Result<u64, StoreError>;
    fn get_timestamp(&self, hash: Hash) -> Result<u64, StoreError>;
    fn get_bits(&self, hash: Hash) -> Result<u32, StoreError>;
    fn get_header(&self, hash: Hash) -> Result<Arc<Header>, StoreError>;
    fn get_header_with_block_level(&self, hash: Hash) -> Result<HeaderWithBlockLevel, StoreError>;
    fn get_compact_header_data(&self, hash: Hash) -> Result<CompactHeaderData, StoreError>;
    fn has(&self, hash: Hash) -> Result<bool, StoreError>;
}

pub trait HeaderStore: HeaderStoreReader {
    // This is append only
    fn insert(&self, writer: impl DbWriter, hash: Hash, header: Arc<Header>, block_level: BlockLevel) -> Result<(), StoreError>;
}

#[derive(Clone, Serialize, Deserialize)]
pub struct HeaderWithBlockLevel {
    pub header: Arc<Header>,
    pub block_level: BlockLevel,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CompactHeaderData {
    pub daa_score: u64,
    pub timestamp: u64,
    pub bits: u32,
    pub blue_score: u64,
}

impl From<&Header> for CompactHeaderData {
    fn from(header: &Header) -> Self {
        Self { daa_score: header.daa_score, timestamp: header.timestamp, bits: header.bits, blue_score: header.blue_score }
    }
}

/// A DB + cache implementation of `HeaderStore` trait, with concurrency support.
#[derive(Clone)]
pub struct DbHeadersStore {
    db: Arc<DB>,
    compact_headers_access: CachedDbAccess<Hash, CompactHeaderData, BlockHasher>,
    headers_access: CachedDbAccess<Hash, HeaderWithBlockLevel, BlockHasher>,
}

impl DbHeadersStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self {
            db: Arc::clone(&db),
            // Compact data is tiny so it gets a proportionally larger cache
            compact_headers_access: CachedDbAccess::new(db.clone(), cache_size * 16, DatabaseStorePrefixes::HeadersCompact.into()),
            headers_access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::Headers.into()),
        }
    }

    pub fn clone_with_new_cache(&self, cache_size: u64) -> Self {
        Self::new(Arc::clone(&self.db), cache_size)
    }

    /// Iterates all stored headers. Used by consistency checks and by the tooling which rebuilds indexes
    pub fn iter_hashes(&self) -> impl Iterator<Item = Result<Hash, StoreError>> + '_ {
        self.compact_headers_access.iterator().map(|item| {
            let (key, _) = item?;
            Hash::try_from_slice(&key).ok_or_else(|| StoreError::DataInconsistency("malformed header key".to_string()))
        })
    }
}

impl HeaderStoreReader for DbHeadersStore {
    fn get_daa_score(&self, hash: Hash) -> Result<u64, StoreError> {
        Ok(self.get_compact_header_data(hash)?.daa_score)
    }

    fn get_blue_score(&self, hash: Hash) -> Result<u64, StoreError> {
        Ok(self.get_compact_header_data(hash)?.blue_score)
    }

    fn get_timestamp(&self, hash: Hash) -> Result<u64, StoreError> {
        Ok(self.get_compact_header_data(hash)?.timestamp)
    }

    fn get_bits(&self, hash: Hash) -> Result<u32, StoreError> {
        Ok(self.get_compact_header_data(hash)?.bits)
    }

    fn get_header(&self, hash: Hash) -> Result<Arc<Header>, StoreError> {
        Ok(self.headers_access.read(hash)?.header)
    }

    fn get_header_with_block_level(&self, hash: Hash) -> Result<HeaderWithBlockLevel, StoreError> {
        self.headers_access.read(hash)
    }

    fn get_compact_header_data(&self, hash: Hash) -> Result<CompactHeaderData, StoreError> {
        if let Some(header_with_level) = self.headers_access.read_from_cache(hash) {
            return Ok(header_with_level.header.as_ref().into());
        }
        self.compact_headers_access.read(hash)
    }

    fn has(&self, hash: Hash) -> Result<bool, StoreError> {
        self.compact_headers_access.has(hash)
    }
}

impl HeaderStore for DbHeadersStore {
    fn insert(&self, mut writer: impl DbWriter, hash: Hash, header: Arc<Header>, block_level: BlockLevel) -> Result<(), StoreError> {
        if self.headers_access.has(hash)? {
            return Err(StoreError::HashAlreadyExists(hash));
        }
        self.compact_headers_access.write(&mut writer, hash, header.as_ref().into())?;
        self.headers_access.write(&mut writer, hash, HeaderWithBlockLevel { header, block_level })?;
        Ok(())
    }
}
