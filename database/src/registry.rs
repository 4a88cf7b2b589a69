/// Never a valid store prefix, so it can delimit composite keys
pub const SEPARATOR: u8 = u8::MAX;

/// One byte prefix per store. Values are persisted, so variants are only ever appended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DatabaseStorePrefixes {
    // DAG topology and block data
    Headers = 1,
    HeadersCompact = 2,
    RelationsParents = 3,
    RelationsChildren = 4,
    Reachability = 5,
    ReachabilityReindexRoot = 6,
    Ghostdag = 7,
    TrustedGhostdag = 8,
    DaaMergeset = 9,
    BlockDepth = 10,
    Statuses = 11,
    BlockTransactions = 12,

    // Selected chain and tips
    HeadersSelectedTip = 20,
    Tips = 21,
    ChainHashByIndex = 22,
    ChainIndexByHash = 23,
    ChainHighestIndex = 24,

    // UTXO state
    UtxoDiffs = 30,
    UtxoDiffBases = 31,
    UtxoMultisets = 32,
    AcceptanceData = 33,
    VirtualUtxoset = 34,
    VirtualState = 35,

    // Pruning
    PruningPoint = 40,
    PastPruningPoints = 41,
    PruningUtxoset = 42,
    ImportedUtxoset = 43,
    PruningImportState = 44,

    ConsensusManifest = 100,

    Separator = SEPARATOR,
}

/// Identity table backing [`AsRef<[u8]>`] for prefixes
static PREFIX_BYTES: [u8; 256] = {
    let mut bytes = [0u8; 256];
    let mut i = 0;
    while i < bytes.len() {
        bytes[i] = i as u8;
        i += 1;
    }
    bytes
};

impl From<DatabaseStorePrefixes> for Vec<u8> {
    fn from(value: DatabaseStorePrefixes) -> Self {
        vec![value as u8]
    }
}

impl From<DatabaseStorePrefixes> for u8 {
    fn from(value: DatabaseStorePrefixes) -> Self {
        value as u8
    }
}

impl AsRef<[u8]> for DatabaseStorePrefixes {
    fn as_ref(&self) -> &[u8] {
        let index = *self as usize;
        &PREFIX_BYTES[index..index + 1]
    }
}

impl IntoIterator for DatabaseStorePrefixes {
    type Item = u8;
    type IntoIter = std::iter::Once<u8>;
    fn into_iter(self) -> Self::IntoIter {
        std::iter::once(self as u8)
    }
}
