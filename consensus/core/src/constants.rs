//! Transaction and block level constants shared by all networks.

pub const BLOCK_VERSION: u16 = 1;
pub const TX_VERSION: u16 = 0;
pub const MAX_TX_VERSION: u16 = TX_VERSION;
pub const LOCK_TIME_THRESHOLD: u64 = 500_000_000_000;
pub const MAX_SCRIPT_PUBLIC_KEY_VERSION: u16 = 1;
pub const SOMPI_PER_KESTREL: u64 = 100_000_000;
pub const MAX_SOMPI: u64 = 29_000_000_000 * SOMPI_PER_KESTREL;

/// MAX_TX_IN_SEQUENCE_NUM is the maximum sequence number the sequence field
/// of a transaction input can be.
pub const MAX_TX_IN_SEQUENCE_NUM: u64 = u64::MAX;

/// SEQUENCE_LOCK_TIME_MASK is a mask that extracts the relative lock time
/// when masked against the transaction input sequence number.
pub const SEQUENCE_LOCK_TIME_MASK: u64 = 0x00000000ffffffff;

/// SEQUENCE_LOCK_TIME_DISABLED is a flag that if set on a transaction
/// input's sequence number, the sequence number will not be interpreted
/// as a relative lock time.
pub const SEQUENCE_LOCK_TIME_DISABLED: u64 = 1 << 63;

/// UNACCEPTED_DAA_SCORE is used to for UtxoEntries that were created by
/// transactions in the mempool, or otherwise not-yet-accepted transactions.
pub const UNACCEPTED_DAA_SCORE: u64 = u64::MAX;
