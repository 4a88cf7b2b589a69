pub(crate) mod map;
pub(crate) mod orphan_pool;
pub(crate) mod pool;
pub(crate) mod transactions_pool;
pub(crate) mod tx;
pub(crate) mod utxo_set;
