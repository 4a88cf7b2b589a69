pub mod utxo_collection;
pub mod utxo_diff;
pub mod utxo_error;
pub mod utxo_view;
