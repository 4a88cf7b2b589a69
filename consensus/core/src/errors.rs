pub mod block;
pub mod coinbase;
pub mod consensus;
pub mod difficulty;
pub mod pruning;
pub mod sync;
pub mod traversal;
pub mod tx;
