pub mod block_depth;
pub mod coinbase;
pub mod difficulty;
pub mod ghostdag;
pub mod parents_builder;
pub mod past_median_time;
pub mod pruning;
pub mod pruning_proof;
pub mod reachability;
pub mod sync;
pub mod transaction_validator;
pub mod traversal_manager;
pub mod window;
