pub mod orphans;
pub mod process_queue;
pub mod transactions;
