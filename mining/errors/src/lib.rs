pub mod block_template;
pub mod manager;
pub mod mempool;
