pub use kestrel_mining_errors::{
    block_template::{BuilderError, BuilderResult},
    manager::{MiningManagerError, MiningManagerResult},
};
