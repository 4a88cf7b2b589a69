pub(crate) mod builder;
pub(crate) mod selector;

pub use kestrel_mining_errors::block_template::{BuilderError, BuilderResult};
