mod post_pow_validation;
mod pre_ghostdag_validation;
mod pre_pow_validation;
mod processor;
pub use processor::*;
