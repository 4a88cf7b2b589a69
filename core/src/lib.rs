extern crate self as kestrel_core;

pub mod log;
pub mod panic;
pub mod signals;
pub mod time;

pub use ::log::{debug, error, info, trace, warn};
