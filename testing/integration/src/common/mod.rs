pub mod daemon;
pub mod utils;
