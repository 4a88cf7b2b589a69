pub mod common;

#[cfg(test)]
pub mod daemon_integration_tests;

#[cfg(test)]
pub mod mempool_integration_tests;
