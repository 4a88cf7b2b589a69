pub mod services;
pub mod stores;
