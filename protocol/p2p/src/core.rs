pub mod adaptor;
pub mod ban;
pub mod connection_handler;
pub mod hub;
pub mod payload_type;
pub mod peer;
pub mod router;
