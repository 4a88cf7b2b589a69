pub mod codec;
pub mod common;
pub mod config;
pub mod messages;

mod core;
mod handshake;

pub use crate::core::adaptor::{Adaptor, ConnectionInitializer};
pub use crate::core::ban::BanManager;
pub use crate::core::connection_handler::ConnectionError;
pub use crate::core::hub::Hub;
pub use crate::core::payload_type::KestrelMessagePayloadType;
pub use crate::core::peer::{Peer, PeerId, PeerKey, PeerProperties};
pub use crate::core::router::{DEFAULT_ROUTE_CAPACITY, IncomingRoute, Router};
pub use handshake::KestrelHandshake;
