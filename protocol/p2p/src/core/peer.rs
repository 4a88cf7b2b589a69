use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    hash::Hash,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Instant,
};
use uuid::Uuid;

/// The identity a node announces in its version message
#[derive(Debug, Copy, Clone, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PeerProperties {
    pub user_agent: String,
    pub advertised_protocol_version: u32,
    pub protocol_version: u32,
    pub disable_relay_tx: bool,
    /// Difference between the peer clock and ours, in milliseconds
    pub time_offset: i64,
    /// The address the peer listens on, if it announced one
    pub listen_address: Option<SocketAddr>,
}

#[derive(Debug, Clone)]
pub struct Peer {
    identity: PeerId,
    net_address: SocketAddr,
    is_outbound: bool,
    connection_started: Instant,
    properties: Arc<PeerProperties>,
    last_ping_duration: u64,
}

impl Peer {
    pub fn new(
        identity: PeerId,
        net_address: SocketAddr,
        is_outbound: bool,
        connection_started: Instant,
        properties: Arc<PeerProperties>,
        last_ping_duration: u64,
    ) -> Self {
        Self { identity, net_address, is_outbound, connection_started, properties, last_ping_duration }
    }

    /// Internal identity of this peer
    pub fn identity(&self) -> PeerId {
        self.identity
    }

    /// The socket address of this peer
    pub fn net_address(&self) -> SocketAddr {
        self.net_address
    }

    pub fn key(&self) -> PeerKey {
        self.into()
    }

    /// Indicates whether this connection is an outbound connection
    pub fn is_outbound(&self) -> bool {
        self.is_outbound
    }

    pub fn time_connected(&self) -> u64 {
        Instant::now().duration_since(self.connection_started).as_millis() as u64
    }

    pub fn properties(&self) -> Arc<PeerProperties> {
        self.properties.clone()
    }

    pub fn last_ping_duration(&self) -> u64 {
        self.last_ping_duration
    }
}

#[derive(Debug, Copy, Clone)]
pub struct PeerKey {
    identity: PeerId,
    ip: IpAddr,
    /// port is ignored for equality and hashing, but useful for reconstructing the socket address from the key only.
    port: u16,
}

impl PeerKey {
    pub fn new(identity: PeerId, ip: IpAddr, port: u16) -> Self {
        Self { identity, ip, port }
    }

    pub fn identity(&self) -> PeerId {
        self.identity
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn sock_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl Hash for PeerKey {
    // Custom hash implementation that ignores port
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
        self.ip.hash(state);
    }
}

impl PartialEq for PeerKey {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity && self.ip == other.ip
    }
}

impl Eq for PeerKey {}

impl From<&Peer> for PeerKey {
    fn from(value: &Peer) -> Self {
        Self::new(value.identity, value.net_address.ip(), value.net_address.port())
    }
}

impl Display for PeerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.identity, self.ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_peer_key_ignores_port() {
        let id = PeerId::random();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let mut keys = HashSet::new();
        keys.insert(PeerKey::new(id, ip, 1000));
        assert!(keys.contains(&PeerKey::new(id, ip, 2000)));
        assert!(!keys.contains(&PeerKey::new(PeerId::random(), ip, 1000)));
        assert_eq!(PeerKey::new(id, ip, 2000).sock_addr().port(), 2000);
    }
}
