use crate::common::ProtocolError;
use crate::config::P2pConfig;
use crate::core::ban::BanManager;
use crate::core::connection_handler::{ConnectionError, ConnectionHandler};
use crate::core::hub::Hub;
use crate::core::peer::{Peer, PeerKey};
use crate::{Router, messages::KestrelMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::channel as mpsc_channel;

/// The main entrypoint for external usage of the P2P library. An impl of this trait is expected on P2P server
/// initialization and will be called on each new (in/out) P2P connection with a corresponding dedicated new router
#[async_trait::async_trait]
pub trait ConnectionInitializer: Sync + Send {
    async fn initialize_connection(&self, new_router: Arc<Router>) -> Result<(), ProtocolError>;
}

/// The main object to create for managing a fully-fledged Kestrel P2P peer
pub struct Adaptor {
    //
    // Internal design & resource management: management of active peers was extracted to the `Hub` object
    // in order to decouple the memory usage from the `ConnectionHandler` and avoid indirect reference cycles.
    // When the adaptor is closed the server listener exits, dropping its handler and thus a `hub_sender`.
    //
    /// Stops the server listener, if one was started
    server_termination: triggered::Trigger,

    /// The address the server listens on, if one was started
    server_address: Option<SocketAddr>,

    /// An object for creating new outbound connections as well as handling new connections coming from a server
    connection_handler: ConnectionHandler,

    /// An object for managing a list of active routers (peers), and allowing them to indirectly interact
    hub: Hub,
}

impl Adaptor {
    /// Creates a P2P adaptor with only client-side support. Typical Kestrel nodes should use `Adaptor::bidirectional`
    pub fn client_only(hub: Hub, initializer: Arc<dyn ConnectionInitializer>, config: &P2pConfig) -> Arc<Self> {
        let (hub_sender, hub_receiver) = mpsc_channel(128);
        let connection_handler = ConnectionHandler::new(hub_sender, initializer.clone(), config.handshake_timeout);
        let (server_termination, _) = triggered::trigger();
        hub.clone().start_event_loop(hub_receiver, initializer, config.handshake_timeout);
        Arc::new(Self { server_termination, server_address: None, connection_handler, hub })
    }

    /// Creates a bidirectional P2P adaptor with a server serving at `serve_address` and with client support
    pub async fn bidirectional(
        serve_address: &str,
        hub: Hub,
        initializer: Arc<dyn ConnectionInitializer>,
        config: &P2pConfig,
    ) -> Result<Arc<Self>, ConnectionError> {
        let (hub_sender, hub_receiver) = mpsc_channel(128);
        let connection_handler = ConnectionHandler::new(hub_sender, initializer.clone(), config.handshake_timeout);
        let (server_termination, server_listener) = triggered::trigger();
        let server_address = connection_handler.serve(serve_address, server_listener).await?;
        hub.clone().start_event_loop(hub_receiver, initializer, config.handshake_timeout);
        Ok(Arc::new(Self { server_termination, server_address: Some(server_address), connection_handler, hub }))
    }

    /// Builds the hub shared by the adaptor and the connection initializer
    pub fn new_hub(config: &P2pConfig) -> Hub {
        Hub::new(Arc::new(BanManager::new(config.clone())))
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        self.server_address
    }

    /// Connect to a new peer
    pub async fn connect_peer(&self, peer_address: &str) -> Result<PeerKey, ConnectionError> {
        self.connection_handler.connect_with_retry(peer_address, 16, Duration::from_secs(2)).await.map(|r| r.key())
    }

    /// Connect to a new peer without retrying
    pub async fn connect_peer_once(&self, peer_address: &str) -> Result<PeerKey, ConnectionError> {
        self.connection_handler.connect(peer_address).await.map(|r| r.key())
    }

    /// Send a message to a specific peer
    pub async fn send(&self, peer_key: PeerKey, msg: KestrelMessage) -> Result<bool, ProtocolError> {
        self.hub.send(peer_key, msg).await
    }

    /// Broadcast a message to all peers. Note that broadcast can also be called on a specific router and will lead to the same outcome
    pub async fn broadcast(&self, msg: KestrelMessage) {
        self.hub.broadcast(msg).await
    }

    /// Terminate a specific peer
    pub async fn terminate(&self, peer_key: PeerKey) {
        self.hub.terminate(peer_key).await
    }

    /// Terminate all peers
    pub async fn terminate_all_peers(&self) {
        self.hub.terminate_all_peers().await
    }

    /// Returns a list of all currently active peers
    pub fn active_peers(&self) -> Vec<Peer> {
        self.hub.active_peers()
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Stops accepting connections, terminates all peers and cleans up any additional async resources
    pub async fn close(&self) {
        self.server_termination.trigger();
        self.terminate_all_peers().await;
    }
}
