use std::time::Duration;

use crate::messages::{Payload, ReadyMessage, VerackMessage, VersionMessage};
use crate::{IncomingRoute, KestrelMessagePayloadType, Router};
use crate::{common::ProtocolError, dequeue_with_timeout, make_message};
use kestrel_core::debug;

/// Per-step timeout of the version exchange. The whole initialization is further bounded by the connection layer
const VERSION_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);

/// Implements the Kestrel peer-to-peer handshake protocol
pub struct KestrelHandshake<'a> {
    router: &'a Router,
    version_receiver: IncomingRoute,
    verack_receiver: IncomingRoute,
    ready_receiver: IncomingRoute,
}

impl<'a> KestrelHandshake<'a> {
    /// Builds the handshake object and subscribes to handshake messages
    pub fn new(router: &'a Router) -> Self {
        Self {
            router,
            version_receiver: router.subscribe(vec![KestrelMessagePayloadType::Version]),
            verack_receiver: router.subscribe(vec![KestrelMessagePayloadType::Verack]),
            ready_receiver: router.subscribe(vec![KestrelMessagePayloadType::Ready]),
        }
    }

    async fn receive_version_flow(router: &Router, version_receiver: &mut IncomingRoute) -> Result<VersionMessage, ProtocolError> {
        debug!("starting receive version flow");

        let version_message = dequeue_with_timeout!(version_receiver, Payload::Version, VERSION_EXCHANGE_TIMEOUT)?;
        debug!("accepted version message: {version_message:?}");

        let verack_message = make_message!(Payload::Verack, VerackMessage {});
        router.enqueue(verack_message).await?;

        Ok(version_message)
    }

    async fn send_version_flow(
        router: &Router,
        verack_receiver: &mut IncomingRoute,
        version_message: VersionMessage,
    ) -> Result<(), ProtocolError> {
        debug!("starting send version flow");

        debug!("sending version message: {version_message:?}");
        let version_message = make_message!(Payload::Version, version_message);
        router.enqueue(version_message).await?;

        let verack_message = dequeue_with_timeout!(verack_receiver, Payload::Verack, VERSION_EXCHANGE_TIMEOUT)?;
        debug!("accepted verack_message: {verack_message:?}");

        Ok(())
    }

    /// Exchange `Ready` messages with the peer. This is the final step of the handshake protocol and should
    /// only be called after all flows corresponding to the version exchange info are registered.
    pub async fn exchange_ready_messages(&mut self) -> Result<(), ProtocolError> {
        debug!("starting ready flow");

        let sent_ready_message = make_message!(Payload::Ready, ReadyMessage {});
        self.router.enqueue(sent_ready_message).await?;

        let recv_ready_message = dequeue_with_timeout!(self.ready_receiver, Payload::Ready, VERSION_EXCHANGE_TIMEOUT)?;
        debug!("accepted ready message: {recv_ready_message:?}");

        Ok(())
    }

    /// Performs the handshake with the peer, essentially exchanging version messages
    pub async fn handshake(&mut self, self_version_message: VersionMessage) -> Result<VersionMessage, ProtocolError> {
        // Run both send and receive flows concurrently -- this is critical in order to avoid a handshake deadlock
        let (send_res, recv_res) = tokio::join!(
            Self::send_version_flow(self.router, &mut self.verack_receiver, self_version_message),
            Self::receive_version_flow(self.router, &mut self.version_receiver)
        );
        send_res?;
        recv_res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Adaptor, ConnectionInitializer, PeerId, PeerKey, PeerProperties,
        config::P2pConfig,
        messages::{PingMessage, VersionMessage},
    };
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

    /// Runs the handshake and registers a ping route, reporting the peer version and route to the test
    struct TestInitializer {
        id: PeerId,
        network: String,
        routes: UnboundedSender<(PeerKey, VersionMessage, IncomingRoute)>,
        hold: Mutex<Vec<Arc<Router>>>,
    }

    impl TestInitializer {
        fn new(network: &str) -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<(PeerKey, VersionMessage, IncomingRoute)>) {
            let (routes, receiver) = unbounded_channel();
            (Arc::new(Self { id: PeerId::random(), network: network.to_owned(), routes, hold: Mutex::new(vec![]) }), receiver)
        }

        fn version(&self) -> VersionMessage {
            VersionMessage {
                protocol_version: 5,
                network: self.network.clone(),
                id: self.id,
                user_agent: "test".to_owned(),
                disable_relay_tx: false,
                timestamp: 0,
                address: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl ConnectionInitializer for TestInitializer {
        async fn initialize_connection(&self, router: Arc<Router>) -> Result<(), ProtocolError> {
            let mut handshake = KestrelHandshake::new(&router);
            router.start();
            let peer_version = handshake.handshake(self.version()).await?;
            if peer_version.network != self.network {
                return Err(ProtocolError::WrongNetwork(self.network.clone(), peer_version.network));
            }
            router.set_identity(peer_version.id);
            router.set_properties(Arc::new(PeerProperties { user_agent: peer_version.user_agent.clone(), ..Default::default() }));
            let pings = router.subscribe(vec![KestrelMessagePayloadType::Ping]);
            handshake.exchange_ready_messages().await?;
            self.hold.lock().push(router.clone());
            let _ = self.routes.send((router.key(), peer_version, pings));
            Ok(())
        }
    }

    /// Accepts the connection but never answers
    struct SilentInitializer;

    #[async_trait::async_trait]
    impl ConnectionInitializer for SilentInitializer {
        async fn initialize_connection(&self, router: Arc<Router>) -> Result<(), ProtocolError> {
            let mut version_route = router.subscribe(vec![KestrelMessagePayloadType::Version]);
            router.start();
            let _ = version_route.recv().await;
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handshake_over_tcp() {
        let config = P2pConfig::default();
        let (server_initializer, mut server_routes) = TestInitializer::new("kestrel-simnet");
        let (client_initializer, mut client_routes) = TestInitializer::new("kestrel-simnet");
        let server =
            Adaptor::bidirectional("127.0.0.1:0", Adaptor::new_hub(&config), server_initializer.clone(), &config).await.unwrap();
        let client = Adaptor::client_only(Adaptor::new_hub(&config), client_initializer.clone(), &config);

        let address = server.server_address().unwrap().to_string();
        let server_key = client.connect_peer_once(&address).await.unwrap();
        assert_eq!(server_key.identity(), server_initializer.id);

        let (client_key, client_version, mut client_pings) = server_routes.recv().await.unwrap();
        assert_eq!(client_key.identity(), client_initializer.id);
        assert_eq!(client_version.user_agent, "test");
        let (_, _, _server_pings) = client_routes.recv().await.unwrap();

        // Messages flow once the routes are registered
        let server_router = client_initializer.hold.lock()[0].clone();
        server_router.enqueue(make_message!(Payload::Ping, PingMessage { nonce: 9 })).await.unwrap();
        assert!(matches!(client_pings.recv().await.unwrap().payload, Payload::Ping(PingMessage { nonce: 9 })));

        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn test_network_mismatch_is_rejected() {
        let config = P2pConfig::default();
        let (server_initializer, _server_routes) = TestInitializer::new("kestrel-simnet");
        let (client_initializer, _client_routes) = TestInitializer::new("kestrel-devnet");
        let server = Adaptor::bidirectional("127.0.0.1:0", Adaptor::new_hub(&config), server_initializer, &config).await.unwrap();
        let client = Adaptor::client_only(Adaptor::new_hub(&config), client_initializer, &config);

        let address = server.server_address().unwrap().to_string();
        let err = client.connect_peer_once(&address).await.unwrap_err();
        assert!(matches!(err, crate::ConnectionError::ProtocolError(ProtocolError::WrongNetwork(..))));
        assert!(client.active_peers().is_empty());
        server.close().await;
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let config = P2pConfig { handshake_timeout: Duration::from_millis(300), ..Default::default() };
        let server =
            Adaptor::bidirectional("127.0.0.1:0", Adaptor::new_hub(&config), Arc::new(SilentInitializer), &config).await.unwrap();
        let (client_initializer, _client_routes) = TestInitializer::new("kestrel-simnet");
        let client = Adaptor::client_only(Adaptor::new_hub(&config), client_initializer, &config);

        let address = server.server_address().unwrap().to_string();
        let err = client.connect_peer_once(&address).await.unwrap_err();
        assert!(matches!(err, crate::ConnectionError::ProtocolError(ProtocolError::HandshakeTimeout(_))));
        server.close().await;
    }

    #[tokio::test]
    async fn test_banned_address_is_rejected() {
        let config = P2pConfig::default();
        let (server_initializer, _server_routes) = TestInitializer::new("kestrel-simnet");
        let (client_initializer, _client_routes) = TestInitializer::new("kestrel-simnet");
        let server_hub = Adaptor::new_hub(&config);
        server_hub.ban_manager().ban("127.0.0.1".parse().unwrap());
        let server = Adaptor::bidirectional("127.0.0.1:0", server_hub, server_initializer, &config).await.unwrap();
        let client = Adaptor::client_only(Adaptor::new_hub(&config), client_initializer, &config);

        let address = server.server_address().unwrap().to_string();
        assert!(client.connect_peer_once(&address).await.is_err());
        assert!(server.active_peers().is_empty());
        server.close().await;
    }
}
