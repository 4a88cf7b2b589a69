use crate::codec::CodecError;
use crate::common::{DEFAULT_TIMEOUT, ProtocolError};
use crate::core::hub::HubEvent;
use crate::core::peer::{Peer, PeerId, PeerKey, PeerProperties};
use crate::messages::{KestrelMessage, Payload, RejectMessage};
use crate::{KestrelMessagePayloadType, make_message};
use futures::{Stream, StreamExt};
use kestrel_core::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use std::{collections::HashMap, sync::Arc};
use tokio::select;
use tokio::sync::mpsc::{Receiver as MpscReceiver, Sender as MpscSender, channel as mpsc_channel};
use tokio::sync::oneshot::{Sender as OneshotSender, channel as oneshot_channel};

pub type IncomingRoute = MpscReceiver<KestrelMessage>;

/// Capacity of each incoming flow route. Streams of consecutive responses (such as IBD block batches)
/// must stay below it
pub const DEFAULT_ROUTE_CAPACITY: usize = 512;

/// How long the receive loop waits for a full flow route to make room before giving up on the peer
const INCOMING_ROUTE_TIMEOUT: Duration = DEFAULT_TIMEOUT;

#[derive(Debug)]
struct RouterMutableState {
    /// Used on router init to signal the router receive loop to start listening
    start_signal: Option<OneshotSender<()>>,

    closed: bool,
}

/// A router object for managing the communication to a network peer. It is named a router because it's responsible
/// for internally routing messages to P2P flows based on registration and message types
pub struct Router {
    /// Identity of this peer, random until the peer announces its own during the handshake
    identity: RwLock<PeerId>,

    /// The socket address of this peer
    net_address: SocketAddr,

    /// Indicates whether this connection is an outbound connection
    is_outbound: bool,

    connection_started: Instant,

    properties: RwLock<Arc<PeerProperties>>,

    last_ping_duration: AtomicU64,

    /// Routing map for mapping messages to subscribed flows
    routing_map: RwLock<HashMap<KestrelMessagePayloadType, MpscSender<KestrelMessage>>>,

    /// The outgoing route for sending messages to this peer
    outgoing_route: MpscSender<KestrelMessage>,

    /// A channel sender for internal event management. Used to send information from each router to a central hub object
    hub_sender: MpscSender<HubEvent>,

    /// Used for managing router mutable state
    mutable_state: Mutex<RouterMutableState>,

    /// Fired once on close, stops both the receive loop and the connection writer
    shutdown_trigger: triggered::Trigger,
    shutdown_listener: triggered::Listener,
}

impl Display for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.net_address)
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("identity", &self.identity()).field("net_address", &self.net_address).finish()
    }
}

impl From<&Router> for Peer {
    fn from(router: &Router) -> Self {
        Peer::new(
            router.identity(),
            router.net_address,
            router.is_outbound,
            router.connection_started,
            router.properties(),
            router.last_ping_duration(),
        )
    }
}

impl Router {
    pub(crate) fn new<S>(
        net_address: SocketAddr,
        is_outbound: bool,
        hub_sender: MpscSender<HubEvent>,
        mut incoming_stream: S,
        outgoing_route: MpscSender<KestrelMessage>,
    ) -> Arc<Self>
    where
        S: Stream<Item = Result<KestrelMessage, CodecError>> + Send + Unpin + 'static,
    {
        let (start_sender, start_receiver) = oneshot_channel();
        let (shutdown_trigger, shutdown_listener) = triggered::trigger();

        let router = Arc::new(Router {
            identity: RwLock::new(PeerId::random()),
            net_address,
            is_outbound,
            connection_started: Instant::now(),
            properties: Default::default(),
            last_ping_duration: AtomicU64::new(0),
            routing_map: RwLock::new(HashMap::new()),
            outgoing_route,
            hub_sender,
            mutable_state: Mutex::new(RouterMutableState { start_signal: Some(start_sender), closed: false }),
            shutdown_trigger,
            shutdown_listener: shutdown_listener.clone(),
        });

        let router_clone = router.clone();
        // Start the router receive loop
        tokio::spawn(async move {
            // Wait for a start signal before entering the receive loop
            let _ = start_receiver.await;
            loop {
                select! {
                    biased; // We use biased polling so that the shutdown signal is always checked first

                    _ = shutdown_listener.clone() => {
                        debug!(
                            "P2P, Router receive loop - shutdown signal received, exiting router receive loop, router-id: {}",
                            router.identity()
                        );
                        break;
                    }

                    res = incoming_stream.next() => match res {
                        Some(Ok(msg)) => {
                            trace!(
                                "P2P, Router receive loop - got message: {:?}, router-id: {}",
                                KestrelMessagePayloadType::from(&msg.payload),
                                router.identity()
                            );
                            if let Payload::Reject(reject) = &msg.payload {
                                let err = ProtocolError::from_reject_message(reject.reason.clone());
                                if matches!(err, ProtocolError::IgnorableReject(_)) {
                                    debug!("P2P, Router receive loop - peer {} rejected the connection: {}", router, err);
                                } else {
                                    info!("P2P, Router receive loop - peer {} rejected the connection: {}", router, err);
                                }
                                break;
                            }
                            if let Err(err) = router.route_to_flow(msg).await {
                                warn!("P2P, Router receive loop - {} - exiting loop, router-id: {}", err, router.identity());
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            let err = ProtocolError::from(err);
                            warn!("P2P, Router receive loop - {} from peer {}", err, router);
                            router.try_sending_reject_message(&err).await;
                            router.report_offense(err).await;
                            break;
                        }
                        None => {
                            info!("P2P, Router receive loop - incoming stream ended for peer {}", router);
                            break;
                        }
                    }
                }
            }
            router.close().await;
            debug!("P2P, Router receive loop - exited, router-id: {}, router refs: {}", router.identity(), Arc::strong_count(&router));
        });

        router_clone
    }

    /// Internal identity of this peer
    pub fn identity(&self) -> PeerId {
        *self.identity.read()
    }

    pub fn set_identity(&self, identity: PeerId) {
        *self.identity.write() = identity;
    }

    pub fn key(&self) -> PeerKey {
        PeerKey::new(self.identity(), self.net_address.ip(), self.net_address.port())
    }

    /// The socket address of this peer
    pub fn net_address(&self) -> SocketAddr {
        self.net_address
    }

    /// Indicates whether this connection is an outbound connection
    pub fn is_outbound(&self) -> bool {
        self.is_outbound
    }

    pub fn properties(&self) -> Arc<PeerProperties> {
        self.properties.read().clone()
    }

    pub fn set_properties(&self, properties: Arc<PeerProperties>) {
        *self.properties.write() = properties;
    }

    pub fn last_ping_duration(&self) -> u64 {
        self.last_ping_duration.load(Ordering::Relaxed)
    }

    pub fn set_last_ping_duration(&self, millis: u64) {
        self.last_ping_duration.store(millis, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown_listener.is_triggered()
    }

    pub(crate) fn shutdown_listener(&self) -> triggered::Listener {
        self.shutdown_listener.clone()
    }

    /// Send a signal to start this router's receive loop
    pub fn start(&self) {
        // Acquire state mutex and send the start signal
        let op = self.mutable_state.lock().start_signal.take();
        if let Some(signal) = op {
            let _ = signal.send(());
        } else {
            debug!("P2P, Router start was called more than once, router-id: {}", self.identity())
        }
    }

    /// Subscribe to specific message types.
    ///
    /// This should be used by `ConnectionInitializer` instances to register application-specific flows
    pub fn subscribe(&self, msg_types: Vec<KestrelMessagePayloadType>) -> IncomingRoute {
        self.subscribe_with_capacity(msg_types, DEFAULT_ROUTE_CAPACITY)
    }

    /// Subscribe to specific message types with a specific channel capacity.
    ///
    /// This should be used by `ConnectionInitializer` instances to register application-specific flows.
    pub fn subscribe_with_capacity(&self, msg_types: Vec<KestrelMessagePayloadType>, capacity: usize) -> IncomingRoute {
        let (sender, receiver) = mpsc_channel(capacity);
        let mut map = self.routing_map.write();
        for msg_type in msg_types {
            match map.insert(msg_type, sender.clone()) {
                Some(_) => {
                    // Overrides an existing route -- panic
                    error!("P2P, Router::subscribe overrides an existing value: {:?}, router-id: {}", msg_type, self.identity());
                    panic!("P2P, Tried to subscribe to an existing route");
                }
                None => {
                    trace!("P2P, Router::subscribe - msg_type: {:?} route is registered, router-id:{:?}", msg_type, self.identity());
                }
            }
        }
        receiver
    }

    /// Routes a message coming from the network to the corresponding registered flow
    pub async fn route_to_flow(&self, msg: KestrelMessage) -> Result<(), ProtocolError> {
        let msg_type: KestrelMessagePayloadType = (&msg.payload).into();
        let op = self.routing_map.read().get(&msg_type).cloned();
        let Some(sender) = op else {
            return Err(ProtocolError::NoRouteForMessageType(msg_type));
        };
        match tokio::time::timeout(INCOMING_ROUTE_TIMEOUT, sender.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => Err(ProtocolError::IncomingRouteCapacityReached(msg_type, self.to_string())),
        }
    }

    /// Enqueues a locally-originated message to be sent to the network peer
    pub async fn enqueue(&self, msg: KestrelMessage) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outgoing_route.send(msg).await.map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Best-effort notification of the peer about the error ending the connection
    pub async fn try_sending_reject_message(&self, err: &ProtocolError) {
        if err.can_send_outgoing_message() {
            let _ = self.enqueue(make_message!(Payload::Reject, RejectMessage { reason: err.to_reject_message() })).await;
        }
    }

    /// Reports `err` to the hub, which counts it as an offense of this peer if it is ban-worthy
    pub async fn report_offense(self: &Arc<Router>, err: ProtocolError) {
        if err.should_ban() {
            let _ = self.hub_sender.send(HubEvent::Offense(self.clone(), err)).await;
        }
    }

    /// Closes the router, signals exit, and cleans up all resources so that underlying connections will be aborted correctly.
    /// Returns true if this is the first call to close
    pub async fn close(self: &Arc<Router>) -> bool {
        // NOTE: Using a block to drop the lock asap
        {
            let mut state = self.mutable_state.lock();
            if state.closed {
                trace!("P2P, Router close was called more than once, router-id: {}", self.identity());
                return false;
            }
            state.closed = true;

            // Make sure start signal was fired, just in case `self.start()` was never called
            if let Some(signal) = state.start_signal.take() {
                let _ = signal.send(());
            }
        }
        self.shutdown_trigger.trigger();

        // Drop all flow senders
        self.routing_map.write().clear();

        // Send a close notification to the central Hub
        let _ = self.hub_sender.send(HubEvent::PeerClosing(self.clone())).await;

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{PingMessage, PongMessage};
    use futures::stream;

    fn test_router(
        incoming: Vec<Result<KestrelMessage, CodecError>>,
    ) -> (Arc<Router>, MpscReceiver<KestrelMessage>, MpscReceiver<HubEvent>) {
        let (hub_sender, hub_receiver) = mpsc_channel(16);
        let (outgoing_route, outgoing_receiver) = mpsc_channel(16);
        // A pending tail keeps the stream open after the scripted messages
        let incoming = stream::iter(incoming).chain(stream::pending());
        let router = Router::new("127.0.0.1:16111".parse().unwrap(), false, hub_sender, Box::pin(incoming), outgoing_route);
        (router, outgoing_receiver, hub_receiver)
    }

    #[tokio::test]
    async fn test_routes_messages_by_type() {
        let (router, _outgoing, _hub) = test_router(vec![
            Ok(make_message!(Payload::Ping, PingMessage { nonce: 1 })),
            Ok(make_message!(Payload::Pong, PongMessage { nonce: 2 })),
        ]);
        let mut pings = router.subscribe(vec![KestrelMessagePayloadType::Ping]);
        let mut pongs = router.subscribe(vec![KestrelMessagePayloadType::Pong]);
        router.start();

        assert!(matches!(pings.recv().await.unwrap().payload, Payload::Ping(PingMessage { nonce: 1 })));
        assert!(matches!(pongs.recv().await.unwrap().payload, Payload::Pong(PongMessage { nonce: 2 })));
        assert!(!router.is_closed());
    }

    #[tokio::test]
    async fn test_unrouted_message_closes_router() {
        let (router, _outgoing, mut hub) = test_router(vec![Ok(make_message!(Payload::Ping, PingMessage { nonce: 1 }))]);
        router.start();
        match hub.recv().await.unwrap() {
            HubEvent::PeerClosing(closed) => assert!(Arc::ptr_eq(&closed, &router)),
            _ => panic!("expected the router to close"),
        }
        assert!(router.is_closed());
        assert!(matches!(
            router.enqueue(make_message!(Payload::Ping, PingMessage { nonce: 2 })).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_an_offense() {
        let err = CodecError::Payload(Box::new(bincode::ErrorKind::Custom("garbage".to_owned())));
        let (router, mut outgoing, mut hub) = test_router(vec![Err(err)]);
        router.start();

        assert!(matches!(outgoing.recv().await.unwrap().payload, Payload::Reject(_)));
        match hub.recv().await.unwrap() {
            HubEvent::Offense(offender, err) => {
                assert!(Arc::ptr_eq(&offender, &router));
                assert!(matches!(err, ProtocolError::MalformedMessage(_)));
            }
            _ => panic!("expected an offense report"),
        }
        assert!(matches!(hub.recv().await.unwrap(), HubEvent::PeerClosing(_)));
    }
}
