use crate::{
    ConnectionInitializer, Peer, Router,
    common::ProtocolError,
    core::{ban::BanManager, peer::PeerKey},
    messages::KestrelMessage,
};
use kestrel_core::{debug, info, warn};
use parking_lot::RwLock;
use std::{
    collections::{HashMap, hash_map::Entry::Occupied},
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc::Receiver as MpscReceiver;

pub(crate) enum HubEvent {
    NewPeer(Arc<Router>),
    PeerClosing(Arc<Router>),
    Offense(Arc<Router>, ProtocolError),
}

/// Hub of active peers (represented as Router objects). Note that all public methods of this type are exposed through the Adaptor
#[derive(Clone)]
pub struct Hub {
    /// Map of currently active peers
    ///
    /// Note: the map key holds the node id and IP to prevent node impersonating.
    pub(crate) peers: Arc<RwLock<HashMap<PeerKey, Arc<Router>>>>,

    ban_manager: Arc<BanManager>,
}

impl Hub {
    pub(crate) fn new(ban_manager: Arc<BanManager>) -> Self {
        Self { peers: Arc::new(RwLock::new(HashMap::new())), ban_manager }
    }

    /// Starts a loop for receiving central hub events from all peer routers. This mechanism is used for
    /// managing a collection of active peers and for supporting a broadcast operation.
    pub(crate) fn start_event_loop(
        self,
        mut hub_receiver: MpscReceiver<HubEvent>,
        initializer: Arc<dyn ConnectionInitializer>,
        handshake_timeout: Duration,
    ) {
        tokio::spawn(async move {
            while let Some(new_event) = hub_receiver.recv().await {
                match new_event {
                    HubEvent::NewPeer(new_router) => {
                        // If peer is outbound then connection initialization was already performed as part of the connect logic
                        if new_router.is_outbound() {
                            info!("P2P Connected to outgoing peer {}", new_router);
                            self.insert_new_router(new_router).await;
                        } else {
                            // Handshakes may take a while, keep the event loop responsive
                            let hub = self.clone();
                            let initializer = initializer.clone();
                            tokio::spawn(async move { hub.initialize_inbound(new_router, initializer, handshake_timeout).await });
                        }
                    }
                    HubEvent::PeerClosing(router) => {
                        if let Occupied(entry) = self.peers.write().entry(router.key()) {
                            // We search for the router by identity, but make sure to delete it only if it's actually the same object.
                            // This is extremely important in cases of duplicate connection rejection etc.
                            if Arc::ptr_eq(entry.get(), &router) {
                                entry.remove_entry();
                                debug!("P2P, Hub event loop, removing peer, router-id: {}", router.identity());
                            }
                        }
                    }
                    HubEvent::Offense(router, err) => {
                        let ip = router.net_address().ip();
                        debug!("P2P, offense by peer {}: {}", router, err);
                        if self.ban_manager.record_offense(ip) {
                            router.try_sending_reject_message(&ProtocolError::Banned(ip)).await;
                            router.close().await;
                        }
                    }
                }
            }
            debug!("P2P, Hub event loop exiting");
        });
    }

    async fn initialize_inbound(&self, new_router: Arc<Router>, initializer: Arc<dyn ConnectionInitializer>, timeout: Duration) {
        let ip = new_router.net_address().ip();
        let res = if self.ban_manager.is_banned(ip) {
            Err(ProtocolError::Banned(ip))
        } else {
            initialize_with_timeout(initializer.as_ref(), new_router.clone(), timeout).await
        };
        match res {
            Ok(()) => {
                info!("P2P Connected to incoming peer {}", new_router);
                self.insert_new_router(new_router).await;
            }
            Err(err) => {
                new_router.try_sending_reject_message(&err).await;
                // Ignoring the new router
                new_router.close().await;
                if matches!(
                    err,
                    ProtocolError::LoopbackConnection(_) | ProtocolError::PeerAlreadyExists(_) | ProtocolError::Banned(_)
                ) {
                    debug!("P2P, handshake failed for inbound peer {}: {}", new_router, err);
                } else {
                    warn!("P2P, handshake failed for inbound peer {}: {}", new_router, err);
                }
            }
        }
    }

    async fn insert_new_router(&self, new_router: Arc<Router>) {
        let prev = self.peers.write().insert(new_router.key(), new_router.clone());
        if let Some(previous_router) = prev {
            // This is not supposed to ever happen but can on rare race-conditions
            previous_router.close().await;
            warn!("P2P, Hub event loop, removing peer with duplicate key: {}", previous_router.key());
        }
        // The peer may have disconnected while it was being initialized, in which case its closing event is already gone
        if new_router.is_closed() {
            if let Occupied(entry) = self.peers.write().entry(new_router.key()) {
                if Arc::ptr_eq(entry.get(), &new_router) {
                    entry.remove_entry();
                }
            }
        }
    }

    /// Send a message to a specific peer
    pub async fn send(&self, peer_key: PeerKey, msg: KestrelMessage) -> Result<bool, ProtocolError> {
        let op = self.peers.read().get(&peer_key).cloned();
        if let Some(router) = op {
            router.enqueue(msg).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Broadcast a message to all peers
    pub async fn broadcast(&self, msg: KestrelMessage) {
        let peers = self.peers.read().values().cloned().collect::<Vec<_>>();
        for router in peers {
            let _ = router.enqueue(msg.clone()).await;
        }
    }

    /// Broadcast a vector of messages to all peers
    pub async fn broadcast_many(&self, msgs: Vec<KestrelMessage>) {
        if msgs.is_empty() {
            return;
        }
        let peers = self.peers.read().values().cloned().collect::<Vec<_>>();
        for router in peers {
            for msg in msgs.iter().cloned() {
                let _ = router.enqueue(msg).await;
            }
        }
    }

    /// Terminate a specific peer
    pub async fn terminate(&self, peer_key: PeerKey) {
        let op = self.peers.read().get(&peer_key).cloned();
        if let Some(router) = op {
            // This will eventually lead to peer removal through the Hub event loop
            router.close().await;
        }
    }

    /// Terminate all peers
    pub async fn terminate_all_peers(&self) {
        let peers = self.peers.write().drain().map(|(_, r)| r).collect::<Vec<_>>();
        for router in peers {
            router.close().await;
        }
    }

    /// Returns a list of all currently active peers
    pub fn active_peers(&self) -> Vec<Peer> {
        self.peers.read().values().map(|r| r.as_ref().into()).collect()
    }

    /// Returns whether there are currently active peers
    pub fn has_peers(&self) -> bool {
        !self.peers.read().is_empty()
    }

    /// Returns whether a peer matching `peer_key` is registered
    pub fn has_peer(&self, peer_key: PeerKey) -> bool {
        self.peers.read().contains_key(&peer_key)
    }

    pub fn ban_manager(&self) -> &Arc<BanManager> {
        &self.ban_manager
    }
}

/// Runs the connection initializer (handshake, flow registration and readiness exchange) under a hard deadline
pub(crate) async fn initialize_with_timeout(
    initializer: &dyn ConnectionInitializer,
    router: Arc<Router>,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    match tokio::time::timeout(timeout, initializer.initialize_connection(router)).await {
        Ok(res) => res,
        Err(_) => Err(ProtocolError::HandshakeTimeout(timeout)),
    }
}
