use crate::{flow_context::FlowContext, flow_trait::Flow};
use itertools::Itertools;
use kestrel_core::debug;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::ProtocolError,
    dequeue, make_message,
    messages::{AddressesMessage, Payload, RequestAddressesMessage},
};
use std::{net::SocketAddr, sync::Arc};

/// The maximum number of addresses sent in a single message
pub const MAX_ADDRESSES_SEND: usize = 1000;

/// Requests the addresses known to the peer once and logs every address message it sends
pub struct ReceiveAddressesFlow {
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for ReceiveAddressesFlow {
    fn name(&self) -> &'static str {
        "RECEIVE_ADDRESSES"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl ReceiveAddressesFlow {
    pub fn new(router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        self.router.enqueue(make_message!(Payload::RequestAddresses, RequestAddressesMessage {})).await?;

        // The route is drained for the lifetime of the connection since peers may advertise at any time
        loop {
            let msg = dequeue!(self.incoming_route, Payload::Addresses)?;
            if msg.addresses.len() > MAX_ADDRESSES_SEND {
                return Err(ProtocolError::MisbehavingPeer(format!("sent {} addresses in a single message", msg.addresses.len())));
            }
            debug!("Peer {} advertised {} addresses: {}", self.router, msg.addresses.len(), msg.addresses.iter().join(", "));
        }
    }
}

/// Answers address requests with the listening addresses of the currently connected peers
pub struct SendAddressesFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for SendAddressesFlow {
    fn name(&self) -> &'static str {
        "SEND_ADDRESSES"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl SendAddressesFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { ctx, router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            dequeue!(self.incoming_route, Payload::RequestAddresses)?;
            let addresses = self.known_addresses();
            debug!("Sending {} addresses to peer {}", addresses.len(), self.router);
            self.router.enqueue(make_message!(Payload::Addresses, AddressesMessage { addresses })).await?;
        }
    }

    fn known_addresses(&self) -> Vec<SocketAddr> {
        let requester = self.router.key();
        self.ctx
            .hub()
            .active_peers()
            .into_iter()
            .filter(|peer| peer.key() != requester)
            .filter_map(|peer| match peer.properties().listen_address {
                Some(address) => Some(address),
                // The address we dialed is where the peer listens
                None if peer.is_outbound() => Some(peer.net_address()),
                None => None,
            })
            .unique()
            .take(MAX_ADDRESSES_SEND)
            .collect()
    }
}
