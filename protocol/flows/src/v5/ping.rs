use crate::{flow_context::FlowContext, flow_trait::Flow};
use kestrel_core::debug;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::ProtocolError,
    dequeue, dequeue_with_timeout, make_message,
    messages::{Payload, PingMessage, PongMessage},
};
use rand::Rng;
use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

/// Flow for managing a loop receiving pings and responding with pongs
pub struct ReceivePingsFlow {
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for ReceivePingsFlow {
    fn name(&self) -> &'static str {
        "RECEIVE_PINGS"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl ReceivePingsFlow {
    pub fn new(router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            // We dequeue without a timeout in this case, responding to pings whenever they arrive
            let ping = dequeue!(self.incoming_route, Payload::Ping)?;
            debug!("Got ping from peer {} with nonce {}", self.router, ping.nonce);
            self.router.enqueue(make_message!(Payload::Pong, PongMessage { nonce: ping.nonce })).await?;
        }
    }
}

pub const PING_INTERVAL: Duration = Duration::from_secs(120); // 2 minutes

/// Flow for managing a loop sending pings and waiting for pongs
pub struct SendPingsFlow {
    _ctx: FlowContext,

    // A weak reference keeps the router from being held by this flow while sleeping after the connection was closed
    router: Weak<Router>,
    peer: String,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for SendPingsFlow {
    fn name(&self) -> &'static str {
        "SEND_PINGS"
    }

    fn router(&self) -> Option<Arc<Router>> {
        self.router.upgrade()
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl SendPingsFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        let peer = router.to_string();
        Self { _ctx: ctx, router: Arc::downgrade(&router), peer, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            tokio::time::sleep(PING_INTERVAL).await;

            // Create a fresh random nonce for each ping
            let nonce = rand::thread_rng().r#gen::<u64>();
            let ping = make_message!(Payload::Ping, PingMessage { nonce });
            let Some(router) = self.router.upgrade() else {
                return Err(ProtocolError::ConnectionClosed);
            };
            let sent = Instant::now();
            router.enqueue(ping).await?;
            drop(router);

            let pong = dequeue_with_timeout!(self.incoming_route, Payload::Pong)?;
            if pong.nonce != nonce {
                return Err(ProtocolError::MisbehavingPeer("nonce mismatch between ping and pong".to_owned()));
            }
            if let Some(router) = self.router.upgrade() {
                router.set_last_ping_duration(sent.elapsed().as_millis() as u64);
            }
            debug!("Successful ping with peer {} (nonce: {})", self.peer, pong.nonce);
        }
    }
}
