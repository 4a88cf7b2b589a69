use crate::codec::MessageCodec;
use crate::common::{DEFAULT_TIMEOUT, ProtocolError};
use crate::core::hub::{HubEvent, initialize_with_timeout};
use crate::messages::KestrelMessage;
use crate::{ConnectionInitializer, Router};
use futures::SinkExt;
use kestrel_core::{debug, info, warn};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::mpsc::{Receiver as MpscReceiver, Sender as MpscSender, channel as mpsc_channel};
use tokio_util::codec::{FramedRead, FramedWrite};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("missing socket address")]
    NoAddress,

    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("connecting timed out")]
    Timeout,

    #[error("{0}")]
    ProtocolError(#[from] ProtocolError),
}

/// Handles Router creation for both server and client-side new connections
#[derive(Clone)]
pub struct ConnectionHandler {
    /// Cloned on each new connection so that routers can communicate with a central hub
    hub_sender: MpscSender<HubEvent>,
    initializer: Arc<dyn ConnectionInitializer>,
    handshake_timeout: Duration,
}

impl ConnectionHandler {
    pub(crate) fn new(
        hub_sender: MpscSender<HubEvent>,
        initializer: Arc<dyn ConnectionInitializer>,
        handshake_timeout: Duration,
    ) -> Self {
        Self { hub_sender, initializer, handshake_timeout }
    }

    /// Binds `serve_address` and launches a P2P server listener loop which stops once `shutdown` fires.
    /// Returns the bound address
    pub(crate) async fn serve(&self, serve_address: &str, shutdown: triggered::Listener) -> Result<SocketAddr, ConnectionError> {
        let Some(socket_address) = serve_address.to_socket_addrs()?.next() else {
            return Err(ConnectionError::NoAddress);
        };
        let listener = TcpListener::bind(socket_address).await?;
        let local_address = listener.local_addr()?;
        info!("P2P Server starting on: {}", local_address);

        let connection_handler = self.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = shutdown.clone() => break,
                    res = listener.accept() => match res {
                        Ok((stream, remote_address)) => {
                            // NOTE: No need to explicitly handle the returned router, it will internally be sent to the central Hub
                            let router = connection_handler.new_router(stream, remote_address, false);
                            let _ = connection_handler.hub_sender.send(HubEvent::NewPeer(router)).await;
                        }
                        Err(err) => warn!("P2P, Server accept error: {}", err),
                    }
                }
            }
            debug!("P2P, Server stopped: {}", local_address);
        });
        Ok(local_address)
    }

    /// Connect to a new peer and run the connection initializer on it
    pub(crate) async fn connect(&self, peer_address: &str) -> Result<Arc<Router>, ConnectionError> {
        let Some(socket_address) = peer_address.to_socket_addrs()?.next() else {
            return Err(ConnectionError::NoAddress);
        };
        let stream = match tokio::time::timeout(Self::connect_timeout(), TcpStream::connect(socket_address)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(ConnectionError::Timeout),
        };
        let router = self.new_router(stream, socket_address, true);

        if let Err(err) = initialize_with_timeout(self.initializer.as_ref(), router.clone(), self.handshake_timeout).await {
            router.try_sending_reject_message(&err).await;
            router.close().await;
            return Err(err.into());
        }
        self.hub_sender.send(HubEvent::NewPeer(router.clone())).await.map_err(|_| ProtocolError::ConnectionClosed)?;
        Ok(router)
    }

    /// Connect to a new peer with `retry_attempts` retries and `retry_interval` duration between each attempt
    pub(crate) async fn connect_with_retry(
        &self,
        address: &str,
        retry_attempts: u8,
        retry_interval: Duration,
    ) -> Result<Arc<Router>, ConnectionError> {
        let mut last_error = ConnectionError::NoAddress;
        for counter in 0..retry_attempts {
            match self.connect(address).await {
                Ok(router) => {
                    debug!("P2P, Client connected, ip & port: {:?}", address);
                    return Ok(router);
                }
                // A peer which rejected us will do so again
                Err(ConnectionError::ProtocolError(err)) => return Err(err.into()),
                Err(err) => {
                    debug!("P2P, Client connect retry #{} failed with error {:?}, ip & port: {:?}", counter, err, address);
                    last_error = err;
                    // Await `retry_interval` time before retrying
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
        warn!("P2P, Client connection retry #{} - all failed", retry_attempts);
        Err(last_error)
    }

    /// Splits the stream into a framed reader owned by the router receive loop and a framed writer owned
    /// by a dedicated task draining the outgoing route
    fn new_router(&self, stream: TcpStream, remote_address: SocketAddr, is_outbound: bool) -> Arc<Router> {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (outgoing_route, outgoing_receiver) = mpsc_channel(Self::outgoing_network_channel_size());
        let incoming_stream = FramedRead::new(read_half, MessageCodec::new());
        let router = Router::new(remote_address, is_outbound, self.hub_sender.clone(), incoming_stream, outgoing_route);

        let writer = FramedWrite::new(write_half, MessageCodec::new());
        tokio::spawn(Self::write_loop(writer, outgoing_receiver, router.shutdown_listener(), remote_address));
        router
    }

    async fn write_loop(
        mut writer: FramedWrite<tokio::net::tcp::OwnedWriteHalf, MessageCodec>,
        mut outgoing_receiver: MpscReceiver<KestrelMessage>,
        shutdown: triggered::Listener,
        remote_address: SocketAddr,
    ) {
        loop {
            select! {
                // Pending messages, such as a final reject, are flushed before the shutdown is observed
                biased;

                msg = outgoing_receiver.recv() => match msg {
                    Some(msg) => match tokio::time::timeout(DEFAULT_TIMEOUT, writer.send(msg)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            debug!("P2P, write to {} failed: {}", remote_address, err);
                            break;
                        }
                        Err(_) => {
                            debug!("P2P, write to {} timed out", remote_address);
                            break;
                        }
                    },
                    None => break,
                },
                _ = shutdown.clone() => break,
            }
        }
        debug!("P2P, writer for {} exited", remote_address);
    }

    fn outgoing_network_channel_size() -> usize {
        128
    }

    fn connect_timeout() -> Duration {
        Duration::from_secs(10)
    }
}
