//!
//! Logical stream abstractions used throughout the IBD negotiation protocols
//!

use super::IBD_BATCH_SIZE;
use kestrel_consensus_core::{
    header::Header,
    trusted::TrustedBlock,
    tx::{TransactionOutpoint, UtxoEntry},
};
use kestrel_core::{debug, info};
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::{DEFAULT_TIMEOUT, ProtocolError},
    make_message,
    messages::{
        KestrelMessage, Payload, RequestNextHeadersMessage, RequestNextPruningPointAndItsAnticoneBlocksMessage,
        RequestNextPruningPointUtxoSetChunkMessage,
    },
};
use std::sync::Arc;

async fn recv_with_timeout(incoming_route: &mut IncomingRoute) -> Result<KestrelMessage, ProtocolError> {
    match tokio::time::timeout(DEFAULT_TIMEOUT, incoming_route.recv()).await {
        Ok(Some(msg)) => Ok(msg),
        Ok(None) => Err(ProtocolError::ConnectionClosed),
        Err(_) => Err(ProtocolError::Timeout(DEFAULT_TIMEOUT)),
    }
}

pub struct TrustedEntryStream<'a, 'b> {
    router: &'a Router,
    incoming_route: &'b mut IncomingRoute,
    i: usize,
}

impl<'a, 'b> TrustedEntryStream<'a, 'b> {
    pub fn new(router: &'a Router, incoming_route: &'b mut IncomingRoute) -> Self {
        Self { router, incoming_route, i: 0 }
    }

    pub async fn next(&mut self) -> Result<Option<TrustedBlock>, ProtocolError> {
        let msg = recv_with_timeout(self.incoming_route).await?;
        let entry = match msg.payload {
            Payload::BlockWithTrustedData(payload) => payload.block,
            Payload::DoneBlocksWithTrustedData(_) => {
                debug!("trusted entry stream completed after {} items", self.i);
                return Ok(None);
            }
            payload => {
                return Err(ProtocolError::UnexpectedMessage(
                    stringify!(Payload::BlockWithTrustedData | Payload::DoneBlocksWithTrustedData),
                    Some((&payload).into()),
                ));
            }
        };

        // Request the next batch
        self.i += 1;
        if self.i % IBD_BATCH_SIZE == 0 {
            info!("Downloaded {} blocks from the pruning point anticone", self.i);
            self.router
                .enqueue(make_message!(
                    Payload::RequestNextPruningPointAndItsAnticoneBlocks,
                    RequestNextPruningPointAndItsAnticoneBlocksMessage {}
                ))
                .await?;
        }

        Ok(Some(entry))
    }
}

/// A chunk of headers
pub type HeadersChunk = Vec<Arc<Header>>;

pub struct HeadersChunkStream<'a, 'b> {
    router: &'a Router,
    incoming_route: &'b mut IncomingRoute,
    i: usize,
}

impl<'a, 'b> HeadersChunkStream<'a, 'b> {
    pub fn new(router: &'a Router, incoming_route: &'b mut IncomingRoute) -> Self {
        Self { router, incoming_route, i: 0 }
    }

    pub async fn next(&mut self) -> Result<Option<HeadersChunk>, ProtocolError> {
        let msg = recv_with_timeout(self.incoming_route).await?;
        let chunk = match msg.payload {
            Payload::BlockHeaders(payload) => {
                if payload.headers.is_empty() {
                    // The syncer should have sent a done message if the search completed, and not an empty list
                    return Err(ProtocolError::MalformedMessage("received an empty headers message".to_owned()));
                }
                payload.headers
            }
            Payload::DoneHeaders(_) => {
                debug!("headers chunk stream completed after {} chunks", self.i);
                return Ok(None);
            }
            payload => {
                return Err(ProtocolError::UnexpectedMessage(
                    stringify!(Payload::BlockHeaders | Payload::DoneHeaders),
                    Some((&payload).into()),
                ));
            }
        };

        // Request the next chunk
        self.i += 1;
        self.router.enqueue(make_message!(Payload::RequestNextHeaders, RequestNextHeadersMessage {})).await?;

        Ok(Some(chunk))
    }
}

/// A chunk of the pruning point UTXO set
pub type UtxosetChunk = Vec<(TransactionOutpoint, UtxoEntry)>;

pub struct PruningPointUtxosetChunkStream<'a, 'b> {
    router: &'a Router,
    incoming_route: &'b mut IncomingRoute,
    chunks: usize,
    utxos: usize,
}

impl<'a, 'b> PruningPointUtxosetChunkStream<'a, 'b> {
    pub fn new(router: &'a Router, incoming_route: &'b mut IncomingRoute) -> Self {
        Self { router, incoming_route, chunks: 0, utxos: 0 }
    }

    pub fn utxo_count(&self) -> usize {
        self.utxos
    }

    pub async fn next(&mut self) -> Result<Option<UtxosetChunk>, ProtocolError> {
        let msg = recv_with_timeout(self.incoming_route).await?;
        let chunk = match msg.payload {
            Payload::PruningPointUtxoSetChunk(payload) => payload.outpoint_and_utxo_entry_pairs,
            Payload::DonePruningPointUtxoSetChunks(_) => {
                info!("Finished receiving the UTXO set. Total UTXOs: {}", self.utxos);
                return Ok(None);
            }
            Payload::UnexpectedPruningPoint(_) => {
                // The syncer moved its pruning point while streaming, which is not a fault of the peer
                return Err(ProtocolError::Other("the pruning point of the syncer changed during the UTXO set download"));
            }
            payload => {
                return Err(ProtocolError::UnexpectedMessage(
                    stringify!(
                        Payload::PruningPointUtxoSetChunk
                            | Payload::DonePruningPointUtxoSetChunks
                            | Payload::UnexpectedPruningPoint
                    ),
                    Some((&payload).into()),
                ));
            }
        };

        self.chunks += 1;
        self.utxos += chunk.len();
        if self.chunks % IBD_BATCH_SIZE == 0 {
            info!("Received {} UTXO set chunks so far, totaling in {} UTXOs", self.chunks, self.utxos);
            self.router
                .enqueue(make_message!(Payload::RequestNextPruningPointUtxoSetChunk, RequestNextPruningPointUtxoSetChunkMessage {}))
                .await?;
        }

        Ok(Some(chunk))
    }
}
