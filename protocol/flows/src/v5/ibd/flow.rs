use crate::{
    flow_context::FlowContext,
    flow_trait::Flow,
    v5::ibd::{HeadersChunk, HeadersChunkStream, IBD_BATCH_SIZE, PruningPointUtxosetChunkStream, TrustedEntryStream},
};
use kestrel_consensus::consensus::proxy::ConsensusProxy;
use kestrel_consensus_core::{block::Block, errors::pruning::PruningImportError};
use kestrel_core::{debug, info};
use kestrel_hashes::Hash;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::{DEFAULT_TIMEOUT, ProtocolError},
    dequeue_with_timeout, make_message,
    messages::{
        IbdBlockLocatorMessage, Payload, RequestAnticoneMessage, RequestHeadersMessage, RequestIbdBlocksMessage,
        RequestPruningPointAndItsAnticoneMessage, RequestPruningPointProofMessage, RequestPruningPointUtxoSetMessage,
    },
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc::Receiver;

use super::progress::ProgressReporter;

/// Pruning proof generation and communication might take several minutes
const PRUNING_PROOF_TIMEOUT: Duration = Duration::from_secs(600);

/// Block bodies of a batch might be sent slowly by a loaded peer
const IBD_BLOCK_TIMEOUT: Duration = Duration::from_secs(600);

/// Flow for managing IBD - Initial Block Download
pub struct IbdFlow {
    pub(super) ctx: FlowContext,
    pub(super) router: Arc<Router>,
    pub(super) incoming_route: IncomingRoute,

    // Receives relay blocks from relay flow which are out of orphan resolution range and hence trigger IBD
    relay_receiver: Receiver<Block>,
}

#[async_trait::async_trait]
impl Flow for IbdFlow {
    fn name(&self) -> &'static str {
        "IBD"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl IbdFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute, relay_receiver: Receiver<Block>) -> Self {
        Self { ctx, router, incoming_route, relay_receiver }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        while let Some(relay_block) = self.relay_receiver.recv().await {
            // Only a single IBD runs at a time, relay blocks arriving meanwhile are dropped
            if let Some(_guard) = self.ctx.try_set_ibd_running() {
                info!("IBD started with peer {}", self.router);
                let start = Instant::now();
                let res = self.ibd(relay_block).await;
                match &res {
                    Ok(()) => info!("IBD with peer {} finished in {:.2?}", self.router, start.elapsed()),
                    Err(err) => info!("IBD with peer {} failed: {}", self.router, err),
                }
                res?;
            }
        }
        Ok(())
    }

    async fn ibd(&mut self, relay_block: Block) -> Result<(), ProtocolError> {
        let consensus = self.ctx.consensus();
        let relay_hash = relay_block.hash();

        match self.find_highest_shared_chain_block(&consensus, relay_hash).await? {
            Some(highest_shared) => {
                self.sync_headers(&consensus, highest_shared, &relay_block).await?;
            }
            None => {
                // The peer shares no chain block with us above its pruning point. Syncing from a proof is
                // only sound for a node which holds nothing beyond genesis
                if consensus.async_get_headers_selected_tip().await != self.ctx.config.genesis_hash() {
                    return Err(ProtocolError::OtherOwned(format!(
                        "peer {} shares no chain block with the local headers chain below relay block {}",
                        self.router, relay_hash
                    )));
                }
                self.ibd_with_headers_proof(&consensus, &relay_block).await?;
            }
        }

        self.sync_missing_block_bodies(&consensus, relay_hash).await?;

        // New blocks may have changed the virtual and thus the block template
        self.ctx.on_new_block_template().await;
        Ok(())
    }

    /// Sends a locator of the local headers chain and returns the highest locator hash the peer places
    /// on the selected chain of `relay_hash`, or `None` if the peer found no such hash
    async fn find_highest_shared_chain_block(
        &mut self,
        consensus: &ConsensusProxy,
        relay_hash: Hash,
    ) -> Result<Option<Hash>, ProtocolError> {
        let headers_selected_tip = consensus.async_get_headers_selected_tip().await;
        let block_locator_hashes = consensus.async_create_block_locator_from_pruning_point(headers_selected_tip, usize::MAX).await?;
        debug!("Sending an IBD block locator of {} hashes to peer {}", block_locator_hashes.len(), self.router);
        self.router
            .enqueue(make_message!(
                Payload::IbdBlockLocator,
                IbdBlockLocatorMessage { target_hash: relay_hash, block_locator_hashes: block_locator_hashes.clone() }
            ))
            .await?;

        let msg = match tokio::time::timeout(DEFAULT_TIMEOUT, self.incoming_route.recv()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => return Err(ProtocolError::ConnectionClosed),
            Err(_) => return Err(ProtocolError::Timeout(DEFAULT_TIMEOUT)),
        };
        match msg.payload {
            Payload::IbdBlockLocatorHighestHash(payload) => {
                if !block_locator_hashes.contains(&payload.highest_hash) {
                    return Err(ProtocolError::MisbehavingPeer(format!(
                        "highest shared hash {} is not part of the sent locator",
                        payload.highest_hash
                    )));
                }
                debug!("Highest shared chain block with peer {} is {}", self.router, payload.highest_hash);
                Ok(Some(payload.highest_hash))
            }
            Payload::IbdBlockLocatorHighestHashNotFound(_) => Ok(None),
            payload => Err(ProtocolError::UnexpectedMessage(
                stringify!(Payload::IbdBlockLocatorHighestHash | Payload::IbdBlockLocatorHighestHashNotFound),
                Some((&payload).into()),
            )),
        }
    }

    async fn ibd_with_headers_proof(&mut self, consensus: &ConsensusProxy, relay_block: &Block) -> Result<(), ProtocolError> {
        info!("Starting IBD with headers proof with peer {}", self.router);
        let pruning_point = self.sync_and_validate_pruning_proof(consensus).await?;
        self.sync_headers(consensus, pruning_point, relay_block).await?;
        self.sync_pruning_point_utxo_set(consensus, pruning_point).await?;
        Ok(())
    }

    async fn sync_and_validate_pruning_proof(&mut self, consensus: &ConsensusProxy) -> Result<Hash, ProtocolError> {
        self.router.enqueue(make_message!(Payload::RequestPruningPointProof, RequestPruningPointProofMessage {})).await?;

        let msg = dequeue_with_timeout!(self.incoming_route, Payload::PruningPointProof, PRUNING_PROOF_TIMEOUT)?;
        let proof = Arc::new(msg.proof);
        debug!("received proof with overall {} headers", proof.len());

        consensus.async_validate_pruning_proof(proof.clone()).await?;
        let proof_pruning_point = proof.last().ok_or(PruningImportError::ProofEmpty)?.hash;
        if proof_pruning_point == consensus.async_get_pruning_point().await {
            return Err(ProtocolError::Other("the proof pruning point is the same as the current pruning point"));
        }

        self.router
            .enqueue(make_message!(Payload::RequestPruningPointAndItsAnticone, RequestPruningPointAndItsAnticoneMessage {}))
            .await?;

        let msg = dequeue_with_timeout!(self.incoming_route, Payload::TrustedData)?;
        let trusted_data = Arc::new(msg.data);
        debug!(
            "received trusted data with {} anticone hashes and {} window and chain headers",
            trusted_data.anticone.len(),
            trusted_data.window_and_chain_headers.len()
        );
        if trusted_data.anticone.first() != Some(&proof_pruning_point) {
            return Err(ProtocolError::MisbehavingPeer("the trusted data does not start with the proof pruning point".to_owned()));
        }

        let mut entry_stream = TrustedEntryStream::new(&self.router, &mut self.incoming_route);
        let Some(pruning_point_entry) = entry_stream.next().await? else {
            return Err(ProtocolError::Other("got `done` message before receiving the pruning point"));
        };
        if pruning_point_entry.block.hash() != proof_pruning_point {
            return Err(ProtocolError::MisbehavingPeer(format!(
                "expected the proof pruning point {} but got block {}",
                proof_pruning_point,
                pruning_point_entry.block.hash()
            )));
        }

        let mut entries = vec![pruning_point_entry];
        while let Some(entry) = entry_stream.next().await? {
            entries.push(entry);
        }

        consensus.async_apply_pruning_proof(Arc::unwrap_or_clone(proof), trusted_data).await?;

        info!("Starting to process {} trusted blocks", entries.len());
        let mut last_time = Instant::now();
        let mut last_index: usize = 0;
        for (i, entry) in entries.into_iter().enumerate() {
            let now = Instant::now();
            let passed = now.duration_since(last_time);
            if passed > Duration::from_secs(1) {
                info!("Processed {} trusted blocks in the last {:.2} seconds (total {})", i - last_index, passed.as_secs_f64(), i);
                last_time = now;
                last_index = i;
            }
            self.ctx.verify_block_pow(&entry.block)?;
            consensus.async_validate_and_insert_trusted_block(entry).await?;
        }
        info!("Done processing trusted blocks");

        Ok(proof_pruning_point)
    }

    /// Downloads the headers in the future of `low` and the past of the relay block. `low` must be a
    /// chain block known to both sides
    async fn sync_headers(&mut self, consensus: &ConsensusProxy, low: Hash, relay_block: &Block) -> Result<(), ProtocolError> {
        let relay_hash = relay_block.hash();
        let low_daa_score = consensus.async_get_header(low).await?.daa_score;
        let mut progress_reporter = ProgressReporter::new(low_daa_score, relay_block.header.daa_score, "block headers");

        self.router
            .enqueue(make_message!(Payload::RequestHeaders, RequestHeadersMessage { low_hash: low, high_hash: relay_hash }))
            .await?;
        let mut chunk_stream = HeadersChunkStream::new(&self.router, &mut self.incoming_route);

        // Insert each chunk while the next one is being received
        let mut pending = chunk_stream.next().await?;
        while let Some(chunk) = pending {
            let chunk_len = chunk.len();
            let chunk_daa_score = chunk.last().map_or(low_daa_score, |header| header.daa_score);
            let (next, ()) = tokio::try_join!(chunk_stream.next(), insert_headers(consensus, chunk))?;
            progress_reporter.report(chunk_len, chunk_daa_score);
            pending = next;
        }
        progress_reporter.report_completion(0);

        self.sync_missing_relay_past_headers(consensus, low, relay_hash).await
    }

    async fn sync_missing_relay_past_headers(
        &mut self,
        consensus: &ConsensusProxy,
        low: Hash,
        relay_hash: Hash,
    ) -> Result<(), ProtocolError> {
        if consensus.async_get_block_status(relay_hash).await.is_some_and(|status| status.has_block_header()) {
            return Ok(());
        }

        // Send a special header request for the anticone of the shared block in the past of the relay block.
        // This is expected to be a small set, as it is bounded by the mergeset of the relay block
        self.router
            .enqueue(make_message!(Payload::RequestAnticone, RequestAnticoneMessage { block_hash: low, context_hash: relay_hash }))
            .await?;

        let mut chunk_stream = HeadersChunkStream::new(&self.router, &mut self.incoming_route);
        while let Some(chunk) = chunk_stream.next().await? {
            insert_headers(consensus, chunk).await?;
        }

        if consensus.async_get_block_status(relay_hash).await.is_none() {
            Err(ProtocolError::OtherOwned(format!(
                "did not receive relay block {} from peer {} during block download",
                relay_hash, self.router
            )))
        } else {
            Ok(())
        }
    }

    async fn sync_pruning_point_utxo_set(&mut self, consensus: &ConsensusProxy, pruning_point: Hash) -> Result<(), ProtocolError> {
        consensus.async_start_pruning_point_utxo_set_import().await?;
        self.router
            .enqueue(make_message!(
                Payload::RequestPruningPointUtxoSet,
                RequestPruningPointUtxoSetMessage { pruning_point_hash: pruning_point }
            ))
            .await?;

        let mut chunk_stream = PruningPointUtxosetChunkStream::new(&self.router, &mut self.incoming_route);
        while let Some(chunk) = chunk_stream.next().await? {
            consensus.async_append_imported_pruning_point_utxos(chunk).await?;
        }
        let utxo_count = chunk_stream.utxo_count();

        consensus.async_finish_pruning_point_utxo_set_import(pruning_point).await?;
        info!("Imported {} UTXOs of pruning point {}", utxo_count, pruning_point);
        Ok(())
    }

    async fn sync_missing_block_bodies(&mut self, consensus: &ConsensusProxy, high: Hash) -> Result<(), ProtocolError> {
        let hashes = consensus.async_get_missing_block_body_hashes(high).await?;
        let (Some(&first), Some(&last)) = (hashes.first(), hashes.last()) else {
            return Ok(());
        };

        let low_header = consensus.async_get_header(first).await?;
        let high_header = consensus.async_get_header(last).await?;
        let mut progress_reporter = ProgressReporter::new(low_header.daa_score, high_header.daa_score, "blocks");

        for chunk in hashes.chunks(IBD_BATCH_SIZE) {
            let daa_score = self.process_block_chunk(consensus, chunk).await?;
            progress_reporter.report(chunk.len(), daa_score);
        }
        progress_reporter.report_completion(0);

        Ok(())
    }

    /// Requests the bodies of `chunk` and inserts them in order. Returns the DAA score of the last block
    async fn process_block_chunk(&mut self, consensus: &ConsensusProxy, chunk: &[Hash]) -> Result<u64, ProtocolError> {
        self.router.enqueue(make_message!(Payload::RequestIbdBlocks, RequestIbdBlocksMessage { hashes: chunk.to_vec() })).await?;

        let mut current_daa_score = 0;
        for &expected_hash in chunk {
            let block = dequeue_ibd_block(&mut self.incoming_route).await?;
            if block.hash() != expected_hash {
                return Err(ProtocolError::MisbehavingPeer(format!("expected block {} but got {}", expected_hash, block.hash())));
            }
            if block.is_header_only() {
                return Err(ProtocolError::MisbehavingPeer(format!("sent header of {} where expected block with body", block.hash())));
            }
            self.ctx.verify_block_pow(&block)?;
            current_daa_score = block.header.daa_score;
            consensus.async_validate_and_insert_block(block).await?;
        }

        Ok(current_daa_score)
    }
}

async fn dequeue_ibd_block(incoming_route: &mut IncomingRoute) -> Result<Block, ProtocolError> {
    Ok(dequeue_with_timeout!(incoming_route, Payload::IbdBlock, IBD_BLOCK_TIMEOUT)?.block)
}

/// Inserts the headers in the given order. Headers which are already known are accepted as is
async fn insert_headers(consensus: &ConsensusProxy, chunk: HeadersChunk) -> Result<(), ProtocolError> {
    for header in chunk {
        consensus.async_validate_and_insert_block(Block::from_header_arc(header)).await?;
    }
    Ok(())
}
