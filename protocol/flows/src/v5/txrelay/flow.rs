use crate::{
    flow_context::{FlowContext, RequestScope},
    flow_trait::Flow,
    flowcontext::transactions::MAX_INV_PER_TX_INV_MSG,
};
use kestrel_consensus_core::tx::{Transaction, TransactionId};
use kestrel_core::{debug, warn};
use kestrel_mining_errors::manager::MiningManagerError;
use kestrel_p2p_lib::{
    IncomingRoute, Router,
    common::{DEFAULT_TIMEOUT, ProtocolError},
    dequeue, make_message,
    messages::{Payload, RequestTransactionsMessage, TransactionMessage, TransactionNotFoundMessage},
};
use std::sync::Arc;
use tokio::time::timeout;

enum Response {
    Transaction(Transaction),
    NotFound(TransactionId),
}

impl Response {
    fn transaction_id(&self) -> TransactionId {
        match self {
            Response::Transaction(tx) => tx.id(),
            Response::NotFound(id) => *id,
        }
    }
}

/// Flow listening to InvTransactions messages, requests their corresponding transactions if they
/// are missing, adds them to the mempool and propagates them to the rest of the network.
pub struct RelayTransactionsFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    /// A route specific for invs messages
    invs_route: IncomingRoute,
    /// A route for other messages such as Transaction and TransactionNotFound
    msg_route: IncomingRoute,

    /// Track the number of policy-rejected txs coming from this peer
    reject_counter: u64,
}

#[async_trait::async_trait]
impl Flow for RelayTransactionsFlow {
    fn name(&self) -> &'static str {
        "RELAY_TRANSACTIONS"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl RelayTransactionsFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, invs_route: IncomingRoute, msg_route: IncomingRoute) -> Self {
        Self { ctx, router, invs_route, msg_route, reject_counter: 0 }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            // Loop over incoming transaction inv messages
            let inv = dequeue!(self.invs_route, Payload::InvTransactions)?.ids;

            if inv.len() > MAX_INV_PER_TX_INV_MSG {
                return Err(ProtocolError::MisbehavingPeer(format!("sent {} transaction invs in a single message", inv.len())));
            }

            // Blocks-only nodes keep draining invs without acting on them
            if self.ctx.flow_config.blocks_only {
                continue;
            }

            // Transaction relay is disabled if the node is out of sync and thus not mining
            if !self.ctx.consensus().async_is_nearly_synced().await {
                continue;
            }

            let requests = self.request_transactions(inv).await?;
            self.receive_transactions(requests).await?;
        }
    }

    async fn request_transactions(
        &self,
        transaction_ids: Vec<TransactionId>,
    ) -> Result<Vec<RequestScope<TransactionId>>, ProtocolError> {
        // Request only the ids unknown to the mempool and not already requested by another peer
        let mut requests = Vec::new();
        for transaction_id in transaction_ids {
            if self.ctx.mining_manager().has_transaction(transaction_id, true, true).await {
                continue;
            }
            if let Some(req) = self.ctx.try_adding_transaction_request(transaction_id) {
                requests.push(req);
            }
        }

        if !requests.is_empty() {
            self.router
                .enqueue(make_message!(
                    Payload::RequestTransactions,
                    RequestTransactionsMessage { ids: requests.iter().map(|scope| scope.req).collect() }
                ))
                .await?;
        }

        Ok(requests)
    }

    /// Returns the next Transaction or TransactionNotFound message in msg_route
    async fn read_response(&mut self) -> Result<Response, ProtocolError> {
        match timeout(DEFAULT_TIMEOUT, self.msg_route.recv()).await {
            Ok(Some(msg)) => match msg.payload {
                Payload::Transaction(payload) => Ok(Response::Transaction(payload.transaction)),
                Payload::TransactionNotFound(payload) => Ok(Response::NotFound(payload.id)),
                payload => Err(ProtocolError::UnexpectedMessage(
                    stringify!(Payload::Transaction | Payload::TransactionNotFound),
                    Some((&payload).into()),
                )),
            },
            Ok(None) => Err(ProtocolError::ConnectionClosed),
            // One reason this may happen is the invs route being full and preventing
            // the router from routing other incoming messages
            Err(_) => Err(ProtocolError::Timeout(DEFAULT_TIMEOUT)),
        }
    }

    async fn receive_transactions(&mut self, requests: Vec<RequestScope<TransactionId>>) -> Result<(), ProtocolError> {
        let mut accepted = Vec::new();
        for request in requests {
            let response = self.read_response().await?;
            let transaction_id = response.transaction_id();
            if transaction_id != request.req {
                return Err(ProtocolError::MisbehavingPeer(format!(
                    "requested transaction id {} but got transaction {}",
                    request.req, transaction_id
                )));
            }
            let Response::Transaction(transaction) = response else {
                continue;
            };

            match self.ctx.add_relayed_transaction(transaction).await {
                Ok(txs) => accepted.extend(txs.iter().map(|tx| tx.id())),
                Err(MiningManagerError::MempoolError(err)) if err.is_invalid_by_consensus() => {
                    return Err(ProtocolError::MisbehavingPeer(format!("relayed invalid transaction {}: {}", transaction_id, err)));
                }
                Err(err) => {
                    self.reject_counter += 1;
                    debug!("Transaction {} relayed by peer {} was rejected: {}", transaction_id, self.router, err);
                    if self.reject_counter % 100 == 0 {
                        warn!("Peer {} has relayed {} rejected transactions", self.router, self.reject_counter);
                    }
                }
            }
        }

        self.ctx.broadcast_transactions(accepted).await;
        Ok(())
    }
}

/// Flow listening to RequestTransactions messages, responding with the requested
/// transactions if those are in the mempool, and with TransactionNotFound otherwise
pub struct RequestTransactionsFlow {
    ctx: FlowContext,
    router: Arc<Router>,
    incoming_route: IncomingRoute,
}

#[async_trait::async_trait]
impl Flow for RequestTransactionsFlow {
    fn name(&self) -> &'static str {
        "REQUEST_TRANSACTIONS"
    }

    fn router(&self) -> Option<Arc<Router>> {
        Some(self.router.clone())
    }

    async fn start(&mut self) -> Result<(), ProtocolError> {
        self.start_impl().await
    }
}

impl RequestTransactionsFlow {
    pub fn new(ctx: FlowContext, router: Arc<Router>, incoming_route: IncomingRoute) -> Self {
        Self { ctx, router, incoming_route }
    }

    async fn start_impl(&mut self) -> Result<(), ProtocolError> {
        loop {
            let msg = dequeue!(self.incoming_route, Payload::RequestTransactions)?;
            if msg.ids.len() > MAX_INV_PER_TX_INV_MSG {
                return Err(ProtocolError::MisbehavingPeer(format!("requested {} transactions in a single message", msg.ids.len())));
            }
            for id in msg.ids {
                // Orphans are not served
                if let Some(mutable_tx) = self.ctx.mining_manager().get_transaction(id, true, false).await {
                    let transaction = (*mutable_tx.tx).clone();
                    self.router.enqueue(make_message!(Payload::Transaction, TransactionMessage { transaction })).await?;
                } else {
                    self.router.enqueue(make_message!(Payload::TransactionNotFound, TransactionNotFoundMessage { id })).await?;
                }
            }
        }
    }
}
