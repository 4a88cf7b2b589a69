use kestrel_core::{debug, warn};
use kestrel_p2p_lib::{Router, common::ProtocolError};
use std::sync::Arc;

#[async_trait::async_trait]
pub trait Flow
where
    Self: 'static + Send + Sync,
{
    fn name(&self) -> &'static str;
    fn router(&self) -> Option<Arc<Router>>;

    async fn start(&mut self) -> Result<(), ProtocolError>;

    /// Spawns the flow. A flow error ends the connection: the peer is told why (best-effort), the error
    /// is reported to the hub for offense accounting and the router is closed
    fn launch(mut self: Box<Self>) {
        tokio::spawn(async move {
            let res = self.start().await;
            if let Err(err) = res {
                if let Some(router) = self.router() {
                    router.try_sending_reject_message(&err).await;
                    router.report_offense(err.clone()).await;
                    if router.close().await || !err.is_connection_closed_error() {
                        if err.is_connection_closed_error() {
                            debug!("{} flow: connection to peer {} closed", self.name(), router);
                        } else {
                            warn!("{} flow error: {}, disconnecting from peer {}.", self.name(), err, router);
                        }
                    }
                }
            }
        });
    }
}

/// Ends the current request of a serving flow if it concerns data missing locally, keeping the flow alive.
/// Any other error is passed on
pub fn ignore_not_found(flow: &'static str, router: &Router, res: Result<(), ProtocolError>) -> Result<(), ProtocolError> {
    match res {
        Err(err) if crate::flow_context::is_not_found_error(&err) => {
            debug!("{} flow: request of peer {} concerns missing data: {}", flow, router, err);
            Ok(())
        }
        res => res,
    }
}
