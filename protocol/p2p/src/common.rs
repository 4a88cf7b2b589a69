use crate::{KestrelMessagePayloadType, codec::CodecError, core::peer::PeerKey};
use kestrel_consensus_core::errors::{block::RuleError, consensus::ConsensusError, pruning::PruningImportError};
use kestrel_mining_errors::manager::MiningManagerError;
use std::{net::IpAddr, time::Duration};
use thiserror::Error;

/// Default P2P communication timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120); // 2 minutes

#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("timeout expired after {0:?}")]
    Timeout(Duration),

    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("P2P protocol version mismatch - local: {0}, remote: {1}")]
    VersionMismatch(u32, u32),

    #[error("Network mismatch - local: {0}, remote: {1}")]
    WrongNetwork(String, String),

    #[error("expected message type/s {0} but got {1:?}")]
    UnexpectedMessage(&'static str, Option<KestrelMessagePayloadType>),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("{0}")]
    RuleError(#[from] RuleError),

    #[error("{0}")]
    PruningImportError(#[from] PruningImportError),

    #[error("{0}")]
    ConsensusError(#[from] ConsensusError),

    #[error("{0}")]
    MiningManagerError(#[from] MiningManagerError),

    #[error("{0}")]
    Other(&'static str),

    #[error("{0}")]
    OtherOwned(String),

    #[error("misbehaving peer: {0}")]
    MisbehavingPeer(String),

    #[error("peer connection is closed")]
    ConnectionClosed,

    #[error("incoming route capacity for message type {0:?} has been reached (peer: {1})")]
    IncomingRouteCapacityReached(KestrelMessagePayloadType, String),

    #[error("no flow has been registered for message type {0:?}")]
    NoRouteForMessageType(KestrelMessagePayloadType),

    #[error("peer {0} already exists")]
    PeerAlreadyExists(PeerKey),

    #[error("loopback connection - node is connecting to itself")]
    LoopbackConnection(PeerKey),

    #[error("address {0} is banned")]
    Banned(IpAddr),

    #[error("got reject message: {0}")]
    Rejected(String),

    #[error("got reject message: {0}")]
    IgnorableReject(String),
}

/// String used as a P2P convention to signal connection is rejected because we are connecting to ourselves
const LOOPBACK_CONNECTION_MESSAGE: &str = "LOOPBACK_CONNECTION";

/// String used as a P2P convention to signal connection is rejected because the peer already exists
const DUPLICATE_CONNECTION_MESSAGE: &str = "DUPLICATE_CONNECTION";

impl ProtocolError {
    pub fn is_connection_closed_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    pub fn can_send_outgoing_message(&self) -> bool {
        !matches!(self, Self::ConnectionClosed)
    }

    /// Whether the error proves the peer sent invalid data, as opposed to being slow, unlucky or out of sync.
    /// Each such error counts as an offense of the peer
    pub fn should_ban(&self) -> bool {
        match self {
            Self::MisbehavingPeer(_) | Self::MalformedMessage(_) | Self::UnexpectedMessage(..) => true,
            Self::RuleError(err) => is_banworthy_rule_error(err),
            Self::ConsensusError(ConsensusError::Rule(err)) => is_banworthy_rule_error(err),
            Self::PruningImportError(_) => true,
            Self::MiningManagerError(MiningManagerError::MempoolError(err)) => err.is_invalid_by_consensus(),
            _ => false,
        }
    }

    pub fn to_reject_message(&self) -> String {
        match self {
            Self::LoopbackConnection(_) => LOOPBACK_CONNECTION_MESSAGE.to_owned(),
            Self::PeerAlreadyExists(_) => DUPLICATE_CONNECTION_MESSAGE.to_owned(),
            err => err.to_string(),
        }
    }

    pub fn from_reject_message(reason: String) -> Self {
        if reason == LOOPBACK_CONNECTION_MESSAGE || reason == DUPLICATE_CONNECTION_MESSAGE {
            ProtocolError::IgnorableReject(reason)
        } else {
            ProtocolError::Rejected(reason)
        }
    }
}

impl From<CodecError> for ProtocolError {
    fn from(err: CodecError) -> Self {
        ProtocolError::MalformedMessage(err.to_string())
    }
}

/// Missing or pruned parents and duplicates are part of normal sync, everything else is an invalid block
fn is_banworthy_rule_error(err: &RuleError) -> bool {
    !matches!(err, RuleError::MissingParents(_) | RuleError::PrunedBlock(_) | RuleError::DuplicateBlock(_))
}

/// Wraps an inner payload message into a valid `KestrelMessage`.
/// Usage:
/// ```ignore
/// let msg = make_message!(Payload::Verack, verack_msg)
/// ```
#[macro_export]
macro_rules! make_message {
    ($pattern:path, $msg:expr) => {{ $crate::messages::KestrelMessage { payload: $pattern($msg) } }};
}

/// Macro to extract a specific payload type from an `Option<KestrelMessage>`.
/// Usage:
/// ```ignore
/// let res = unwrap_message!(op, Payload::Verack)
/// ```
#[macro_export]
macro_rules! unwrap_message {
    ($op:expr, $pattern:path) => {{
        if let Some(msg) = $op {
            if let $pattern(inner_msg) = msg.payload {
                Ok(inner_msg)
            } else {
                Err($crate::common::ProtocolError::UnexpectedMessage(stringify!($pattern), Some((&msg.payload).into())))
            }
        } else {
            Err($crate::common::ProtocolError::ConnectionClosed)
        }
    }};
}

/// Macro to await a channel `Receiver<KestrelMessage>::recv` call with a default/specified timeout and expect a specific payload type.
/// Usage:
/// ```ignore
/// let res = dequeue_with_timeout!(receiver, Payload::Verack) // Uses the default timeout
/// // or:
/// let res = dequeue_with_timeout!(receiver, Payload::Verack, Duration::from_secs(30))
/// ```
#[macro_export]
macro_rules! dequeue_with_timeout {
    ($receiver:expr, $pattern:path) => {{
        match tokio::time::timeout($crate::common::DEFAULT_TIMEOUT, $receiver.recv()).await {
            Ok(op) => {
                $crate::unwrap_message!(op, $pattern)
            }
            Err(_) => Err($crate::common::ProtocolError::Timeout($crate::common::DEFAULT_TIMEOUT)),
        }
    }};
    ($receiver:expr, $pattern:path, $timeout_duration:expr) => {{
        match tokio::time::timeout($timeout_duration, $receiver.recv()).await {
            Ok(op) => {
                $crate::unwrap_message!(op, $pattern)
            }
            Err(_) => Err($crate::common::ProtocolError::Timeout($timeout_duration)),
        }
    }};
}

/// Macro to indefinitely await a channel `Receiver<KestrelMessage>::recv` call and expect a specific payload type (without a timeout).
/// Usage:
/// ```ignore
/// let res = dequeue!(receiver, Payload::Verack)
/// ```
#[macro_export]
macro_rules! dequeue {
    ($receiver:expr, $pattern:path) => {{ $crate::unwrap_message!($receiver.recv().await, $pattern) }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus_core::errors::block::VecDisplay;
    use kestrel_hashes::Hash;

    #[test]
    fn test_ban_classification() {
        assert!(ProtocolError::MalformedMessage("bad frame".to_owned()).should_ban());
        assert!(ProtocolError::RuleError(RuleError::InvalidPoW).should_ban());
        assert!(ProtocolError::ConsensusError(ConsensusError::Rule(RuleError::NoTransactions)).should_ban());
        assert!(!ProtocolError::RuleError(RuleError::MissingParents(VecDisplay(vec![Hash::from_u64_word(1)]))).should_ban());
        assert!(!ProtocolError::Timeout(DEFAULT_TIMEOUT).should_ban());
        assert!(!ProtocolError::ConnectionClosed.should_ban());
        assert!(!ProtocolError::ConsensusError(ConsensusError::BlockNotFound(Hash::from_u64_word(1))).should_ban());
    }

    #[test]
    fn test_reject_message_conventions() {
        let key = PeerKey::new(crate::PeerId::random(), "127.0.0.1".parse().unwrap(), 1);
        let reason = ProtocolError::LoopbackConnection(key).to_reject_message();
        assert!(matches!(ProtocolError::from_reject_message(reason), ProtocolError::IgnorableReject(_)));
        let reason = ProtocolError::Other("boom").to_reject_message();
        assert!(matches!(ProtocolError::from_reject_message(reason), ProtocolError::Rejected(r) if r == "boom"));
    }
}
