use thiserror::Error;

use crate::consensus::message::NodeId;

/// Errors surfaced to callers of the simulation API.
///
/// Transient protocol-level trouble (quorum shortfall, lost messages) is
/// deliberately absent here: honest engines absorb it as silence and fall
/// back to the abstain/coin-flip path instead of propagating it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// Rejected at network construction, before any node exists.
    #[error("invalid configuration: n = {n}, f = {f} (need n > 0 and f < n)")]
    InvalidConfiguration { n: usize, f: usize },

    /// `start()` on a node that is not stopped.
    #[error("node {0} is already running")]
    AlreadyRunning(NodeId),

    /// Any command or message aimed at a permanently killed node.
    #[error("node {0} has been killed")]
    NodeKilled(NodeId),

    /// A node id outside [0, n).
    #[error("unknown node id {0}")]
    UnknownNode(NodeId),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Transport-level send failures. Engines treat every variant the same
/// way: as if no response will ever arrive from that peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("node {0} has been killed")]
    NodeKilled(NodeId),

    #[error("node {0} is unreachable")]
    Unreachable(NodeId),

    #[error("inbox of node {0} is full")]
    InboxFull(NodeId),
}
