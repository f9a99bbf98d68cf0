use std::collections::HashSet;

use tokio::sync::mpsc::Receiver;
use tracing::{debug, trace};

use super::message::{Ballot, Message, NodeId, Phase, Value};
use crate::network::channel::Transport;

/*
    The fault model owns two things: who is faulty, fixed for the whole
    run, and how a faulty node behaves on the wire. It never decides
    values for honest nodes; it only shapes the traffic they see.

    Crashed nodes are structurally present (their inbox exists and is
    drained so the network stays ready) but contribute nothing to any
    tally. Byzantine nodes equivocate: for every round and phase they
    hear about they send value 0 to even peers and value 1 to odd
    peers, withholding from one peer that rotates with the round. The
    honest protocol has to tolerate exactly this kind of traffic.
*/

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FaultKind {
    Honest,
    /// Never sends, never responds.
    Crashed,
    /// Sends arbitrary, conflicting values to different peers.
    Byzantine,
}

impl FaultKind {
    pub fn is_honest(&self) -> bool {
        matches!(self, FaultKind::Honest)
    }
}

/// Per-node fault behavior, fixed for the lifetime of one run.
#[derive(Clone, Debug)]
pub struct FaultAssignment {
    kinds: Vec<FaultKind>,
}

impl FaultAssignment {
    /// Mark the lowest `f` ids as faulty with `kind`, the rest honest.
    /// The lowest-ids rule keeps scenarios reproducible from (n, f)
    /// alone without any per-test special casing.
    pub fn classify(n: usize, f: usize, kind: FaultKind) -> Self {
        let kinds = (0..n)
            .map(|id| if id < f { kind } else { FaultKind::Honest })
            .collect();
        FaultAssignment { kinds }
    }

    /// Explicit per-node assignment for mixed scenarios.
    pub fn from_kinds(kinds: Vec<FaultKind>) -> Self {
        FaultAssignment { kinds }
    }

    pub fn kind(&self, id: NodeId) -> FaultKind {
        self.kinds.get(id).copied().unwrap_or(FaultKind::Honest)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn faulty_count(&self) -> usize {
        self.kinds.iter().filter(|k| !k.is_honest()).count()
    }

    pub fn honest_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| k.is_honest())
            .map(|(id, _)| id)
    }
}

/// The whole life of a crashed node: keep the inbox drained so peers
/// never see backpressure from it, send nothing, decide nothing.
pub async fn run_crashed(id: NodeId, mut msg_rx: Receiver<Message>) {
    debug!(id, "crashed node up (drain only)");
    while msg_rx.recv().await.is_some() {}
    trace!(id, "crashed node inbox closed");
}

/// Byzantine node loop. Reactive: the first time it hears any message
/// for a (round, phase) it answers that slot with conflicting ballots,
/// value 0 to even peers and value 1 to odd peers, skipping the peer at
/// `round % n` to exercise selective withholding.
pub async fn run_byzantine(id: NodeId, n: usize, transport: Transport, mut msg_rx: Receiver<Message>) {
    debug!(id, "byzantine node up");
    let mut answered: HashSet<(u64, Phase)> = HashSet::new();

    while let Some(heard) = msg_rx.recv().await {
        if !answered.insert((heard.round, heard.phase)) {
            continue;
        }
        let withheld = heard.round as usize % n;
        for peer in 0..n {
            if peer == withheld {
                continue;
            }
            let value = Value::from_bit(peer % 2 == 1);
            let msg = Message {
                sender: id,
                round: heard.round,
                phase: heard.phase,
                ballot: Ballot::Value(value),
            };
            if let Err(e) = transport.send(peer, msg) {
                trace!(id, peer, %e, "byzantine send dropped");
            }
        }
        // Old rounds are never revisited; keep the set from growing.
        answered.retain(|(round, _)| *round + 2 >= heard.round);
    }
}
