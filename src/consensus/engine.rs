use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc::Receiver, watch};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace};

use super::message::{Ballot, Message, NodeId, Phase, Value};
use super::tally::{self, PendingMessages, Verdict};
use crate::config::SimConfig;
use crate::network::channel::Transport;

/*
    One honest node's view of Ben-Or. Each round has two phases:

      propose: broadcast the current value, gather n - f reports, and
               see whether any value was reported by more than half of
               the network;
      vote:    broadcast that candidate (or an abstention), gather
               n - f votes, and either decide (>= n - f votes), adopt
               the leaning value (> f votes), or flip a local coin.

    A node that misses its quorum because up to f peers are silent
    simply proceeds with what it has once the phase deadline passes;
    that is routine degraded behavior, not an error. After deciding,
    the engine plays one more round with the decided value and from
    then on echoes its decision into any later round it hears opened,
    so lagging peers always find the decided value in their tallies.
*/

/// Snapshot a node publishes after every transition. Fields are `None`
/// while the node is not a protocol participant (crashed, byzantine,
/// killed, or never started).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeState {
    pub id: NodeId,
    pub value: Option<Value>,
    pub decided: Option<bool>,
    pub round: Option<u64>,
}

impl NodeState {
    /// The "no participant" snapshot.
    pub fn vacant(id: NodeId) -> Self {
        NodeState {
            id,
            value: None,
            decided: None,
            round: None,
        }
    }

    /// State of a stopped-but-configured node: the initial value is
    /// known, but no round has run and nothing is decided yet.
    pub fn initial(id: NodeId, value: Value) -> Self {
        NodeState {
            id,
            value: Some(value),
            decided: None,
            round: None,
        }
    }

    pub fn has_decided(&self) -> bool {
        self.decided == Some(true)
    }
}

/// Per-node round state machine. Owns its state and tally exclusively;
/// the rest of the system sees it only through the `watch` snapshots.
pub struct ConsensusEngine {
    pub id: NodeId,
    pub n: usize,
    pub f: usize,
    pub value: Value,
    pub round: u64,
    pub decided: bool,
    phase_timeout: std::time::Duration,
    rng: ChaCha8Rng,
    pending: PendingMessages,
    msg_rx: Receiver<Message>,
    transport: Transport,
    state_tx: watch::Sender<NodeState>,
}

impl ConsensusEngine {
    pub fn new(
        id: NodeId,
        config: &SimConfig,
        initial_value: Value,
        rng: ChaCha8Rng,
        msg_rx: Receiver<Message>,
        transport: Transport,
        state_tx: watch::Sender<NodeState>,
    ) -> Self {
        ConsensusEngine {
            id,
            n: config.n,
            f: config.f,
            value: initial_value,
            round: 1,
            decided: false,
            phase_timeout: config.phase_timeout,
            rng,
            pending: PendingMessages::new(),
            msg_rx,
            transport,
            state_tx,
        }
    }

    /// Drive rounds until a decision, then help laggards for one more
    /// round and keep the inbox drained until aborted by stop or kill.
    pub async fn run(mut self) {
        debug!(id = self.id, value = %self.value, "engine up, round 1");
        self.publish();

        while !self.decided {
            self.run_round().await;
            if !self.decided {
                self.round += 1;
                self.pending.discard_before(self.round);
                self.publish();
            }
        }

        self.help_peers().await;
    }

    /// One propose+vote cycle.
    async fn run_round(&mut self) {
        // Phase 1: report the current proposal to everyone, self included.
        self.broadcast(Phase::Propose, Ballot::Value(self.value));
        let reports = self.collect(Phase::Propose).await;
        let candidate = tally::strong_majority(&reports, self.n);
        trace!(
            id = self.id,
            round = self.round,
            reports = reports.len(),
            ?candidate,
            "propose phase done"
        );

        // Phase 2: vote for the strong candidate, or abstain.
        let ballot = candidate.map_or(Ballot::Abstain, Ballot::Value);
        self.broadcast(Phase::Vote, ballot);
        let votes = self.collect(Phase::Vote).await;

        match tally::evaluate(&votes, self.n, self.f) {
            Verdict::Decide(v) => {
                self.value = v;
                self.decided = true;
                info!(id = self.id, round = self.round, value = %v, "decided");
            }
            Verdict::Adopt(v) => {
                trace!(id = self.id, round = self.round, value = %v, "adopted");
                self.value = v;
            }
            Verdict::CoinFlip => {
                self.value = Value::from_bit(self.rng.gen_bool(0.5));
                trace!(id = self.id, round = self.round, value = %self.value, "coin flip");
            }
        }
        self.publish();
    }

    /// Gather ballots for the current round and `phase` until n - f
    /// distinct senders are in or the phase deadline passes. Early
    /// messages for later rounds are buffered along the way.
    async fn collect(&mut self, phase: Phase) -> std::collections::HashMap<NodeId, Ballot> {
        let quorum = self.n - self.f;
        let deadline = Instant::now() + self.phase_timeout;

        while self.pending.distinct_senders(self.round, phase) < quorum {
            match timeout_at(deadline, self.msg_rx.recv()).await {
                Ok(Some(msg)) => self.pending.insert(msg, self.round),
                // Inbox replaced or closed: proceed with what we have.
                Ok(None) => break,
                // Deadline: up to f peers may stay silent forever, so a
                // short tally here is expected, not an error.
                Err(_) => {
                    trace!(
                        id = self.id,
                        round = self.round,
                        ?phase,
                        heard = self.pending.distinct_senders(self.round, phase),
                        "phase deadline with partial tally"
                    );
                    break;
                }
            }
        }
        self.pending.take(self.round, phase)
    }

    /// Terminal phase. The decision itself is final; what remains is
    /// helping peers a round behind see a quorum for it. One proactive
    /// extra round first, then the decided value is echoed into any
    /// later round an undecided peer opens. Once every honest node has
    /// decided, nobody opens new rounds and this goes quiet, draining
    /// the inbox so late senders never hit backpressure.
    async fn help_peers(mut self) {
        self.round += 1;
        let value = Ballot::Value(self.value);
        self.broadcast(Phase::Propose, value);
        self.broadcast(Phase::Vote, value);
        self.publish();

        let mut echoed = self.round;
        while let Some(msg) = self.msg_rx.recv().await {
            if msg.sender == self.id || msg.round <= echoed {
                continue;
            }
            echoed = msg.round;
            trace!(id = self.id, round = msg.round, "echoing decided value");
            for phase in [Phase::Propose, Phase::Vote] {
                self.transport.broadcast(Message {
                    sender: self.id,
                    round: msg.round,
                    phase,
                    ballot: value,
                });
            }
        }
    }

    fn broadcast(&self, phase: Phase, ballot: Ballot) {
        self.transport.broadcast(Message {
            sender: self.id,
            round: self.round,
            phase,
            ballot,
        });
    }

    fn publish(&self) {
        let _ = self.state_tx.send(NodeState {
            id: self.id,
            value: Some(self.value),
            decided: Some(self.decided),
            round: Some(self.round),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn engine_parts(
        id: NodeId,
        config: &SimConfig,
        value: Value,
        transport: &Transport,
    ) -> (ConsensusEngine, watch::Receiver<NodeState>) {
        let msg_rx = transport.register(id).unwrap();
        let (state_tx, state_rx) = watch::channel(NodeState::initial(id, value));
        let rng = ChaCha8Rng::seed_from_u64(config.seed ^ id as u64);
        let engine = ConsensusEngine::new(id, config, value, rng, msg_rx, transport.clone(), state_tx);
        (engine, state_rx)
    }

    async fn wait_decided(rx: &mut watch::Receiver<NodeState>) -> NodeState {
        loop {
            let state = *rx.borrow();
            if state.has_decided() {
                return state;
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_single_node_decides_own_value() {
        let config = SimConfig::new(1, 0).unwrap();
        let transport = Transport::new(1, config.channel_capacity);
        let (engine, mut state_rx) = engine_parts(0, &config, Value::One, &transport);

        tokio::spawn(engine.run());

        let state = wait_decided(&mut state_rx).await;
        assert_eq!(state.value, Some(Value::One));
        // Decision in round 1, plus the helper round.
        assert_eq!(state.round, Some(2));
    }

    #[tokio::test]
    async fn test_unanimous_start_decides_in_round_one() {
        let config = SimConfig::new(3, 0).unwrap();
        let transport = Transport::new(3, config.channel_capacity);

        let mut watchers = Vec::new();
        for id in 0..3 {
            let (engine, state_rx) = engine_parts(id, &config, Value::Zero, &transport);
            tokio::spawn(engine.run());
            watchers.push(state_rx);
        }

        for rx in &mut watchers {
            let state = wait_decided(rx).await;
            assert_eq!(state.value, Some(Value::Zero));
            assert_eq!(state.round, Some(2));
        }
    }

    #[tokio::test]
    async fn test_mixed_start_converges() {
        let config = SimConfig::new(3, 1)
            .unwrap()
            .with_seed(7)
            .with_phase_timeout(std::time::Duration::from_millis(20));
        let transport = Transport::new(3, config.channel_capacity);

        // Node 0 plays the crashed slot: registered but never started.
        let _silent = transport.register(0).unwrap();

        let (a, mut rx_a) = engine_parts(1, &config, Value::Zero, &transport);
        let (b, mut rx_b) = engine_parts(2, &config, Value::One, &transport);
        tokio::spawn(a.run());
        tokio::spawn(b.run());

        let got_a = wait_decided(&mut rx_a).await;
        let got_b = wait_decided(&mut rx_b).await;
        assert_eq!(got_a.value, got_b.value);
    }

    #[tokio::test]
    async fn test_round_advances_without_quorum() {
        // Alone in a 3-node network: the quorum of 2 is unreachable, so
        // rounds must advance on the phase deadline instead of hanging.
        let config = SimConfig::new(3, 1)
            .unwrap()
            .with_phase_timeout(std::time::Duration::from_millis(5));
        let transport = Transport::new(3, config.channel_capacity);
        let (engine, mut state_rx) = engine_parts(2, &config, Value::One, &transport);
        tokio::spawn(engine.run());

        loop {
            state_rx.changed().await.unwrap();
            let state = *state_rx.borrow();
            assert_ne!(state.decided, Some(true), "must not decide alone");
            if state.round >= Some(3) {
                break;
            }
        }
    }
}
