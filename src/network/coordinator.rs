use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::SimConfig;
use crate::consensus::engine::NodeState;
use crate::consensus::fault::FaultAssignment;
use crate::consensus::message::{NodeId, Value};
use crate::error::SimError;
use crate::network::channel::Transport;
use crate::network::node::NodeRuntime;

/// Global observation result.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Outcome {
    /// Every honest participant decided, and on the same value.
    Converged(Value),
    /// Some honest node's round counter passed the configured ceiling
    /// without a decision. A diagnostic, not a crash: expected whenever
    /// the fault ratio exceeds the tolerance bound.
    NonTermination { round: u64 },
    /// Two honest nodes decided different values. Never expected within
    /// the tolerance bound; surfaced rather than masked.
    Diverged,
}

/// Owns the n node runtimes and the fault assignment. Issues lifecycle
/// commands and aggregates published snapshots; it never reaches into a
/// node's tally and it never decides values itself.
#[derive(Debug)]
pub struct Network {
    config: SimConfig,
    transport: Transport,
    nodes: Vec<NodeRuntime>,
    assignment: FaultAssignment,
    ready_rx: UnboundedReceiver<NodeId>,
    ready: HashSet<NodeId>,
}

impl Network {
    /// Validate the configuration and construct all n runtimes. Every
    /// node (faulty or not) registers an inbox and signals readiness
    /// during construction.
    pub fn new(
        config: SimConfig,
        assignment: FaultAssignment,
        initial_values: Vec<Value>,
    ) -> Result<Self, SimError> {
        if config.n == 0 || config.f >= config.n {
            return Err(SimError::InvalidConfiguration {
                n: config.n,
                f: config.f,
            });
        }
        assert_eq!(assignment.len(), config.n, "assignment covers every node");
        assert_eq!(initial_values.len(), config.n, "one initial value per node");

        let transport = Transport::new(config.n, config.channel_capacity);
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();

        let nodes = (0..config.n)
            .map(|id| {
                NodeRuntime::new(
                    id,
                    config.clone(),
                    assignment.kind(id),
                    initial_values[id],
                    transport.clone(),
                    &ready_tx,
                )
            })
            .collect();

        Ok(Network {
            config,
            transport,
            nodes,
            assignment,
            ready_rx,
            ready: HashSet::new(),
        })
    }

    /// Readiness barrier: completes once all n nodes have signaled,
    /// regardless of fault status. Each node signals exactly once.
    pub async fn wait_ready(&mut self) {
        while self.ready.len() < self.config.n {
            match self.ready_rx.recv().await {
                Some(id) => {
                    self.ready.insert(id);
                }
                None => {
                    warn!("readiness channel closed early");
                    break;
                }
            }
        }
        info!(n = self.config.n, "all nodes ready");
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn assignment(&self) -> &FaultAssignment {
        &self.assignment
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn node(&self, id: NodeId) -> Result<&NodeRuntime, SimError> {
        self.nodes.get(id).ok_or(SimError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeRuntime, SimError> {
        self.nodes.get_mut(id).ok_or(SimError::UnknownNode(id))
    }

    pub fn start(&mut self, id: NodeId) -> Result<(), SimError> {
        self.node_mut(id)?.start()
    }

    pub fn stop(&mut self, id: NodeId) -> Result<(), SimError> {
        self.node_mut(id)?.stop()
    }

    pub fn kill(&mut self, id: NodeId) -> Result<(), SimError> {
        self.node_mut(id)?.kill();
        Ok(())
    }

    pub fn state(&self, id: NodeId) -> Result<NodeState, SimError> {
        Ok(self.node(id)?.state())
    }

    pub fn is_running(&self, id: NodeId) -> Result<bool, SimError> {
        Ok(self.node(id)?.is_running())
    }

    /// Start every node. Already-killed nodes are reported, everything
    /// else is attempted.
    pub fn start_all(&mut self) -> Result<(), SimError> {
        for node in &mut self.nodes {
            node.start()?;
        }
        info!(n = self.config.n, "network started");
        Ok(())
    }

    pub fn stop_all(&mut self) {
        for node in &mut self.nodes {
            // A killed node cannot be stopped; that is not a reason to
            // leave the rest running.
            let _ = node.stop();
        }
        info!("network stopped");
    }

    /// Values decided so far by honest nodes.
    pub fn decided_values(&self) -> Vec<(NodeId, Value)> {
        self.assignment
            .honest_ids()
            .filter_map(|id| {
                let state = self.nodes[id].state();
                match (state.has_decided(), state.value) {
                    (true, Some(v)) => Some((id, v)),
                    _ => None,
                }
            })
            .collect()
    }

    /// Agreement check over whatever has been decided so far: all
    /// decided honest nodes report the same value. Vacuously true while
    /// nobody has decided.
    pub fn is_converged(&self) -> bool {
        let decided = self.decided_values();
        decided.windows(2).all(|w| w[0].1 == w[1].1)
    }

    /// Highest round counter currently published by an honest node.
    pub fn max_round(&self) -> u64 {
        self.assignment
            .honest_ids()
            .filter_map(|id| self.nodes[id].state().round)
            .max()
            .unwrap_or(0)
    }

    /// Poll published snapshots until the run resolves: all honest
    /// nodes decided (converged or diverged), or some round counter
    /// passed the ceiling. Killed and stopped honest nodes are excluded
    /// from the "everyone decided" requirement; they are not going to.
    pub async fn wait_for_outcome(&mut self, poll: Duration) -> Outcome {
        loop {
            let decided = self.decided_values();
            if !self.is_converged() {
                warn!("agreement violated among decided honest nodes");
                return Outcome::Diverged;
            }

            let participants: Vec<NodeId> = self
                .assignment
                .honest_ids()
                .filter(|&id| self.nodes[id].is_running() || self.nodes[id].state().has_decided())
                .collect();

            if !participants.is_empty()
                && participants
                    .iter()
                    .all(|&id| self.nodes[id].state().has_decided())
            {
                // All honest participants decided and they agree.
                let value = decided[0].1;
                info!(%value, "network converged");
                return Outcome::Converged(value);
            }

            let round = self.max_round();
            if round > self.config.round_ceiling {
                info!(round, ceiling = self.config.round_ceiling, "round ceiling exceeded");
                return Outcome::NonTermination { round };
            }

            sleep(poll).await;
        }
    }
}
