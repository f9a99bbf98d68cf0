use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SimConfig;
use crate::consensus::engine::{ConsensusEngine, NodeState};
use crate::consensus::fault::{run_byzantine, run_crashed, FaultKind};
use crate::consensus::message::{Message, NodeId, Value};
use crate::error::SimError;
use crate::network::channel::Transport;

/// Explicit lifecycle. A tagged state instead of independent booleans:
/// "killed but running" is unrepresentable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Lifecycle {
    Stopped,
    Running,
    Killed,
}

/// Wraps one node's task (consensus engine for honest nodes, the fault
/// loop otherwise) with lifecycle control and an observable snapshot.
///
/// The runtime never touches the engine's state directly: the engine is
/// the single writer, the runtime only reads what it publishes.
#[derive(Debug)]
pub struct NodeRuntime {
    pub id: NodeId,
    fault: FaultKind,
    initial_value: Value,
    lifecycle: Lifecycle,
    config: SimConfig,
    transport: Transport,
    /// Inbox opened at construction so peers can queue messages before
    /// the first start; replaced on restart.
    msg_rx: Option<Receiver<Message>>,
    state_rx: watch::Receiver<NodeState>,
    task: Option<JoinHandle<()>>,
}

impl NodeRuntime {
    /// Construct the runtime, open its inbox, and signal readiness
    /// exactly once. A crashed node still registers: it must be
    /// structurally present to receive, even though it ignores input.
    pub fn new(
        id: NodeId,
        config: SimConfig,
        fault: FaultKind,
        initial_value: Value,
        transport: Transport,
        ready_tx: &UnboundedSender<NodeId>,
    ) -> Self {
        let msg_rx = transport.register(id);
        let initial = if fault.is_honest() {
            NodeState::initial(id, initial_value)
        } else {
            NodeState::vacant(id)
        };
        let (_, state_rx) = watch::channel(initial);

        if ready_tx.send(id).is_err() {
            warn!(id, "readiness listener gone");
        }

        NodeRuntime {
            id,
            fault,
            initial_value,
            lifecycle: Lifecycle::Stopped,
            config,
            transport,
            msg_rx,
            state_rx,
            task: None,
        }
    }

    pub fn fault(&self) -> FaultKind {
        self.fault
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    /// Begin (or restart) the protocol from round 1 with the node's
    /// original initial value. Restarting is a fresh run, not a
    /// resumption: whatever was queued while stopped is discarded with
    /// the old inbox.
    pub fn start(&mut self) -> Result<(), SimError> {
        match self.lifecycle {
            Lifecycle::Running => return Err(SimError::AlreadyRunning(self.id)),
            Lifecycle::Killed => return Err(SimError::NodeKilled(self.id)),
            Lifecycle::Stopped => {}
        }

        let msg_rx = match self.msg_rx.take() {
            Some(rx) => rx,
            None => self
                .transport
                .register(self.id)
                .ok_or(SimError::NodeKilled(self.id))?,
        };

        self.task = Some(self.spawn(msg_rx));
        self.lifecycle = Lifecycle::Running;
        debug!(id = self.id, fault = ?self.fault, "node started");
        Ok(())
    }

    fn spawn(&mut self, msg_rx: Receiver<Message>) -> JoinHandle<()> {
        match self.fault {
            FaultKind::Honest => {
                let (state_tx, state_rx) =
                    watch::channel(NodeState::initial(self.id, self.initial_value));
                self.state_rx = state_rx;
                // Per-node generator derived from the master seed keeps
                // coin flips independent across nodes but reproducible
                // across runs.
                let rng = ChaCha8Rng::seed_from_u64(self.config.seed ^ self.id as u64);
                let engine = ConsensusEngine::new(
                    self.id,
                    &self.config,
                    self.initial_value,
                    rng,
                    msg_rx,
                    self.transport.clone(),
                    state_tx,
                );
                tokio::spawn(engine.run())
            }
            FaultKind::Crashed => tokio::spawn(run_crashed(self.id, msg_rx)),
            FaultKind::Byzantine => tokio::spawn(run_byzantine(
                self.id,
                self.config.n,
                self.transport.clone(),
                msg_rx,
            )),
        }
    }

    /// Halt round activity, preserving the last published snapshot for
    /// inspection. Aborting the task abandons any in-flight quorum wait
    /// with no effect on other nodes. No-op when already stopped.
    pub fn stop(&mut self) -> Result<(), SimError> {
        match self.lifecycle {
            Lifecycle::Killed => Err(SimError::NodeKilled(self.id)),
            Lifecycle::Stopped => Ok(()),
            Lifecycle::Running => {
                if let Some(task) = self.task.take() {
                    task.abort();
                }
                self.lifecycle = Lifecycle::Stopped;
                debug!(id = self.id, "node stopped");
                Ok(())
            }
        }
    }

    /// Remove the node from the network permanently. Peers sending to
    /// it get a delivery error from here on, and its snapshot exposes
    /// the vacant state.
    pub fn kill(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.transport.kill(self.id);
        self.msg_rx = None;
        self.lifecycle = Lifecycle::Killed;
        debug!(id = self.id, "node killed");
    }

    /// Read-only snapshot; never mutates.
    pub fn state(&self) -> NodeState {
        match self.lifecycle {
            Lifecycle::Killed => NodeState::vacant(self.id),
            _ => *self.state_rx.borrow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn runtime(fault: FaultKind) -> (NodeRuntime, mpsc::UnboundedReceiver<NodeId>) {
        let config = SimConfig::new(1, 0).unwrap();
        let transport = Transport::new(1, config.channel_capacity);
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let node = NodeRuntime::new(0, config, fault, Value::One, transport, &ready_tx);
        (node, ready_rx)
    }

    async fn wait_decided(node: &NodeRuntime) {
        while !node.state().has_decided() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[tokio::test]
    async fn test_signals_ready_on_construction() {
        let (_node, mut ready_rx) = runtime(FaultKind::Honest);
        assert_eq!(ready_rx.recv().await, Some(0));
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let (mut node, _ready) = runtime(FaultKind::Honest);
        node.start().unwrap();
        assert_eq!(node.start(), Err(SimError::AlreadyRunning(0)));
    }

    #[tokio::test]
    async fn test_stop_preserves_last_snapshot() {
        let (mut node, _ready) = runtime(FaultKind::Honest);
        node.start().unwrap();
        wait_decided(&node).await;

        node.stop().unwrap();
        assert_eq!(node.lifecycle(), Lifecycle::Stopped);
        let state = node.state();
        assert_eq!(state.decided, Some(true));
        assert_eq!(state.value, Some(Value::One));

        // Stopping again is a no-op.
        assert_eq!(node.stop(), Ok(()));
    }

    #[tokio::test]
    async fn test_restart_resets_round_and_value() {
        let (mut node, _ready) = runtime(FaultKind::Honest);
        node.start().unwrap();
        wait_decided(&node).await;
        node.stop().unwrap();

        node.start().unwrap();
        // Fresh run: round counter restarts from the beginning with the
        // original initial value.
        let mut state = node.state();
        while state.round.is_none() {
            tokio::time::sleep(Duration::from_millis(2)).await;
            state = node.state();
        }
        assert_eq!(state.value, Some(Value::One));
        assert!(state.round <= Some(2));
    }

    #[tokio::test]
    async fn test_killed_node_is_gone_for_good() {
        let (mut node, _ready) = runtime(FaultKind::Honest);
        node.start().unwrap();
        node.kill();

        assert_eq!(node.lifecycle(), Lifecycle::Killed);
        assert_eq!(node.state(), NodeState::vacant(0));
        assert_eq!(node.start(), Err(SimError::NodeKilled(0)));
        assert_eq!(node.stop(), Err(SimError::NodeKilled(0)));
    }

    #[tokio::test]
    async fn test_faulty_node_publishes_vacant_state() {
        let (mut node, _ready) = runtime(FaultKind::Crashed);
        node.start().unwrap();
        assert!(node.is_running());
        assert_eq!(node.state(), NodeState::vacant(0));
    }
}
