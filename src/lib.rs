//! In-process simulator for randomized binary Byzantine consensus
//! (Ben-Or style): n nodes, up to f of them crashed or byzantine, one
//! tokio task per node, message passing as the only interaction.
//!
//! The interesting guarantees: honest nodes that decide agree, a
//! unanimous start decides that value, decisions are final, and when
//! n > 2f every honest node eventually decides. Past the tolerance
//! bound the network is allowed to spin forever, and the coordinator
//! reports that instead of inventing a decision.

pub mod config;
pub mod consensus;
pub mod error;
pub mod network;

pub use config::SimConfig;
pub use consensus::engine::{ConsensusEngine, NodeState};
pub use consensus::fault::{FaultAssignment, FaultKind};
pub use consensus::message::{Ballot, Message, NodeId, Phase, Value};
pub use error::{DeliveryError, SimError};
pub use network::channel::Transport;
pub use network::coordinator::{Network, Outcome};
pub use network::node::{Lifecycle, NodeRuntime};
