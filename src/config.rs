use std::time::Duration;

use crate::error::SimError;

/// Tuning knobs for one simulation run. `n` and `f` are validated up
/// front; everything else has defaults that suit in-process tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Total number of nodes.
    pub n: usize,
    /// Number of faulty nodes the run is provisioned for.
    pub f: usize,
    /// How long a phase waits for its quorum before proceeding with
    /// whatever arrived. Bounds the only blocking point in the protocol.
    pub phase_timeout: Duration,
    /// Round count past which the coordinator reports non-termination.
    pub round_ceiling: u64,
    /// Master seed; each node derives its own generator from this and
    /// its id, so runs are reproducible.
    pub seed: u64,
    /// Capacity of each node's inbox.
    pub channel_capacity: usize,
}

impl SimConfig {
    /// Build a configuration, rejecting `n == 0` and `f >= n` before any
    /// node is constructed.
    pub fn new(n: usize, f: usize) -> Result<Self, SimError> {
        if n == 0 || f >= n {
            return Err(SimError::InvalidConfiguration { n, f });
        }
        Ok(SimConfig {
            n,
            f,
            phase_timeout: Duration::from_millis(100),
            round_ceiling: 10,
            seed: 0,
            channel_capacity: 1024,
        })
    }

    /// Quorum of distinct senders a phase waits for.
    pub fn quorum(&self) -> usize {
        self.n - self.f
    }

    /// Whether the configured fault ratio is within the protocol's
    /// tolerance bound. Below this, termination is only probable, not
    /// guaranteed; the simulation still runs either way.
    pub fn within_tolerance(&self) -> bool {
        self.n > 2 * self.f
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn with_round_ceiling(mut self, ceiling: u64) -> Self {
        self.round_ceiling = ceiling;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}
