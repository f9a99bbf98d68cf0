use std::collections::{BTreeMap, HashMap};

use super::message::{Ballot, Message, NodeId, Phase, Value};

/*
    Vote counting is the whole of the protocol's safety argument, so it
    lives here on plain owned data with no channels in sight. A tally
    holds at most one ballot per sender for a given (round, phase):
    an equivocating sender cannot inflate a count by re-sending, and a
    duplicate from the transport is harmless.

    Messages from rounds the node has not reached yet are buffered, not
    discarded; a fast peer's round-5 vote must still be countable when
    this node gets to round 5. Rounds already left behind are garbage.
*/

/// Per-node buffer of received messages, keyed by (round, phase).
/// First ballot per sender wins; later ones for the same slot are ignored.
#[derive(Debug, Default)]
pub struct PendingMessages {
    slots: BTreeMap<(u64, Phase), HashMap<NodeId, Ballot>>,
}

impl PendingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a message unless it belongs to a round before `current_round`.
    pub fn insert(&mut self, msg: Message, current_round: u64) {
        if msg.round < current_round {
            return;
        }
        self.slots
            .entry((msg.round, msg.phase))
            .or_default()
            .entry(msg.sender)
            .or_insert(msg.ballot);
    }

    /// Number of distinct senders heard for this round and phase.
    pub fn distinct_senders(&self, round: u64, phase: Phase) -> usize {
        self.slots.get(&(round, phase)).map_or(0, HashMap::len)
    }

    /// Remove and return the ballots collected for this round and phase.
    pub fn take(&mut self, round: u64, phase: Phase) -> HashMap<NodeId, Ballot> {
        self.slots.remove(&(round, phase)).unwrap_or_default()
    }

    /// Drop everything buffered for rounds before `round`.
    pub fn discard_before(&mut self, round: u64) {
        self.slots = self.slots.split_off(&(round, Phase::Propose));
    }
}

/// Phase-one rule: a value is a strong candidate if it was reported by
/// more than half of the whole network (strictly more than n/2 senders),
/// counted over whatever was collected. At most one value can qualify.
pub fn strong_majority(ballots: &HashMap<NodeId, Ballot>, n: usize) -> Option<Value> {
    for v in [Value::Zero, Value::One] {
        let count = ballots.values().filter(|b| b.value() == Some(v)).count();
        if 2 * count > n {
            return Some(v);
        }
    }
    None
}

/// What a node does with its phase-two tally.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Verdict {
    /// Some value gathered at least n - f votes: decide it.
    Decide(Value),
    /// Some value gathered more than f votes: adopt it for the next round.
    Adopt(Value),
    /// Nothing stood out: flip a local coin for the next round.
    CoinFlip,
}

/// Phase-two rule, abstentions excluded from both counts. The decide
/// threshold is checked before the adopt threshold; when n > 2f at most
/// one value can clear either bar in a given round.
pub fn evaluate(ballots: &HashMap<NodeId, Ballot>, n: usize, f: usize) -> Verdict {
    let count = |v: Value| ballots.values().filter(|b| b.value() == Some(v)).count();
    let (zeros, ones) = (count(Value::Zero), count(Value::One));

    for (v, votes) in [(Value::Zero, zeros), (Value::One, ones)] {
        if votes >= n - f {
            return Verdict::Decide(v);
        }
    }
    // Ties cannot adopt: with zeros == ones neither side is majority-leaning.
    if zeros > f && zeros > ones {
        return Verdict::Adopt(Value::Zero);
    }
    if ones > f && ones > zeros {
        return Verdict::Adopt(Value::One);
    }
    Verdict::CoinFlip
}
