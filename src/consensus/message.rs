/*
    Ben-Or's protocol exchanges two kinds of messages per round. In the
    first phase every node reports its current proposal; in the second
    phase a node votes for a value only if it saw that value on more
    than half of the network, otherwise it abstains. Messages carry the
    sender, the round they belong to, the phase, and the ballot. They
    are immutable once sent; a receiver may see messages from rounds it
    has not reached yet and must buffer them rather than drop them.
*/

pub type NodeId = usize;

/// The binary consensus domain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Value {
    Zero,
    One,
}

impl Value {
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Value::One
        } else {
            Value::Zero
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Zero => write!(f, "0"),
            Value::One => write!(f, "1"),
        }
    }
}

/// What a message carries: a concrete value, or an explicit abstention.
/// Abstain is a legal phase-two ballot and is excluded from vote counts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Ballot {
    Value(Value),
    Abstain,
}

impl Ballot {
    pub fn value(&self) -> Option<Value> {
        match self {
            Ballot::Value(v) => Some(*v),
            Ballot::Abstain => None,
        }
    }
}

/// The two phases of a round. `Propose` orders before `Vote` so that
/// (round, phase) pairs sort in protocol order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Phase {
    Propose,
    Vote,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Message {
    pub sender: NodeId,
    pub round: u64,
    pub phase: Phase,
    pub ballot: Ballot,
}
