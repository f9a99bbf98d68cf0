pub mod channel;
pub mod coordinator;
pub mod node;

pub use channel::*;
pub use coordinator::*;
pub use node::*;

/*
    Communication is point-to-point and unordered: a broadcast is the
    broadcaster sending the same message to all nodes, including
    itself, as n independent sends. Delivery between live honest nodes
    succeeds; delivery to crashed, stopped, or killed nodes fails or is
    swallowed, and the protocol layer above treats every failure as
    silence. There is no partial-synchrony machinery here: the only
    clock the engines use is the per-phase collection deadline.
*/
