use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::trace;

use crate::consensus::message::{Message, NodeId};
use crate::error::DeliveryError;

/*
    Point-to-point, unordered, deliver-or-drop transport. A broadcast is
    nothing more than n independent sends, so a sender that dies halfway
    through leaves no shared state to clean up. Sends never block: a
    full or closed inbox is reported as a delivery error and the caller
    treats it as silence.
*/

#[derive(Debug)]
enum Slot {
    /// No inbox registered yet (or the node was constructed but its
    /// runtime has not handed out a channel).
    Vacant,
    Open(mpsc::Sender<Message>),
    /// Permanently gone; sends fail loudly rather than silently.
    Killed,
}

/// Shared in-process message channel connecting all n nodes.
///
/// Cloning is cheap; every runtime and engine holds a handle. The only
/// lock guards the slot table and is never held across an await.
#[derive(Clone, Debug)]
pub struct Transport {
    slots: Arc<Mutex<Vec<Slot>>>,
    capacity: usize,
}

impl Transport {
    pub fn new(n: usize, capacity: usize) -> Self {
        let slots = (0..n).map(|_| Slot::Vacant).collect();
        Transport {
            slots: Arc::new(Mutex::new(slots)),
            capacity,
        }
    }

    /// Open (or replace) the inbox for `id` and hand back the receiving
    /// end. Replacing drops any messages queued on the old channel,
    /// which is exactly restart-with-a-fresh-proposal semantics. A
    /// killed slot stays killed.
    pub fn register(&self, id: NodeId) -> Option<mpsc::Receiver<Message>> {
        let mut slots = self.slots.lock().expect("transport lock poisoned");
        match slots.get(id) {
            None | Some(Slot::Killed) => None,
            _ => {
                let (tx, rx) = mpsc::channel(self.capacity);
                slots[id] = Slot::Open(tx);
                Some(rx)
            }
        }
    }

    /// Mark `id` permanently killed. Queued messages are dropped and all
    /// future sends fail with [`DeliveryError::NodeKilled`].
    pub fn kill(&self, id: NodeId) {
        let mut slots = self.slots.lock().expect("transport lock poisoned");
        if id < slots.len() {
            slots[id] = Slot::Killed;
        }
    }

    pub fn is_killed(&self, id: NodeId) -> bool {
        let slots = self.slots.lock().expect("transport lock poisoned");
        matches!(slots.get(id), Some(Slot::Killed))
    }

    /// Deliver one message. Never blocks.
    pub fn send(&self, to: NodeId, msg: Message) -> Result<(), DeliveryError> {
        let tx = {
            let slots = self.slots.lock().expect("transport lock poisoned");
            match slots.get(to) {
                Some(Slot::Open(tx)) => tx.clone(),
                Some(Slot::Killed) => return Err(DeliveryError::NodeKilled(to)),
                Some(Slot::Vacant) | None => return Err(DeliveryError::Unreachable(to)),
            }
        };
        tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::InboxFull(to),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Unreachable(to),
        })
    }

    /// Send `msg` to every node including the sender itself. Per-peer
    /// failures are traced and swallowed; a faulty or stopped peer's
    /// silence must never stall the sender.
    pub fn broadcast(&self, msg: Message) {
        let n = {
            let slots = self.slots.lock().expect("transport lock poisoned");
            slots.len()
        };
        for to in 0..n {
            if let Err(e) = self.send(to, msg) {
                trace!(from = msg.sender, to, %e, "broadcast leg dropped");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("transport lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
