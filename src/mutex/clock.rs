use serde::{Deserialize, Serialize};

/*
    Lamport's clock rule. Each process keeps a counter that it advances
    before stamping any outgoing message, and that it pushes past any
    timestamp it receives. If event a happens-before event b then
    C(a) < C(b); the converse does not hold, which is why requests carrying
    the same timestamp are tie-broken by process id.
*/

pub type Timestamp = u64;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct LogicalClock {
    time: Timestamp,
}

impl LogicalClock {
    pub fn new() -> Self {
        LogicalClock { time: 0 }
    }

    pub fn now(&self) -> Timestamp {
        self.time
    }

    /// Advances the clock for a local send and returns the value to stamp.
    pub fn tick(&mut self) -> Timestamp {
        self.time += 1;
        self.time
    }

    /// Merges a received timestamp: `max(local, remote) + 1`.
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        self.time = self.time.max(remote) + 1;
        self.time
    }
}
