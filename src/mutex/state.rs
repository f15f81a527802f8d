use std::{
    collections::{BTreeSet, VecDeque},
    fmt,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    clock::{LogicalClock, Timestamp},
    message::{Message, Notification, RequestRecord},
};
use crate::common::{
    error::{MutexError, Result},
    id::ProcessId,
};

/*
    Ricart and Agrawala, "An Optimal Algorithm for Mutual Exclusion in
    Computer Networks" (1981).

    On receipt of REQUEST(T_j, j) process i:
      - replies at once if it neither holds nor wants the resource, or if it
        wants it but its own request (T_i, i) is younger than (T_j, j);
      - otherwise queues j and replies when it leaves the critical section.

    The lowest outstanding request is therefore never deferred by anyone
    who is not already inside, which gives both safety and freedom from
    starvation under reliable delivery.
*/

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ProcessState {
    Released,
    Wanted,
    Held,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Released => write!(f, "RELEASED"),
            ProcessState::Wanted => write!(f, "WANTED"),
            ProcessState::Held => write!(f, "HELD"),
        }
    }
}

/// What the engine asks its driver to do after handling an event.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Action {
    Send { to: ProcessId, message: Message },
    Notify(Notification),
}

/// Point-in-time view of one engine, for status reporting.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Status {
    pub id: ProcessId,
    pub state: ProcessState,
    pub clock: Timestamp,
    pub pending: Option<RequestRecord>,
    pub replies: usize,
    pub deferred: usize,
}

/// The per-process Ricart–Agrawala state machine.
///
/// Pure: every operation mutates local state and returns the [`Action`]s the
/// caller must carry out, in order. Nothing here touches the network.
#[derive(Debug, Clone)]
pub struct MutexState {
    id: ProcessId,
    clock: LogicalClock,
    state: ProcessState,
    current: Option<RequestRecord>,
    replies: BTreeSet<ProcessId>,
    deferred: VecDeque<ProcessId>,
    peers: BTreeSet<ProcessId>,
}

impl MutexState {
    pub fn new(id: ProcessId, peers: impl IntoIterator<Item = ProcessId>) -> Self {
        let peers = peers.into_iter().filter(|peer| *peer != id).collect();
        MutexState {
            id,
            clock: LogicalClock::new(),
            state: ProcessState::Released,
            current: None,
            replies: BTreeSet::new(),
            deferred: VecDeque::new(),
            peers,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn clock(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn current_request(&self) -> Option<RequestRecord> {
        self.current
    }

    pub fn replies(&self) -> &BTreeSet<ProcessId> {
        &self.replies
    }

    pub fn deferred(&self) -> &VecDeque<ProcessId> {
        &self.deferred
    }

    pub fn status(&self) -> Status {
        Status {
            id: self.id,
            state: self.state,
            clock: self.clock.now(),
            pending: self.current,
            replies: self.replies.len(),
            deferred: self.deferred.len(),
        }
    }

    /// Starts a new request cycle and broadcasts REQUEST to every peer.
    pub fn acquire(&mut self) -> Result<Vec<Action>> {
        self.expect_state("acquire", ProcessState::Released)?;

        let record = RequestRecord::new(self.clock.tick(), self.id);
        self.current = Some(record);
        self.state = ProcessState::Wanted;
        self.replies.clear();
        debug!(process = %self.id, timestamp = record.timestamp, "requesting resource");

        let mut actions: Vec<Action> = self
            .peers
            .iter()
            .map(|&to| Action::Send {
                to,
                message: Message::Request(record),
            })
            .collect();

        // nobody to ask
        if self.peers.is_empty() {
            actions.push(self.enter());
        }

        Ok(actions)
    }

    pub fn on_message(&mut self, message: Message) -> Result<Vec<Action>> {
        match message {
            Message::Request(record) => self.on_request(record),
            Message::Reply { from, timestamp } => self.on_reply(from, timestamp),
        }
    }

    /// Either replies to the requester now or defers it until `release`.
    pub fn on_request(&mut self, record: RequestRecord) -> Result<Vec<Action>> {
        let from = record.requester;
        if from == self.id {
            return Err(MutexError::SelfRequest(from));
        }
        if !self.peers.contains(&from) {
            return Err(MutexError::UnknownPeer(from));
        }

        self.clock.observe(record.timestamp);

        let defer = match self.state {
            ProcessState::Released => false,
            ProcessState::Wanted => self
                .current
                .map_or(false, |current| !record.precedes(&current)),
            ProcessState::Held => true,
        };

        if defer {
            debug!(process = %self.id, requester = %from, state = %self.state, "deferring reply");
            self.deferred.push_back(from);
            return Ok(Vec::new());
        }

        debug!(process = %self.id, requester = %from, "replying");
        Ok(vec![Action::Send {
            to: from,
            message: self.reply(),
        }])
    }

    /// Records a grant; enters the critical section once every peer replied.
    pub fn on_reply(&mut self, from: ProcessId, timestamp: Timestamp) -> Result<Vec<Action>> {
        if !self.peers.contains(&from) {
            return Err(MutexError::UnknownPeer(from));
        }

        self.clock.observe(timestamp);

        if self.state != ProcessState::Wanted {
            return Err(MutexError::StaleReply {
                from,
                state: self.state,
            });
        }
        if !self.replies.insert(from) {
            return Err(MutexError::DuplicateReply(from));
        }

        if self.replies.len() == self.peers.len() {
            return Ok(vec![self.enter()]);
        }
        Ok(Vec::new())
    }

    /// Leaves the critical section and answers everyone that was deferred.
    pub fn release(&mut self) -> Result<Vec<Action>> {
        self.expect_state("release", ProcessState::Held)?;

        self.state = ProcessState::Released;
        self.current = None;
        self.replies.clear();
        info!(process = %self.id, deferred = self.deferred.len(), "released resource");

        let mut actions = Vec::with_capacity(self.deferred.len() + 1);
        while let Some(to) = self.deferred.pop_front() {
            let message = self.reply();
            actions.push(Action::Send { to, message });
        }
        actions.push(Action::Notify(Notification::Released));

        Ok(actions)
    }

    fn enter(&mut self) -> Action {
        self.state = ProcessState::Held;
        self.replies.clear();
        let record = self.current.unwrap_or(RequestRecord::new(self.clock.now(), self.id));
        info!(process = %self.id, timestamp = record.timestamp, "holding resource");
        Action::Notify(Notification::Granted(record))
    }

    fn reply(&mut self) -> Message {
        Message::Reply {
            from: self.id,
            timestamp: self.clock.tick(),
        }
    }

    fn expect_state(&self, operation: &'static str, expected: ProcessState) -> Result<()> {
        if self.state != expected {
            return Err(MutexError::InvalidState {
                operation,
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}
