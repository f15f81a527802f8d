use std::time::Duration;

use thiserror::Error;

use super::id::ProcessId;
use crate::mutex::ProcessState;

/// Everything that can go wrong around a mutual-exclusion engine.
///
/// The variants fall in three groups. Precondition violations
/// (`InvalidState`) are returned to the local caller. Protocol violations
/// (`SelfRequest`, `UnknownPeer`, `StaleReply`, `DuplicateReply`) are logged by
/// the processor and otherwise ignored. The rest come from the transport and
/// the surrounding runtime.
#[derive(Debug, Error)]
pub enum MutexError {
    #[error("{operation} requires state {expected}, but process is {actual}")]
    InvalidState {
        operation: &'static str,
        expected: ProcessState,
        actual: ProcessState,
    },

    #[error("received a request from self ({0})")]
    SelfRequest(ProcessId),

    #[error("message from unknown peer {0}")]
    UnknownPeer(ProcessId),

    #[error("stale reply from {from} while {state}")]
    StaleReply { from: ProcessId, state: ProcessState },

    #[error("duplicate reply from {0}")]
    DuplicateReply(ProcessId),

    #[error("peer {0} is unreachable")]
    PeerUnreachable(ProcessId),

    #[error("process {0} has stopped")]
    ProcessStopped(ProcessId),

    #[error("invalid delay bounds: min {min:?}, max {max:?}")]
    InvalidBounds { min: Duration, max: Duration },

    #[error("resource already in use by {holder}")]
    ResourceBusy { holder: ProcessId },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),
}

impl MutexError {
    /// Protocol violations are survivable: the offending message is dropped.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            MutexError::SelfRequest(_)
                | MutexError::UnknownPeer(_)
                | MutexError::StaleReply { .. }
                | MutexError::DuplicateReply(_)
        )
    }
}

impl From<serde_json::Error> for MutexError {
    fn from(err: serde_json::Error) -> Self {
        MutexError::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MutexError>;
