use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::clock::Timestamp;
use crate::common::{error::Result, id::ProcessId};

/*
    A process asks for the critical section by broadcasting a REQUEST that
    carries its request record ⟨timestamp, requester⟩. Every other process
    answers with a REPLY, either at once or, if it currently outranks the
    requester, after it leaves the critical section. The requester enters
    once it holds a REPLY from each of the N - 1 others.
*/

/// A claim on the resource. Records are totally ordered: the lower one wins.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: Timestamp,
    pub requester: ProcessId,
}

impl RequestRecord {
    pub fn new(timestamp: Timestamp, requester: ProcessId) -> Self {
        RequestRecord {
            timestamp,
            requester,
        }
    }

    /// True when `self` has priority over `other`.
    pub fn precedes(&self, other: &RequestRecord) -> bool {
        self.cmp(other) == Ordering::Less
    }
}

impl Ord for RequestRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.timestamp.cmp(&other.timestamp) {
            // equal timestamps: the lower process id goes first
            Ordering::Equal => self.requester.cmp(&other.requester),
            ordering => ordering,
        }
    }
}

impl PartialOrd for RequestRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Messages exchanged between peer engines.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Request(RequestRecord),
    Reply { from: ProcessId, timestamp: Timestamp },
}

impl Message {
    pub fn sender(&self) -> ProcessId {
        match self {
            Message::Request(record) => record.requester,
            Message::Reply { from, .. } => *from,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Message::Request(record) => record.timestamp,
            Message::Reply { timestamp, .. } => *timestamp,
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_string(line: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(line)?)
    }
}

/// Raised towards the resource user when the engine enters or leaves HELD.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Notification {
    Granted(RequestRecord),
    Released,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: Timestamp, id: u32) -> RequestRecord {
        RequestRecord::new(timestamp, ProcessId(id))
    }

    #[test]
    fn test_lower_timestamp_wins() {
        assert!(record(1, 9).precedes(&record(2, 1)));
        assert!(!record(2, 1).precedes(&record(1, 9)));
    }

    #[test]
    fn test_tie_broken_by_process_id() {
        assert!(record(1, 1).precedes(&record(1, 2)));
        assert!(!record(1, 2).precedes(&record(1, 1)));
        assert_eq!(record(3, 4).cmp(&record(3, 4)), Ordering::Equal);
    }

    #[test]
    fn test_sort_is_total() {
        let mut records = vec![record(2, 1), record(1, 3), record(1, 2), record(3, 0)];
        records.sort();
        assert_eq!(
            records,
            vec![record(1, 2), record(1, 3), record(2, 1), record(3, 0)]
        );
    }

    #[test]
    fn test_wire_format() {
        let request = Message::Request(record(4, 2));
        let json = request.to_json_string().unwrap();
        assert_eq!(json, r#"{"type":"REQUEST","timestamp":4,"requester":2}"#);

        let reply = Message::from_json_string(r#"{"type":"REPLY","from":3,"timestamp":9}"#).unwrap();
        assert_eq!(
            reply,
            Message::Reply {
                from: ProcessId(3),
                timestamp: 9
            }
        );
        assert_eq!(reply.sender(), ProcessId(3));
        assert_eq!(reply.timestamp(), 9);
    }

    #[test]
    fn test_malformed_line_is_codec_error() {
        let err = Message::from_json_string("{\"type\":\"GRANT\"}").unwrap_err();
        assert!(matches!(err, crate::common::MutexError::Codec(_)));
    }
}
