use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one process for the lifetime of a run.
///
/// Also the tie-break between two requests carrying the same timestamp, so the
/// ordering of ids is part of the protocol.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl ProcessId {
    pub fn new(id: u32) -> Self {
        ProcessId(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(id: u32) -> Self {
        ProcessId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_order() {
        let p1 = ProcessId::new(1);
        let p2 = ProcessId::from(2);

        assert_eq!(p1.to_string(), "P1");
        assert!(p1 < p2);
        assert_eq!(p2.as_u32(), 2);
    }

    #[test]
    fn test_serializes_as_plain_integer() {
        let json = serde_json::to_string(&ProcessId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
