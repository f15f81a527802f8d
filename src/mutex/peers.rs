use std::collections::BTreeMap;

use tokio::sync::mpsc::Sender;

use super::message::Message;
use crate::common::{
    error::{MutexError, Result},
    id::ProcessId,
};

/// The fixed set of other processes and how to reach each of them.
///
/// Never contains the owning process, so a broadcast over `ids()` never
/// addresses self.
#[derive(Debug, Clone)]
pub struct Peers {
    pub members: BTreeMap<ProcessId, Sender<Message>>,
}

impl Peers {
    pub fn new(own_id: ProcessId, members: impl IntoIterator<Item = (ProcessId, Sender<Message>)>) -> Self {
        let members = members
            .into_iter()
            .filter(|(id, _)| *id != own_id)
            .collect();
        Peers { members }
    }

    pub fn ids(&self) -> Vec<ProcessId> {
        self.members.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_member(&self, id: &ProcessId) -> bool {
        self.members.contains_key(id)
    }

    pub fn resolve(&self, id: ProcessId) -> Result<&Sender<Message>> {
        self.members.get(&id).ok_or(MutexError::UnknownPeer(id))
    }

    /// Hands `message` to the transport for `to`. No retry on failure.
    pub async fn send(&self, to: ProcessId, message: Message) -> Result<()> {
        self.resolve(to)?
            .send(message)
            .await
            .map_err(|_| MutexError::PeerUnreachable(to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_excludes_self_and_routes() {
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (tx3, _rx3) = mpsc::channel(8);

        let peers = Peers::new(
            ProcessId(1),
            vec![(ProcessId(1), tx1), (ProcessId(2), tx2), (ProcessId(3), tx3)],
        );

        assert_eq!(peers.ids(), vec![ProcessId(2), ProcessId(3)]);
        assert!(!peers.is_member(&ProcessId(1)));

        let reply = Message::Reply {
            from: ProcessId(1),
            timestamp: 5,
        };
        peers.send(ProcessId(2), reply.clone()).await.unwrap();
        assert_eq!(rx2.recv().await.unwrap(), reply);
    }

    #[tokio::test]
    async fn test_unknown_and_unreachable() {
        let (tx2, rx2) = mpsc::channel(8);
        let peers = Peers::new(ProcessId(1), vec![(ProcessId(2), tx2)]);
        let reply = Message::Reply {
            from: ProcessId(1),
            timestamp: 1,
        };

        let err = peers.send(ProcessId(9), reply.clone()).await.unwrap_err();
        assert!(matches!(err, MutexError::UnknownPeer(ProcessId(9))));

        drop(rx2);
        let err = peers.send(ProcessId(2), reply).await.unwrap_err();
        assert!(matches!(err, MutexError::PeerUnreachable(ProcessId(2))));
    }
}
