use tokio::sync::{
    mpsc::{self, Receiver, Sender},
    oneshot, watch,
};
use tracing::{debug, error, info, trace, warn};

use super::{
    message::{Message, Notification},
    peers::Peers,
    state::{Action, MutexState, Status},
};
use crate::common::{
    error::{MutexError, Result},
    id::ProcessId,
};

/// Local intents, serialized into the same loop as peer messages.
#[derive(Debug)]
pub enum Command {
    Acquire(oneshot::Sender<Result<()>>),
    Release(oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Drives one [`MutexState`]: the only task that ever mutates it.
pub struct MutexProcessor {
    pub state: MutexState,
    pub peers: Peers,
    pub msg_rx: Receiver<Message>,
    pub cmd_rx: Receiver<Command>,
    pub notify_tx: Sender<Notification>,
    pub status_tx: watch::Sender<Status>,
}

/// The caller-side ends of a processor's channels.
pub struct ProcessChannels {
    pub handle: MutexHandle,
    pub notifications: Receiver<Notification>,
    pub status: watch::Receiver<Status>,
}

/// Capacity for a process inbox.
///
/// Within one request cycle a process receives at most one REQUEST and one
/// REPLY per peer, so 2(N - 1) slots can never fill up.
pub fn inbox_capacity(processes: usize) -> usize {
    (processes * 4).max(64)
}

impl MutexProcessor {
    pub fn new(id: ProcessId, peers: Peers, msg_rx: Receiver<Message>) -> (Self, ProcessChannels) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (notify_tx, notifications) = mpsc::channel(16);
        let state = MutexState::new(id, peers.ids());
        let (status_tx, status) = watch::channel(state.status());

        let processor = MutexProcessor {
            state,
            peers,
            msg_rx,
            cmd_rx,
            notify_tx,
            status_tx,
        };
        let channels = ProcessChannels {
            handle: MutexHandle { id, cmd_tx },
            notifications,
            status,
        };
        (processor, channels)
    }

    pub async fn run(mut self) {
        let id = self.state.id();
        info!(process = %id, peers = self.peers.len(), "running mutex processor");

        loop {
            tokio::select! {
                Some(message) = self.msg_rx.recv() => {
                    self.handle_message(message).await;
                }
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Acquire(ack)) => {
                        let result = self.state.acquire();
                        self.complete(result, ack).await;
                    }
                    Some(Command::Release(ack)) => {
                        let result = self.state.release();
                        self.complete(result, ack).await;
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        info!(process = %id, state = %self.state.state(), "mutex processor stopped");
    }

    async fn handle_message(&mut self, message: Message) {
        let id = self.state.id();
        trace!(process = %id, ?message, "received message");

        let result = self.state.on_message(message);
        self.publish_status();

        match result {
            Ok(actions) => self.execute(actions).await,
            Err(err) if err.is_protocol_violation() => {
                warn!(process = %id, %err, "ignoring message");
            }
            Err(err) => {
                error!(process = %id, %err, "failed to handle message");
            }
        }
    }

    async fn complete(&mut self, result: Result<Vec<Action>>, ack: oneshot::Sender<Result<()>>) {
        self.publish_status();
        let reply = match result {
            Ok(actions) => {
                self.execute(actions).await;
                Ok(())
            }
            Err(err) => {
                warn!(process = %self.state.id(), %err, "rejected local command");
                Err(err)
            }
        };
        let _ = ack.send(reply);
    }

    // must run before the actions of the same event are executed
    fn publish_status(&self) {
        self.status_tx.send_replace(self.state.status());
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, message } => {
                    if let Err(err) = self.peers.send(to, message).await {
                        warn!(process = %self.state.id(), %err, "failed to send");
                    }
                }
                Action::Notify(notification) => {
                    if self.notify_tx.send(notification).await.is_err() {
                        debug!(process = %self.state.id(), ?notification, "nobody listening for notifications");
                    }
                }
            }
        }
    }
}

/// Cheap, cloneable entry point for the local resource user.
#[derive(Clone, Debug)]
pub struct MutexHandle {
    id: ProcessId,
    cmd_tx: Sender<Command>,
}

impl MutexHandle {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Broadcasts a request. Resolves once the request is sent, not when the
    /// resource is granted; watch the notifications for that.
    pub async fn acquire(&self) -> Result<()> {
        self.call(Command::Acquire).await
    }

    pub async fn release(&self) -> Result<()> {
        self.call(Command::Release).await
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }

    async fn call(&self, command: fn(oneshot::Sender<Result<()>>) -> Command) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(command(ack_tx))
            .await
            .map_err(|_| MutexError::ProcessStopped(self.id))?;
        ack_rx.await.map_err(|_| MutexError::ProcessStopped(self.id))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::{message::RequestRecord, state::ProcessState};

    #[tokio::test]
    async fn test_acquire_sends_requests_and_grants_on_replies() {
        let (incoming_tx, incoming_rx) = mpsc::channel(100);
        let (peer2_tx, mut peer2_rx) = mpsc::channel(100);
        let (peer3_tx, mut peer3_rx) = mpsc::channel(100);

        let peers = Peers::new(ProcessId(1), vec![(ProcessId(2), peer2_tx), (ProcessId(3), peer3_tx)]);
        let (processor, mut channels) = MutexProcessor::new(ProcessId(1), peers, incoming_rx);

        tokio::spawn(async move {
            processor.run().await;
        });

        channels.handle.acquire().await.unwrap();

        let expected = Message::Request(RequestRecord::new(1, ProcessId(1)));
        assert_eq!(peer2_rx.recv().await.unwrap(), expected);
        assert_eq!(peer3_rx.recv().await.unwrap(), expected);

        incoming_tx
            .send(Message::Reply { from: ProcessId(2), timestamp: 2 })
            .await
            .unwrap();
        incoming_tx
            .send(Message::Reply { from: ProcessId(3), timestamp: 2 })
            .await
            .unwrap();

        assert_eq!(
            channels.notifications.recv().await.unwrap(),
            Notification::Granted(RequestRecord::new(1, ProcessId(1)))
        );

        channels.handle.release().await.unwrap();
        assert_eq!(channels.notifications.recv().await.unwrap(), Notification::Released);
        let status = channels
            .status
            .wait_for(|status| status.state == ProcessState::Released)
            .await
            .unwrap()
            .clone();
        assert_eq!(status.deferred, 0);
        assert!(status.pending.is_none());
    }

    #[tokio::test]
    async fn test_deferred_request_answered_on_release() {
        let (incoming_tx, incoming_rx) = mpsc::channel(100);
        let (peer2_tx, mut peer2_rx) = mpsc::channel(100);

        let peers = Peers::new(ProcessId(1), vec![(ProcessId(2), peer2_tx)]);
        let (processor, mut channels) = MutexProcessor::new(ProcessId(1), peers, incoming_rx);

        tokio::spawn(async move {
            processor.run().await;
        });

        channels.handle.acquire().await.unwrap();
        let _request = peer2_rx.recv().await.unwrap();

        // P2 asked with the same timestamp; P1 wins the tie and defers it
        incoming_tx
            .send(Message::Request(RequestRecord::new(1, ProcessId(2))))
            .await
            .unwrap();
        incoming_tx
            .send(Message::Reply { from: ProcessId(2), timestamp: 2 })
            .await
            .unwrap();
        assert!(matches!(
            channels.notifications.recv().await.unwrap(),
            Notification::Granted(_)
        ));
        assert!(peer2_rx.try_recv().is_err());

        channels.handle.release().await.unwrap();
        assert!(matches!(
            peer2_rx.recv().await.unwrap(),
            Message::Reply { from: ProcessId(1), .. }
        ));
    }

    #[tokio::test]
    async fn test_precondition_error_reaches_caller() {
        let (_incoming_tx, incoming_rx) = mpsc::channel(100);
        let peers = Peers::new(ProcessId(1), Vec::new());
        let (processor, channels) = MutexProcessor::new(ProcessId(1), peers, incoming_rx);

        tokio::spawn(async move {
            processor.run().await;
        });

        let err = channels.handle.release().await.unwrap_err();
        assert!(matches!(err, MutexError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_stopped_processor() {
        let (_incoming_tx, incoming_rx) = mpsc::channel(100);
        let peers = Peers::new(ProcessId(1), Vec::new());
        let (processor, channels) = MutexProcessor::new(ProcessId(1), peers, incoming_rx);

        let task = tokio::spawn(async move {
            processor.run().await;
        });
        channels.handle.shutdown().await;
        task.await.unwrap();

        let err = channels.handle.acquire().await.unwrap_err();
        assert!(matches!(err, MutexError::ProcessStopped(ProcessId(1))));
    }
}
