use std::sync::Arc;

use tokio::{
    sync::{
        mpsc::Receiver,
        watch,
    },
    task::JoinHandle,
};
use tracing::warn;

use crate::{
    common::id::ProcessId,
    mutex::{Message, MutexHandle, MutexProcessor, Notification, Peers, Status},
    simulator::{Resource, Simulator, Timing},
};

/// One running process: its processor task plus whatever feeds it.
pub struct Node {
    pub id: ProcessId,
    pub handle: MutexHandle,
    pub status: watch::Receiver<Status>,
    processor: JoinHandle<()>,
    simulator: Option<JoinHandle<()>>,
    transport: Vec<JoinHandle<()>>,
}

impl Node {
    /// Spawns the processor. The caller gets the grant/release stream.
    pub fn start(id: ProcessId, peers: Peers, msg_rx: Receiver<Message>) -> (Self, Receiver<Notification>) {
        let (processor, channels) = MutexProcessor::new(id, peers, msg_rx);
        let node = Node {
            id,
            handle: channels.handle,
            status: channels.status,
            processor: tokio::spawn(processor.run()),
            simulator: None,
            transport: Vec::new(),
        };
        (node, channels.notifications)
    }

    pub fn attach_transport(&mut self, task: JoinHandle<()>) {
        self.transport.push(task);
    }

    /// Hands the process over to a resource-usage simulator.
    pub fn simulate(
        &mut self,
        notifications: Receiver<Notification>,
        timing: watch::Receiver<Timing>,
        resource: Arc<Resource>,
    ) {
        let simulator = Simulator::new(self.handle.clone(), notifications, timing, resource);
        self.simulator = Some(tokio::spawn(simulator.run(None)));
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    pub async fn stop(self) {
        if let Some(simulator) = self.simulator {
            simulator.abort();
        }
        self.handle.shutdown().await;
        if let Err(err) = self.processor.await {
            warn!(process = %self.id, %err, "processor task failed");
        }
        for task in self.transport {
            task.abort();
        }
    }
}
