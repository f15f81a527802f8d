pub mod node;
pub mod tcp;

/*
    Point-to-point channels between processes are assumed reliable and FIFO
    per ordered pair: if p sends m1 then m2 to q, q receives m1 before m2,
    and every message sent is eventually received. Nothing is assumed about
    ordering across different pairs. Both transports below keep exactly one
    ordered pipe per (sender, receiver).
*/

use std::{
    collections::BTreeMap,
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
    time::Duration,
};

use tokio::sync::{
    mpsc::{self, Receiver, Sender},
    watch,
};
use tracing::info;

pub use node::*;

use crate::{
    common::{
        error::{MutexError, Result},
        id::ProcessId,
    },
    mutex::{inbox_capacity, Message, MutexHandle, Notification, Peers, Status},
    simulator::{DelayBounds, Resource, Timing},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Transport {
    /// In-process tokio channels.
    Memory,
    /// Loopback TCP, process `i` listening on `base_port + i`. Port 0 picks
    /// ephemeral ports.
    Tcp { base_port: u16 },
}

/// A fixed set of processes, numbered `P1..=PN`.
pub struct Cluster {
    nodes: Vec<Node>,
    timing: watch::Sender<Timing>,
    resource: Arc<Resource>,
}

impl Cluster {
    /// Wires up and starts every processor without any resource user. The
    /// returned notification streams are in process order.
    pub async fn connect(
        processes: usize,
        transport: Transport,
        timing: Timing,
    ) -> Result<(Self, Vec<Receiver<Notification>>)> {
        let ids: Vec<ProcessId> = (1..=processes as u32).map(ProcessId).collect();
        let capacity = inbox_capacity(processes);

        let (nodes, notifications) = match transport {
            Transport::Memory => start_memory(&ids, capacity),
            Transport::Tcp { base_port } => start_tcp(&ids, capacity, base_port).await?,
        };
        info!(processes, ?transport, "cluster started");

        let (timing, _) = watch::channel(timing);
        let cluster = Cluster {
            nodes,
            timing,
            resource: Resource::new(),
        };
        Ok((cluster, notifications))
    }

    /// Starts every processor with a simulator attached.
    pub async fn start(processes: usize, transport: Transport, timing: Timing) -> Result<Self> {
        let (mut cluster, notifications) = Self::connect(processes, transport, timing).await?;
        for (node, notifications) in cluster.nodes.iter_mut().zip(notifications) {
            node.simulate(notifications, cluster.timing.subscribe(), Arc::clone(&cluster.resource));
        }
        Ok(cluster)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn handle(&self, id: ProcessId) -> Option<MutexHandle> {
        self.nodes
            .iter()
            .find(|node| node.id == id)
            .map(|node| node.handle.clone())
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.nodes.iter().map(Node::status).collect()
    }

    pub fn resource(&self) -> Arc<Resource> {
        Arc::clone(&self.resource)
    }

    pub fn timing(&self) -> Timing {
        *self.timing.borrow()
    }

    pub fn set_using_max(&self, max: Duration) -> Result<DelayBounds> {
        self.update_timing(|timing| &mut timing.using, max)
    }

    pub fn set_thinking_max(&self, max: Duration) -> Result<DelayBounds> {
        self.update_timing(|timing| &mut timing.thinking, max)
    }

    fn update_timing(
        &self,
        field: fn(&mut Timing) -> &mut DelayBounds,
        max: Duration,
    ) -> Result<DelayBounds> {
        let mut timing = *self.timing.borrow();
        let bounds = field(&mut timing).with_max(max)?;
        *field(&mut timing) = bounds;
        self.timing.send_replace(timing);
        Ok(bounds)
    }

    /// Stops every simulator and processor and waits for them.
    pub async fn shutdown(self) {
        for node in self.nodes {
            node.stop().await;
        }
        info!("cluster stopped");
    }
}

fn start_memory(ids: &[ProcessId], capacity: usize) -> (Vec<Node>, Vec<Receiver<Notification>>) {
    let mut senders: BTreeMap<ProcessId, Sender<Message>> = BTreeMap::new();
    let mut receivers = Vec::with_capacity(ids.len());
    for &id in ids {
        let (tx, rx) = mpsc::channel(capacity);
        senders.insert(id, tx);
        receivers.push((id, rx));
    }

    receivers
        .into_iter()
        .map(|(id, msg_rx)| {
            let peers = Peers::new(id, senders.iter().map(|(peer, tx)| (*peer, tx.clone())));
            Node::start(id, peers, msg_rx)
        })
        .unzip()
}

async fn start_tcp(
    ids: &[ProcessId],
    capacity: usize,
    base_port: u16,
) -> Result<(Vec<Node>, Vec<Receiver<Notification>>)> {
    let mut listeners = Vec::with_capacity(ids.len());
    let mut addrs = BTreeMap::new();
    for (index, &id) in ids.iter().enumerate() {
        let port = match base_port {
            0 => 0,
            base => base
                .checked_add(index as u16)
                .ok_or_else(|| {
                    MutexError::Io(io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        format!("no port left for {id}"),
                    ))
                })?,
        };
        let listener = tcp::bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))).await?;
        addrs.insert(id, listener.local_addr()?);
        listeners.push((id, listener));
    }

    let mut nodes = Vec::with_capacity(ids.len());
    let mut notifications = Vec::with_capacity(ids.len());
    for (id, listener) in listeners {
        let mut members = Vec::new();
        let mut tasks = Vec::new();
        for (&peer, &addr) in addrs.iter().filter(|(peer, _)| **peer != id) {
            let (tx, task) = tcp::connect(id, peer, addr, capacity).await?;
            members.push((peer, tx));
            tasks.push(task);
        }

        let (inbox_tx, msg_rx) = mpsc::channel(capacity);
        tasks.push(tcp::spawn_listener(id, listener, inbox_tx));

        let (mut node, stream) = Node::start(id, Peers::new(id, members), msg_rx);
        for task in tasks {
            node.attach_transport(task);
        }
        nodes.push(node);
        notifications.push(stream);
    }

    Ok((nodes, notifications))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::ProcessState;

    #[tokio::test]
    async fn test_memory_cluster_hands_resource_over() {
        let (cluster, mut notifications) = Cluster::connect(2, Transport::Memory, Timing::default())
            .await
            .unwrap();
        let p1 = cluster.handle(ProcessId(1)).unwrap();
        let p2 = cluster.handle(ProcessId(2)).unwrap();

        p1.acquire().await.unwrap();
        assert!(matches!(
            notifications[0].recv().await.unwrap(),
            Notification::Granted(_)
        ));

        p2.acquire().await.unwrap();
        p1.release().await.unwrap();
        assert!(matches!(
            notifications[1].recv().await.unwrap(),
            Notification::Granted(_)
        ));

        p2.release().await.unwrap();
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_timing_updates_respect_lower_bound() {
        let (cluster, _notifications) = Cluster::connect(1, Transport::Memory, Timing::default())
            .await
            .unwrap();

        let bounds = cluster.set_using_max(Duration::from_secs(15)).unwrap();
        assert_eq!(bounds.max(), Duration::from_secs(15));
        assert_eq!(cluster.timing().using.max(), Duration::from_secs(15));

        assert!(cluster.set_thinking_max(Duration::from_secs(1)).is_err());
        assert_eq!(cluster.timing().thinking, Timing::default().thinking);

        assert_eq!(cluster.statuses()[0].state, ProcessState::Released);
        cluster.shutdown().await;
    }
}
