use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, Sender},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::{
    common::{error::Result, id::ProcessId},
    mutex::Message,
};

/// Longest line accepted from a peer. Messages are a few dozen bytes.
pub const MAX_LINE_LENGTH: usize = 1024;

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Accepts peer connections and feeds every decoded message into `inbox`.
pub fn spawn_listener(id: ProcessId, listener: TcpListener, inbox: Sender<Message>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(process = %id, %err, "failed to accept peer connection");
                    continue;
                }
            };
            debug!(process = %id, %remote, "accepted peer connection");

            let inbox = inbox.clone();
            tokio::spawn(async move {
                read_messages(id, stream, inbox).await;
            });
        }
    })
}

async fn read_messages(id: ProcessId, stream: TcpStream, inbox: Sender<Message>) {
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(process = %id, %err, "closing peer connection");
                break;
            }
        };
        match Message::from_json_string(&line) {
            Ok(message) => {
                if inbox.send(message).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!(process = %id, %err, %line, "dropping malformed message"),
        }
    }
}

/// Opens the single connection `from` uses to talk to `to`.
///
/// The returned sender goes into the peer directory. One connection per
/// directed pair keeps delivery FIFO for that pair.
pub async fn connect(
    from: ProcessId,
    to: ProcessId,
    addr: SocketAddr,
    capacity: usize,
) -> Result<(Sender<Message>, JoinHandle<()>)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    info!(process = %from, peer = %to, %addr, "connected to peer");

    let (tx, mut rx) = mpsc::channel::<Message>(capacity);
    let task = tokio::spawn(async move {
        let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        while let Some(message) = rx.recv().await {
            let line = match message.to_json_string() {
                Ok(line) => line,
                Err(err) => {
                    warn!(process = %from, peer = %to, %err, "failed to encode message");
                    continue;
                }
            };
            if let Err(err) = lines.send(line).await {
                warn!(process = %from, peer = %to, %err, "peer connection lost");
                break;
            }
        }
    });

    Ok((tx, task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::RequestRecord;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_messages_cross_the_socket_in_order() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (inbox_tx, mut inbox_rx) = mpsc::channel(16);
        let _listener = spawn_listener(ProcessId(2), listener, inbox_tx);

        let (tx, _task) = connect(ProcessId(1), ProcessId(2), addr, 16).await.unwrap();
        let request = Message::Request(RequestRecord::new(1, ProcessId(1)));
        let reply = Message::Reply {
            from: ProcessId(1),
            timestamp: 3,
        };
        tx.send(request.clone()).await.unwrap();
        tx.send(reply.clone()).await.unwrap();

        assert_eq!(inbox_rx.recv().await.unwrap(), request);
        assert_eq!(inbox_rx.recv().await.unwrap(), reply);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (inbox_tx, mut inbox_rx) = mpsc::channel(16);
        let _listener = spawn_listener(ProcessId(2), listener, inbox_tx);

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"not json\n").await.unwrap();
        stream
            .write_all(b"{\"type\":\"REPLY\",\"from\":1,\"timestamp\":7}\n")
            .await
            .unwrap();

        assert_eq!(
            inbox_rx.recv().await.unwrap(),
            Message::Reply {
                from: ProcessId(1),
                timestamp: 7
            }
        );
    }
}
