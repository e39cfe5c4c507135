/*!
 * IPC Server for Bluesmith Daemon
 * JSON lines over a Unix socket; scan events stream back on the requesting connection
 */

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bluetooth::{event_channel, BluetoothManager, ErrorKind, EventReceiver, Reply};

const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Status,
    ListKnown,
    ListPaired,
    ListAttached,
    Pair { id: String },
    Connect { id: String },
    Unpair { id: String },
    Remove { id: String },
    StartScan,
    StopScan,
    ScanStatus,
}

pub struct IpcServer {
    listener: UnixListener,
    bluetooth_manager: Arc<BluetoothManager>,
}

impl IpcServer {
    pub fn new(listener: UnixListener, bluetooth_manager: Arc<BluetoothManager>) -> Self {
        Self {
            listener,
            bluetooth_manager,
        }
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("IPC server listening for connections...");

        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    tracing::debug!("New client connected");
                    let bluetooth_manager = self.bluetooth_manager.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, bluetooth_manager).await {
                            tracing::error!("Client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Per-connection state.
struct Connection {
    manager: Arc<BluetoothManager>,
    outbound: mpsc::Sender<String>,
    /// Scan session started from this connection, released on disconnect.
    scan: Option<Uuid>,
    /// Task streaming the latest session's events to this connection.
    forwarder: Option<JoinHandle<()>>,
}

impl Connection {
    async fn handle(&mut self, line: &str) -> Result<()> {
        let request = match serde_json::from_str::<Request>(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Rejecting malformed request: {}", e);
                let reply = Reply {
                    success: false,
                    error: Some(format!("Invalid request: {}", e)),
                    kind: Some(ErrorKind::Validation),
                    ..Reply::default()
                };
                return self.send(&reply).await;
            }
        };

        tracing::debug!("Received request: {:?}", request);
        let reply = match request {
            Request::Status => self.manager.status().await,
            Request::ListKnown => self.manager.list_known().await,
            Request::ListPaired => self.manager.list_paired().await,
            Request::ListAttached => self.manager.list_attached().await,
            Request::Pair { id } => self.manager.pair_and_connect(&id).await,
            Request::Connect { id } => self.manager.connect(&id).await,
            Request::Unpair { id } => self.manager.unpair(&id).await,
            Request::Remove { id } => self.manager.remove(&id).await,
            Request::StartScan => return self.start_scan().await,
            Request::StopScan => self.manager.stop_scan().await,
            Request::ScanStatus => self.manager.scan_status().await,
        };
        self.send(&reply).await
    }

    async fn start_scan(&mut self) -> Result<()> {
        let (events, receiver) = event_channel(self.manager.event_buffer());
        let reply = self.manager.start_scan(events).await;
        let (true, Some(session)) = (reply.success, reply.session) else {
            return self.send(&reply).await;
        };

        // The previous session's stream, end marker included, goes out first.
        if let Some(previous) = self.forwarder.take() {
            let _ = previous.await;
        }
        self.send(&reply).await?;

        self.scan = Some(session);
        self.forwarder = Some(tokio::spawn(forward_events(
            receiver,
            session,
            self.outbound.clone(),
        )));
        Ok(())
    }

    async fn send(&self, reply: &Reply) -> Result<()> {
        self.outbound.send(serde_json::to_string(reply)?).await?;
        Ok(())
    }
}

async fn forward_events(
    mut receiver: EventReceiver,
    session: Uuid,
    outbound: mpsc::Sender<String>,
) {
    while let Some(event) = receiver.recv().await {
        tracing::trace!("Forwarding scan event for {}", event.id());
        let line = serde_json::json!({ "event": event }).to_string();
        if outbound.send(line).await.is_err() {
            return;
        }
    }
    let _ = outbound
        .send(serde_json::json!({ "event": { "type": "ended", "session": session } }).to_string())
        .await;
}

async fn handle_client(stream: UnixStream, manager: Arc<BluetoothManager>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let (outbound, mut pending) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(line) = pending.recv().await {
            write_half.write_all(line.as_bytes()).await?;
            write_half.write_all(b"\n").await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut connection = Connection {
        manager,
        outbound,
        scan: None,
        forwarder: None,
    };

    let mut lines = BufReader::new(read_half).lines();
    let result = async {
        while let Some(line) = lines.next_line().await? {
            let request = line.trim();
            if request.is_empty() {
                continue;
            }
            connection.handle(request).await?;
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    if let Some(session) = connection.scan.take() {
        tracing::debug!("Client left, releasing scan session {}", session);
        connection.manager.release_scan(session).await;
    }

    tracing::debug!("Client disconnected");
    drop(connection);
    writer.abort();
    result
}
