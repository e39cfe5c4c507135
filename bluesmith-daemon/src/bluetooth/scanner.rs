/*!
 * Scan Session Manager
 * Owns the one interactive bluetoothctl session used for discovery
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::device::Device;
use super::error::{BluetoothError, Result};
use super::events::EventSender;
use super::parser::{classify_line, LineBuffer};
use super::registry::ScanRegistry;
use super::tool::{ControlTool, Session, SessionProcess};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotScanning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStatus {
    pub session: Uuid,
    pub started_at: DateTime<Utc>,
    pub discovered: usize,
}

enum ScanState {
    Idle,
    Scanning(ActiveScan),
}

struct ActiveScan {
    session: Uuid,
    started_at: DateTime<Utc>,
    input: Box<dyn AsyncWrite + Send + Unpin>,
    process: Box<dyn SessionProcess>,
    reader: JoinHandle<()>,
}

struct Inner {
    state: ScanState,
    /// Registry of the current session, or of the last one once it ended.
    registry: Arc<Mutex<ScanRegistry>>,
}

pub struct Scanner {
    tool: Arc<dyn ControlTool>,
    inner: Arc<Mutex<Inner>>,
}

impl Scanner {
    pub fn new(tool: Arc<dyn ControlTool>) -> Self {
        Self {
            tool,
            inner: Arc::new(Mutex::new(Inner {
                state: ScanState::Idle,
                registry: Arc::new(Mutex::new(ScanRegistry::new())),
            })),
        }
    }

    /// Starts discovery and returns once the session is listening.
    ///
    /// Devices are reported on `events` as they are found; the channel closes
    /// when the session ends.
    pub async fn start(&self, events: EventSender) -> Result<Uuid> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, ScanState::Scanning(_)) {
            return Err(BluetoothError::AlreadyScanning);
        }

        super::ensure_powered(self.tool.as_ref()).await?;

        let Session {
            mut input,
            output,
            mut process,
        } = self.tool.open_session().await?;

        if let Err(e) = send_command(&mut input, "scan on").await {
            if let Err(kill) = process.terminate().await {
                tracing::warn!("Failed to terminate half-started scan session: {}", kill);
            }
            return Err(e.into());
        }

        let session = Uuid::new_v4();
        let registry = Arc::new(Mutex::new(ScanRegistry::new()));
        let reader = tokio::spawn(read_session(
            session,
            output,
            registry.clone(),
            events,
            self.inner.clone(),
        ));

        inner.registry = registry;
        inner.state = ScanState::Scanning(ActiveScan {
            session,
            started_at: Utc::now(),
            input,
            process,
            reader,
        });

        tracing::info!("Scan session {} started", session);
        Ok(session)
    }

    /// Ends the current session, if any. Always leaves the scanner idle.
    pub async fn stop(&self) -> StopOutcome {
        self.stop_matching(None).await
    }

    /// Ends `session` if it is still the one running.
    pub async fn stop_session(&self, session: Uuid) -> StopOutcome {
        self.stop_matching(Some(session)).await
    }

    async fn stop_matching(&self, session: Option<Uuid>) -> StopOutcome {
        let mut inner = self.inner.lock().await;
        match (&inner.state, session) {
            (ScanState::Idle, _) => return StopOutcome::NotScanning,
            (ScanState::Scanning(active), Some(wanted)) if active.session != wanted => {
                return StopOutcome::NotScanning
            }
            _ => {}
        }

        let ScanState::Scanning(mut active) = std::mem::replace(&mut inner.state, ScanState::Idle)
        else {
            return StopOutcome::NotScanning;
        };

        if let Err(e) = send_command(&mut active.input, "scan off").await {
            tracing::warn!("Could not send scan off to session {}: {}", active.session, e);
        }
        if let Err(e) = active.process.terminate().await {
            tracing::warn!("Could not terminate session {}: {}", active.session, e);
        }
        active.reader.abort();

        tracing::info!("Scan session {} stopped", active.session);
        StopOutcome::Stopped
    }

    #[cfg(test)]
    pub async fn is_scanning(&self) -> bool {
        matches!(self.inner.lock().await.state, ScanState::Scanning(_))
    }

    pub async fn status(&self) -> Option<ScanStatus> {
        let inner = self.inner.lock().await;
        let (session, started_at) = match &inner.state {
            ScanState::Scanning(active) => (active.session, active.started_at),
            ScanState::Idle => return None,
        };
        let discovered = inner.registry.lock().await.len();
        Some(ScanStatus {
            session,
            started_at,
            discovered,
        })
    }

    /// Devices found by the current or most recent session.
    pub async fn discovered(&self) -> Vec<Device> {
        let registry = self.inner.lock().await.registry.clone();
        let snapshot = registry.lock().await.snapshot();
        snapshot
    }
}

async fn send_command(
    input: &mut (dyn AsyncWrite + Send + Unpin),
    command: &str,
) -> std::io::Result<()> {
    input.write_all(command.as_bytes()).await?;
    input.write_all(b"\n").await?;
    input.flush().await
}

async fn read_session(
    session: Uuid,
    mut output: Box<dyn AsyncRead + Send + Unpin>,
    registry: Arc<Mutex<ScanRegistry>>,
    events: EventSender,
    inner: Arc<Mutex<Inner>>,
) {
    let mut buffer = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut forwarder = Forwarder {
        registry,
        events,
        listening: true,
    };

    loop {
        let read = match output.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) => {
                tracing::warn!("Scan session {} output failed: {}", session, e);
                break;
            }
        };
        for line in buffer.push(&chunk[..read]) {
            forwarder.forward(&line).await;
        }
    }
    if let Some(tail) = buffer.finish() {
        forwarder.forward(&tail).await;
    }

    let mut inner = inner.lock().await;
    let ours = matches!(&inner.state, ScanState::Scanning(active) if active.session == session);
    if ours {
        if let ScanState::Scanning(mut active) = std::mem::replace(&mut inner.state, ScanState::Idle)
        {
            if let Err(e) = active.process.terminate().await {
                tracing::debug!("Reaping exited session {}: {}", session, e);
            }
        }
        tracing::info!("Scan session {} ended: control tool exited", session);
    }
}

struct Forwarder {
    registry: Arc<Mutex<ScanRegistry>>,
    events: EventSender,
    listening: bool,
}

impl Forwarder {
    async fn forward(&mut self, line: &str) {
        let Some(parsed) = classify_line(line) else {
            tracing::trace!("Ignoring session output: {:?}", line);
            return;
        };

        let Some(event) = self.registry.lock().await.apply(parsed) else {
            return;
        };

        if self.listening && self.events.send(event).await.is_err() {
            tracing::debug!("Scan listener went away; draining output without forwarding");
            self.listening = false;
        }
    }
}
