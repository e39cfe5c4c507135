/*!
 * Scripted Control Tool for tests
 * One-shot commands answer from a table keyed by the joined arguments, with
 * per-command failure injection. Sessions run over in-memory duplex pipes
 * whose far ends are handed to the test.
 */

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::error::{BluetoothError, Result};
use super::tool::{ControlTool, Session, SessionProcess};

/// Test-side ends of one interactive session.
pub struct SessionPeer {
    /// Write here to make the session print something.
    pub output: DuplexStream,
    /// Read here to see what was written to the session.
    pub input: DuplexStream,
    pub terminated: Arc<AtomicBool>,
}

impl SessionPeer {
    pub async fn say(&mut self, text: &str) {
        self.output.write_all(text.as_bytes()).await.unwrap();
    }

    /// Reads whatever the session has been sent so far, up to `expected` bytes.
    pub async fn heard(&mut self, expected: usize) -> String {
        let mut buf = vec![0u8; expected];
        self.input.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }
}

struct MockProcess {
    terminated: Arc<AtomicBool>,
    fail: bool,
}

#[async_trait]
impl SessionProcess for MockProcess {
    async fn terminate(&mut self) -> std::io::Result<()> {
        if self.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ));
        }
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTool {
    responses: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
    peers: Mutex<Vec<SessionPeer>>,
    sessions_opened: Mutex<usize>,
    fail_spawn: AtomicBool,
    fail_terminate: AtomicBool,
    close_input: AtomicBool,
}

impl MockTool {
    pub fn new() -> Arc<Self> {
        let tool = Self::default();
        tool.respond("show", "Controller 00:1A:7D:DA:71:13 (public)\n\tPowered: yes\n");
        Arc::new(tool)
    }

    pub fn respond(&self, command: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), output.to_string());
    }

    pub fn fail(&self, command: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(command.to_string(), message.to_string());
    }

    pub fn fail_spawn(&self) {
        self.fail_spawn.store(true, Ordering::SeqCst);
    }

    pub fn fail_terminate(&self) {
        self.fail_terminate.store(true, Ordering::SeqCst);
    }

    /// Sessions opened from now on refuse input.
    pub fn close_session_input(&self) {
        self.close_input.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sessions_opened(&self) -> usize {
        *self.sessions_opened.lock().unwrap()
    }

    pub fn take_peer(&self) -> SessionPeer {
        self.peers.lock().unwrap().remove(0)
    }
}

#[async_trait]
impl ControlTool for MockTool {
    async fn run(&self, args: &[&str]) -> Result<String> {
        let command = args.join(" ");
        self.calls.lock().unwrap().push(command.clone());

        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(BluetoothError::Spawn {
                program: "bluetoothctl".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            });
        }

        if let Some(message) = self.failures.lock().unwrap().get(&command) {
            return Err(BluetoothError::CommandFailed {
                command: format!("bluetoothctl {}", command),
                code: Some(1),
                stderr: message.clone(),
            });
        }

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&command)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_session(&self) -> Result<Session> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(BluetoothError::Spawn {
                program: "bluetoothctl".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            });
        }
        *self.sessions_opened.lock().unwrap() += 1;

        let (session_out, peer_out) = tokio::io::duplex(4096);
        let (session_in, peer_in) = tokio::io::duplex(4096);
        let terminated = Arc::new(AtomicBool::new(false));

        let peer_in = if self.close_input.load(Ordering::SeqCst) {
            // Dropping the far end makes every write to the session fail.
            drop(peer_in);
            tokio::io::duplex(1).1
        } else {
            peer_in
        };

        self.peers.lock().unwrap().push(SessionPeer {
            output: peer_out,
            input: peer_in,
            terminated: terminated.clone(),
        });

        Ok(Session {
            input: Box::new(session_in),
            output: Box::new(session_out),
            process: Box::new(MockProcess {
                terminated,
                fail: self.fail_terminate.load(Ordering::SeqCst),
            }),
        })
    }
}
