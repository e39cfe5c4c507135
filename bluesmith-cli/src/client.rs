/*!
 * Bluesmith Daemon Client
 * JSON lines IPC with bluesmithd
 */

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

#[derive(Debug, Clone, Serialize, Deserialize)]
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

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<Device>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub paired: bool,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub rssi: Option<i16>,
    #[serde(rename = "new", default)]
    pub discovered_as_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStatus {
    pub session: String,
    pub started_at: DateTime<Utc>,
    pub discovered: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Discovered { device: Device, at: DateTime<Utc> },
    Rssi { id: String, rssi: i16, at: DateTime<Utc> },
    Ended {
        #[serde(default)]
        session: Option<String>,
    },
}

impl ScanEvent {
    /// Whether this is the end marker of `session`. Markers from another
    /// session on the same connection do not count.
    pub fn ends(&self, session: Option<&str>) -> bool {
        match (self, session) {
            (Self::Ended { session: Some(ended) }, Some(current)) => ended == current,
            (Self::Ended { .. }, _) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Message {
    Event { event: ScanEvent },
    Reply(Reply),
}

pub struct BluesmithClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    /// Events that arrived while waiting for a reply.
    events: VecDeque<ScanEvent>,
}

impl BluesmithClient {
    pub async fn connect(socket_path: &str) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("cannot reach bluesmithd at {}", socket_path))?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
            events: VecDeque::new(),
        }
    }

    pub async fn send_request(&mut self, request: &Request) -> Result<Reply> {
        let request_json = serde_json::to_string(request)?;
        tracing::debug!("Sending request: {}", request_json);
        self.writer.write_all(request_json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;

        loop {
            match self.next_message().await? {
                Some(Message::Reply(reply)) => return Ok(reply),
                Some(Message::Event { event }) => self.events.push_back(event),
                None => bail!("daemon closed the connection"),
            }
        }
    }

    /// Next scan event; `None` once the daemon closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<ScanEvent>> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        loop {
            match self.next_message().await? {
                Some(Message::Event { event }) => return Ok(Some(event)),
                Some(Message::Reply(reply)) => {
                    tracing::debug!("Ignoring unsolicited reply: {:?}", reply);
                }
                None => return Ok(None),
            }
        }
    }

    async fn next_message(&mut self) -> Result<Option<Message>> {
        let Some(line) = self.lines.next_line().await? else {
            return Ok(None);
        };
        let message = serde_json::from_str(&line)
            .with_context(|| format!("unexpected daemon output: {}", line))?;
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fake_daemon(script: &'static [&'static str]) -> BluesmithClient {
        let (client, daemon) = UnixStream::pair().unwrap();
        tokio::spawn(async move {
            let (read, mut write) = daemon.into_split();
            let mut requests = BufReader::new(read).lines();
            if requests.next_line().await.unwrap().is_some() {
                for line in script {
                    write.write_all(line.as_bytes()).await.unwrap();
                    write.write_all(b"\n").await.unwrap();
                }
            }
        });
        BluesmithClient::from_stream(client)
    }

    #[tokio::test]
    async fn test_reply_with_devices() {
        let mut client = fake_daemon(&[
            r#"{"success":true,"devices":[{"id":"11:22:33:44:55:66","name":"Kitchen Speaker","paired":true,"connected":false,"rssi":null}]}"#,
        ])
        .await;

        let reply = client.send_request(&Request::ListKnown).await.unwrap();
        assert!(reply.success);
        let devices = reply.devices.unwrap();
        assert_eq!(devices[0].name, "Kitchen Speaker");
        assert!(devices[0].paired);
        assert!(!devices[0].discovered_as_new);
    }

    #[tokio::test]
    async fn test_events_before_reply_are_kept() {
        let mut client = fake_daemon(&[
            r#"{"event":{"type":"rssi","id":"11:22:33:44:55:66","rssi":-60,"at":"2024-05-01T12:00:00Z"}}"#,
            r#"{"success":true}"#,
            r#"{"event":{"type":"ended","session":"5f0c7a52-1111-4c8e-9d7e-2b9f3c1a0e42"}}"#,
        ])
        .await;

        let reply = client.send_request(&Request::StopScan).await.unwrap();
        assert!(reply.success);

        match client.next_event().await.unwrap() {
            Some(ScanEvent::Rssi { rssi, .. }) => assert_eq!(rssi, -60),
            other => panic!("unexpected event: {:?}", other),
        }
        match client.next_event().await.unwrap() {
            Some(ScanEvent::Ended { session }) => assert_eq!(
                session.as_deref(),
                Some("5f0c7a52-1111-4c8e-9d7e-2b9f3c1a0e42")
            ),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(client.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_reply() {
        let mut client = fake_daemon(&[
            r#"{"success":false,"error":"Failed to pair device: Invalid device ID","kind":"validation"}"#,
        ])
        .await;

        let reply = client
            .send_request(&Request::Pair { id: "nope".to_string() })
            .await
            .unwrap();
        assert!(!reply.success);
        assert_eq!(reply.kind.as_deref(), Some("validation"));
    }

    #[test]
    fn test_end_marker_matches_its_session() {
        let ended = |session: Option<&str>| ScanEvent::Ended {
            session: session.map(str::to_string),
        };

        assert!(ended(Some("b")).ends(Some("b")));
        assert!(!ended(Some("a")).ends(Some("b")));
        assert!(ended(None).ends(Some("b")));
        assert!(ended(Some("a")).ends(None));

        let rssi = ScanEvent::Rssi {
            id: "11:22:33:44:55:66".to_string(),
            rssi: -60,
            at: Utc::now(),
        };
        assert!(!rssi.ends(Some("b")));
    }

    #[test]
    fn test_end_marker_without_session() {
        let event: ScanEvent = serde_json::from_str(r#"{"type":"ended"}"#).unwrap();
        assert!(matches!(event, ScanEvent::Ended { session: None }));
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_string(&Request::Connect {
            id: "11:22:33:44:55:66".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"Connect","id":"11:22:33:44:55:66"}"#);
    }
}
