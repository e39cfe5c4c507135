/*!
 * Scan Events
 * Delivered over a bounded channel in the order the session printed them;
 * the stream ends when the sender is dropped (session stopped or tool exited)
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::device::Device;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    /// A device with a real advertised name showed up.
    Discovered { device: Device, at: DateTime<Utc> },
    /// Signal strength for an address; merge it into what you already hold.
    Rssi {
        id: String,
        rssi: i16,
        at: DateTime<Utc>,
    },
}

impl ScanEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::Discovered { device, .. } => &device.id,
            Self::Rssi { id, .. } => id,
        }
    }
}

pub type EventSender = mpsc::Sender<ScanEvent>;
pub type EventReceiver = mpsc::Receiver<ScanEvent>;

pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}
