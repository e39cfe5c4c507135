/*!
 * Bluetooth Error Types
 * Everything the control tool layer can fail with
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BluetoothError>;

#[derive(Debug, Error)]
pub enum BluetoothError {
    #[error("Invalid device ID")]
    InvalidDeviceId(String),

    #[error("Scan already in progress")]
    AlreadyScanning,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {duration:?}")]
    Timeout { command: String, duration: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification carried next to the human-readable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    Spawn,
    Daemon,
    Timeout,
    Io,
}

impl BluetoothError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDeviceId(_) => ErrorKind::Validation,
            Self::AlreadyScanning => ErrorKind::Conflict,
            Self::Spawn { .. } => ErrorKind::Spawn,
            Self::CommandFailed { .. } => ErrorKind::Daemon,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}
