use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: String,
    pub bluetooth: BluetoothConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub tool_path: String,
    pub auto_power_on: bool,
    pub connect_after_pair: bool,
    pub pair_settle_ms: u64,
    pub command_timeout_secs: u64,
    pub event_buffer: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/run/bluesmith/bluesmith.sock".to_string(),
            bluetooth: BluetoothConfig::default(),
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            tool_path: "bluetoothctl".to_string(),
            auto_power_on: true,
            connect_after_pair: true,
            pair_settle_ms: 1000,
            command_timeout_secs: 30,
            event_buffer: 64,
        }
    }
}

impl BluetoothConfig {
    pub fn pair_settle(&self) -> Duration {
        Duration::from_millis(self.pair_settle_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

impl DaemonConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(_) => {
                // Create default config if not found
                let config = Self::default();
                if let Err(e) = fs::write(path, toml::to_string_pretty(&config)?) {
                    tracing::debug!("Not writing default config to {}: {}", path.display(), e);
                }
                Ok(config)
            }
        }
    }
}
