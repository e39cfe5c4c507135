/*!
 * Bluetooth Device Management
 * Device pairing, connection and discovery by driving bluetoothctl
 */

pub mod device;
pub mod error;
pub mod events;
pub mod parser;
pub mod registry;
pub mod scanner;
pub mod tool;

#[cfg(test)]
pub mod mock;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::BluetoothConfig;

pub use device::Device;
pub use error::{BluetoothError, ErrorKind, Result};
pub use events::{event_channel, EventReceiver, EventSender};
pub use scanner::{ScanStatus, Scanner, StopOutcome};
pub use tool::{Bluetoothctl, ControlTool};

use device::validate_device_id;

/// Uniform result of every manager operation. Callers branch on `success`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<Device>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanStatus>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(context: &str, err: &BluetoothError) -> Self {
        Self {
            success: false,
            error: Some(format!("{}: {}", context, err)),
            kind: Some(err.kind()),
            ..Self::default()
        }
    }

    pub fn with_devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone)]
struct ManagerSettings {
    auto_power_on: bool,
    connect_after_pair: bool,
    pair_settle: Duration,
    event_buffer: usize,
}

impl From<&BluetoothConfig> for ManagerSettings {
    fn from(config: &BluetoothConfig) -> Self {
        Self {
            auto_power_on: config.auto_power_on,
            connect_after_pair: config.connect_after_pair,
            pair_settle: config.pair_settle(),
            event_buffer: config.event_buffer,
        }
    }
}

pub struct BluetoothManager {
    tool: Arc<dyn ControlTool>,
    scanner: Scanner,
    settings: ManagerSettings,
}

impl BluetoothManager {
    pub fn new(config: &BluetoothConfig) -> Self {
        let tool = Bluetoothctl::new(&config.tool_path, config.command_timeout());
        Self::with_tool(Arc::new(tool), config)
    }

    pub fn with_tool(tool: Arc<dyn ControlTool>, config: &BluetoothConfig) -> Self {
        Self {
            scanner: Scanner::new(tool.clone()),
            tool,
            settings: config.into(),
        }
    }

    /// Capacity to use for scan event channels handed to [`Self::start_scan`].
    pub fn event_buffer(&self) -> usize {
        self.settings.event_buffer
    }

    pub async fn status(&self) -> Reply {
        let result = if self.settings.auto_power_on {
            ensure_powered(self.tool.as_ref()).await
        } else {
            adapter_powered(self.tool.as_ref()).await
        };

        match result {
            Ok(powered) => Reply {
                powered: Some(powered),
                ..Reply::ok()
            },
            Err(e) => {
                tracing::warn!("Bluetooth status check failed: {}", e);
                Reply::failed("Failed to check Bluetooth status", &e)
            }
        }
    }

    /// Every device the daemon has a record of. Powers the adapter on first
    /// when `auto_power_on` is set.
    pub async fn list_known(&self) -> Reply {
        let listing = async {
            if self.settings.auto_power_on {
                ensure_powered(self.tool.as_ref()).await?;
            }
            Ok::<_, BluetoothError>(self.query_devices(&["devices"]).await?)
        }
        .await;

        match listing {
            Ok(mut devices) => {
                let paired = self.annotation(&["devices", "Paired"]).await;
                let connected = self.annotation(&["devices", "Connected"]).await;
                registry::annotate(&mut devices, paired.as_deref(), connected.as_deref());
                Reply::ok().with_devices(devices)
            }
            Err(e) => {
                tracing::warn!("Listing known devices failed: {}", e);
                Reply::failed("Failed to fetch devices", &e).with_devices(Vec::new())
            }
        }
    }

    pub async fn list_paired(&self) -> Reply {
        match self.query_devices(&["devices", "Paired"]).await {
            Ok(mut devices) => {
                devices.iter_mut().for_each(|d| d.paired = true);
                let connected = self.annotation(&["devices", "Connected"]).await;
                registry::annotate(&mut devices, None, connected.as_deref());
                Reply::ok().with_devices(devices)
            }
            Err(e) => {
                tracing::warn!("Listing paired devices failed: {}", e);
                Reply::failed("Failed to fetch paired devices", &e).with_devices(Vec::new())
            }
        }
    }

    pub async fn list_attached(&self) -> Reply {
        match self.query_devices(&["devices", "Connected"]).await {
            Ok(mut devices) => {
                devices.iter_mut().for_each(|d| d.connected = true);
                let paired = self.annotation(&["devices", "Paired"]).await;
                registry::annotate(&mut devices, paired.as_deref(), None);
                Reply::ok().with_devices(devices)
            }
            Err(e) => {
                tracing::warn!("Listing attached devices failed: {}", e);
                Reply::failed("Failed to fetch attached devices", &e).with_devices(Vec::new())
            }
        }
    }

    /// Pairs and trusts a device. Does not connect.
    pub async fn pair(&self, id: &str) -> Reply {
        let result = async {
            let id = validate_device_id(id)?;
            tracing::info!("Pairing with device: {}", id);
            self.tool.run(&["pair", id.as_str()]).await?;
            // bluetoothctl returns before bluez has settled the bond
            tokio::time::sleep(self.settings.pair_settle).await;
            self.tool.run(&["trust", id.as_str()]).await?;
            Ok::<_, BluetoothError>(())
        }
        .await;

        self.reply("Failed to pair device", result)
    }

    /// Pairs, then connects when configured to. A failed connect is only
    /// logged; the reply describes the pairing.
    pub async fn pair_and_connect(&self, id: &str) -> Reply {
        let reply = self.pair(id).await;
        if !reply.success || !self.settings.connect_after_pair {
            return reply;
        }

        let connected = self.connect(id).await;
        if connected.success {
            reply.with_message("Paired and connected")
        } else {
            tracing::warn!(
                "Paired {} but the follow-up connect failed: {}",
                id,
                connected.error.as_deref().unwrap_or("unknown error")
            );
            reply.with_message("Paired")
        }
    }

    pub async fn connect(&self, id: &str) -> Reply {
        self.device_command("Failed to connect device", id, &["connect"])
            .await
    }

    pub async fn remove(&self, id: &str) -> Reply {
        self.device_command("Failed to remove device", id, &["remove"])
            .await
    }

    pub async fn unpair(&self, id: &str) -> Reply {
        self.device_command("Failed to unpair device", id, &["untrust", "remove"])
            .await
    }

    pub async fn start_scan(&self, events: EventSender) -> Reply {
        match self.scanner.start(events).await {
            Ok(session) => Reply {
                session: Some(session),
                ..Reply::ok()
            },
            Err(e) => {
                tracing::warn!("Bluetooth start scan error: {}", e);
                Reply::failed("Failed to start scan", &e)
            }
        }
    }

    pub async fn stop_scan(&self) -> Reply {
        match self.scanner.stop().await {
            StopOutcome::Stopped => Reply::ok(),
            StopOutcome::NotScanning => Reply::ok().with_message("No scan in progress"),
        }
    }

    /// Stops `session` if it is still running; used when its listener leaves.
    pub async fn release_scan(&self, session: Uuid) -> Reply {
        match self.scanner.stop_session(session).await {
            StopOutcome::Stopped => Reply::ok(),
            StopOutcome::NotScanning => Reply::ok().with_message("Scan already ended"),
        }
    }

    /// Current session, if any, plus everything the latest session found.
    pub async fn scan_status(&self) -> Reply {
        Reply {
            scan: self.scanner.status().await,
            ..Reply::ok()
        }
        .with_devices(self.scanner.discovered().await)
    }

    async fn query_devices(&self, args: &[&str]) -> Result<Vec<Device>> {
        let output = self.tool.run(args).await?;
        Ok(parser::parse_device_list(&output))
    }

    async fn annotation(&self, args: &[&str]) -> Option<Vec<Device>> {
        match self.query_devices(args).await {
            Ok(devices) => Some(devices),
            Err(e) => {
                tracing::warn!("`{}` failed, flags left unset: {}", args.join(" "), e);
                None
            }
        }
    }

    async fn device_command(&self, context: &str, id: &str, steps: &[&str]) -> Reply {
        let result = async {
            let id = validate_device_id(id)?;
            for step in steps {
                tracing::info!("Running {} for device: {}", step, id);
                self.tool.run(&[*step, id.as_str()]).await?;
            }
            Ok::<_, BluetoothError>(())
        }
        .await;

        self.reply(context, result)
    }

    fn reply(&self, context: &str, result: Result<()>) -> Reply {
        match result {
            Ok(()) => Reply::ok(),
            Err(e) => {
                tracing::warn!("{}: {}", context, e);
                Reply::failed(context, &e)
            }
        }
    }
}

pub(crate) async fn adapter_powered(tool: &dyn ControlTool) -> Result<bool> {
    Ok(tool.run(&["show"]).await?.contains("Powered: yes"))
}

/// Powers the adapter on if it is off. Returns whether it was already on.
pub(crate) async fn ensure_powered(tool: &dyn ControlTool) -> Result<bool> {
    let powered = adapter_powered(tool).await?;
    if !powered {
        tracing::info!("Bluetooth adapter is off, powering on");
        tool.run(&["power", "on"]).await?;
    }
    Ok(powered)
}
