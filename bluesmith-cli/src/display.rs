/*!
 * Plain-text Output
 * Rows for devices, scan events and daemon replies
 */

use crate::client::{Device, Reply, ScanEvent};

pub fn device_row(device: &Device) -> String {
    let mut flags = Vec::new();
    if device.paired {
        flags.push("paired");
    }
    if device.connected {
        flags.push("connected");
    }

    let mut row = format!("{}  {}", device.id, device.name);
    if !flags.is_empty() {
        row.push_str(&format!("  [{}]", flags.join(", ")));
    }
    if let Some(rssi) = device.rssi {
        row.push_str(&format!("  {} dBm", rssi));
    }
    row
}

pub fn event_line(event: &ScanEvent) -> String {
    match event {
        ScanEvent::Discovered { device, at } => {
            let label = if device.discovered_as_new { "NEW " } else { "SEEN" };
            format!("{}  {} {}", at.format("%H:%M:%S"), label, device_row(device))
        }
        ScanEvent::Rssi { id, rssi, at } => {
            format!("{}  RSSI {}  {} dBm", at.format("%H:%M:%S"), id, rssi)
        }
        ScanEvent::Ended { .. } => "Scan ended".to_string(),
    }
}

/// Lines to print for a reply; failures render as a single error line.
pub fn reply_lines(reply: &Reply) -> Vec<String> {
    if !reply.success {
        return vec![format!(
            "Error: {}",
            reply.error.as_deref().unwrap_or("request failed")
        )];
    }

    let mut lines = Vec::new();
    if let Some(powered) = reply.powered {
        lines.push(format!("Adapter: {}", if powered { "powered" } else { "off" }));
    }
    if let Some(scan) = &reply.scan {
        lines.push(format!(
            "Scanning since {} ({} found, session {})",
            scan.started_at.format("%H:%M:%S"),
            scan.discovered,
            scan.session
        ));
    }
    if let Some(devices) = &reply.devices {
        if devices.is_empty() {
            lines.push("No devices".to_string());
        }
        lines.extend(devices.iter().map(device_row));
    }
    if let Some(message) = &reply.message {
        lines.push(message.clone());
    }
    if lines.is_empty() {
        lines.push("OK".to_string());
    }
    lines
}
