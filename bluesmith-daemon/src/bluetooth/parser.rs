/*!
 * bluetoothctl Output Parsing
 * Line reassembly for the interactive session and classification of its chatter
 */

use regex::Regex;
use std::sync::LazyLock;

use super::device::{canonical_address, is_mac_synthetic, Device};

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|[\x01\x02]").expect("valid regex"));

static NEW_DEVICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[NEW\] Device ([0-9A-F]{2}(?::[0-9A-F]{2}){5}) (.+)").expect("valid regex")
});

static RSSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Device ([0-9A-F]{2}(?::[0-9A-F]{2}){5}) RSSI: (0x[0-9A-F]+|-?\d+)")
        .expect("valid regex")
});

static LISTED_DEVICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Device ([0-9A-F]{2}(?::[0-9A-F]{2}){5})(?: (.*))?$").expect("valid regex")
});

/// What a single line of session output means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Discovered(Device),
    /// A discovery whose name was only the address re-encoded.
    Suppressed { id: String },
    Rssi { id: String, rssi: i16 },
}

/// Carry-over buffer between output chunks.
///
/// Splitting happens on raw bytes, so a character cut in half by a chunk
/// boundary is only decoded once the rest of it has arrived.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let mut complete = std::mem::replace(&mut self.pending, rest);
        complete.pop();

        complete.split(|b| *b == b'\n').map(decode_line).collect()
    }

    /// Drains whatever unterminated fragment is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    line.trim_end_matches('\r').to_string()
}

/// Removes terminal colouring and readline markers from a line.
pub fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").into_owned()
}

/// Classifies one complete line of interactive session output.
pub fn classify_line(line: &str) -> Option<LineEvent> {
    let line = strip_ansi(line);
    let line = line.trim_matches('\r');

    if line.contains("[NEW] Device") {
        let caps = NEW_DEVICE.captures(line)?;
        let id = &caps[1];
        let name = caps[2].trim();

        if is_mac_synthetic(id, name) {
            return Some(LineEvent::Suppressed {
                id: canonical_address(id),
            });
        }
        return Some(LineEvent::Discovered(Device::discovered(id, name)));
    }

    if line.contains("RSSI:") {
        let caps = RSSI.captures(line)?;
        let rssi = parse_rssi(&caps[2])?;
        return Some(LineEvent::Rssi {
            id: canonical_address(&caps[1]),
            rssi,
        });
    }

    None
}

/// Decodes an RSSI token into non-positive dBm.
///
/// Hex tokens are the raw signed value as bluetoothctl prints it, so they are
/// read as two's complement at the width their digit count implies.
pub fn parse_rssi(raw: &str) -> Option<i16> {
    let value: i64 = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => {
            let significant = hex.trim_start_matches('0');
            if significant.len() > 8 {
                return None;
            }
            let unsigned = if significant.is_empty() {
                0
            } else {
                u32::from_str_radix(significant, 16).ok()?
            };
            match hex.len() {
                1..=2 => i64::from(unsigned as u8 as i8),
                3..=4 => i64::from(unsigned as u16 as i16),
                _ => i64::from(unsigned as i32),
            }
        }
        None => raw.parse().ok()?,
    };

    let dbm = if value >= 0 { -value } else { value };
    i16::try_from(dbm).ok()
}

/// Parses the output of a one-shot `devices` listing.
pub fn parse_device_list(output: &str) -> Vec<Device> {
    let mut devices: Vec<Device> = Vec::new();

    for line in output.lines() {
        let line = strip_ansi(line);
        let line = line.trim();
        if !line.starts_with("Device ") {
            continue;
        }
        let Some(caps) = LISTED_DEVICE.captures(line) else {
            continue;
        };

        let id = &caps[1];
        let name = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        if is_mac_synthetic(id, name) {
            continue;
        }
        if devices.iter().any(|d| d.same_address(id)) {
            continue;
        }
        devices.push(Device::new(id, name));
    }

    devices
}
