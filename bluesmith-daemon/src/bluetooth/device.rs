/*!
 * Device Records
 * Address canonicalisation, id validation and placeholder-name detection
 */

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::error::{BluetoothError, Result};

pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{2}([:-][0-9A-Fa-f]{2}){5}$").expect("valid regex"));

static MAC_SHAPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9A-Fa-f]{2}[:-]?){6}$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub paired: bool,
    pub connected: bool,
    pub rssi: Option<i16>,
    /// Only set on devices surfaced by an active scan.
    #[serde(rename = "new", default, skip_serializing_if = "std::ops::Not::not")]
    pub discovered_as_new: bool,
}

impl Device {
    pub fn new(id: &str, name: &str) -> Self {
        let name = name.trim();
        Self {
            id: canonical_address(id),
            name: if name.is_empty() {
                UNKNOWN_DEVICE_NAME.to_string()
            } else {
                name.to_string()
            },
            paired: false,
            connected: false,
            rssi: None,
            discovered_as_new: false,
        }
    }

    pub fn discovered(id: &str, name: &str) -> Self {
        Self {
            discovered_as_new: true,
            ..Self::new(id, name)
        }
    }

    pub fn same_address(&self, other: &str) -> bool {
        self.id.eq_ignore_ascii_case(other)
    }
}

/// Upper-case, colon-separated form of a hardware address.
pub fn canonical_address(address: &str) -> String {
    address.trim().replace('-', ":").to_ascii_uppercase()
}

/// Checks a caller-supplied id before it is handed to the control tool.
pub fn validate_device_id(id: &str) -> Result<String> {
    let trimmed = id.trim();
    if trimmed.is_empty() || !ADDRESS.is_match(trimmed) {
        return Err(BluetoothError::InvalidDeviceId(id.to_string()));
    }
    Ok(canonical_address(trimmed))
}

/// True when `name` carries no information beyond the address itself.
pub fn is_mac_synthetic(address: &str, name: &str) -> bool {
    let strip = |s: &str| -> String {
        s.chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase()
    };

    if strip(address) == strip(name) {
        return true;
    }

    let compact: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    MAC_SHAPED.is_match(&compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_equal_to_address_is_synthetic() {
        assert!(is_mac_synthetic("11:22:33:44:55:66", "11-22-33-44-55-66"));
        assert!(is_mac_synthetic("AA:BB:CC:DD:EE:FF", "aabbccddeeff"));
        assert!(is_mac_synthetic("AA:BB:CC:DD:EE:FF", "aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_other_mac_shaped_names_are_synthetic() {
        assert!(is_mac_synthetic("AA:BB:CC:DD:EE:FF", "12:34:56:78:9A:BC"));
        assert!(is_mac_synthetic("AA:BB:CC:DD:EE:FF", "12 34 56 78 9a bc"));
    }

    #[test]
    fn test_real_names_are_kept() {
        assert!(!is_mac_synthetic("11:22:33:44:55:66", "Kitchen Speaker"));
        assert!(!is_mac_synthetic("11:22:33:44:55:66", "WH-1000XM4"));
        assert!(!is_mac_synthetic("11:22:33:44:55:66", "AA:BB"));
    }

    #[test]
    fn test_validate_device_id() {
        assert_eq!(
            validate_device_id("aa:bb:cc:dd:ee:ff").unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(
            validate_device_id(" AA-BB-CC-DD-EE-FF ").unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("   ").is_err());
        assert!(validate_device_id("--help").is_err());
        assert!(validate_device_id("AA:BB:CC:DD:EE").is_err());
        assert!(validate_device_id("AA:BB:CC:DD:EE:FF; rm -rf /").is_err());
    }

    #[test]
    fn test_blank_name_uses_placeholder() {
        let device = Device::new("aa:bb:cc:dd:ee:ff", "   ");
        assert_eq!(device.id, "AA:BB:CC:DD:EE:FF");
        assert_eq!(device.name, UNKNOWN_DEVICE_NAME);
        assert!(!device.discovered_as_new);
    }

    #[test]
    fn test_new_flag_serialization() {
        let known = serde_json::to_value(Device::new("11:22:33:44:55:66", "Mouse")).unwrap();
        assert!(known.get("new").is_none());

        let found = serde_json::to_value(Device::discovered("11:22:33:44:55:66", "Mouse")).unwrap();
        assert_eq!(found["new"], true);
        assert_eq!(found["rssi"], serde_json::Value::Null);
    }
}
