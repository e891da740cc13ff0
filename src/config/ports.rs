// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Port mapping configuration
//!
//! Each entry of the `ports` section binds a serial device to the PLC head
//! devices its readings are written to. A head device is either a bare
//! address or a map:
//!
//! ```yaml
//! ports:
//!   - port_path: /dev/ttyUSB0
//!     head_devices: [D6364]
//!   - port_path: /dev/ttyUSB1
//!     ftdi_id: A10KQ3PZ
//!     head_devices:
//!       - address: D6464
//!         data_kind: GS
//!         signal_bit: M3400
//!       - address: D6466
//!         data_kind: NT
//! ```

use log::warn;
use serde::{Deserialize, Serialize};

/// A head device entry of a port binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HeadDeviceRepr")]
pub struct HeadDeviceConfig {
    /// Word device receiving the weight as a double word
    pub address: String,

    /// Data-kind code of the frames routed here; `None` accepts every frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,

    /// Bit device raised after each weight write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_bit: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HeadDeviceRepr {
    Short(String),
    Full {
        address: String,
        #[serde(default)]
        data_kind: Option<String>,
        #[serde(default)]
        signal_bit: Option<String>,
    },
}

impl From<HeadDeviceRepr> for HeadDeviceConfig {
    fn from(repr: HeadDeviceRepr) -> Self {
        match repr {
            HeadDeviceRepr::Short(address) => Self::new(address),
            HeadDeviceRepr::Full {
                address,
                data_kind,
                signal_bit,
            } => Self {
                address,
                data_kind,
                signal_bit,
            },
        }
    }
}

impl HeadDeviceConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            data_kind: None,
            signal_bit: None,
        }
    }

    pub fn with_signal_bit(mut self, bit: impl Into<String>) -> Self {
        self.signal_bit = Some(bit.into());
        self
    }

    pub fn with_data_kind(mut self, kind: impl Into<String>) -> Self {
        self.data_kind = Some(kind.into());
        self
    }
}

/// Binding of one serial device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Device node, e.g. `/dev/ttyUSB0`
    pub port_path: String,

    /// Serial number of the FTDI adapter, used by the health supervisor to
    /// find the device under `/dev/serial/by-id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftdi_id: Option<String>,

    /// Overrides `serial.baud_rate` for this port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,

    pub head_devices: Vec<HeadDeviceConfig>,
}

/// The three scale stations of a standard installation
pub fn default_ports() -> Vec<PortConfig> {
    [
        ("/dev/ttyUSB0", "D6364", "M3300"),
        ("/dev/ttyUSB1", "D6464", "M3400"),
        ("/dev/ttyUSB2", "D6564", "M3500"),
    ]
    .into_iter()
    .map(|(path, head, bit)| PortConfig {
        port_path: path.to_string(),
        ftdi_id: None,
        baud_rate: None,
        head_devices: vec![HeadDeviceConfig::new(head).with_signal_bit(bit)],
    })
    .collect()
}

/// Parse the `SERIAL_PORTS` environment format `port:head[,bit];port:head[,bit]`
///
/// Malformed entries are skipped with a warning. A leading `/` in front of the
/// head device is tolerated.
pub fn parse_serial_ports_env(value: &str) -> Vec<PortConfig> {
    let mut ports = Vec::new();
    for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((port, devices)) = entry.split_once(':') else {
            warn!("Skipping invalid SERIAL_PORTS entry: {}", entry);
            continue;
        };
        let mut parts = devices.split(',').map(str::trim);
        let head = parts.next().unwrap_or_default().trim_start_matches('/');
        let bit = parts.next().filter(|b| !b.is_empty());
        if port.trim().is_empty() || head.is_empty() || parts.next().is_some() {
            warn!("Skipping invalid SERIAL_PORTS entry: {}", entry);
            continue;
        }

        let mut head_device = HeadDeviceConfig::new(head);
        if let Some(bit) = bit {
            head_device = head_device.with_signal_bit(bit);
        }
        ports.push(PortConfig {
            port_path: port.trim().to_string(),
            ftdi_id: None,
            baud_rate: None,
            head_devices: vec![head_device],
        });
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_device_short_and_full_forms() {
        let yaml = r#"
- port_path: /dev/ttyUSB0
  head_devices: [D6364]
- port_path: /dev/ttyUSB1
  head_devices:
    - address: D6464
      data_kind: GS
      signal_bit: M3400
"#;
        let ports: Vec<PortConfig> = serde_yml::from_str(yaml).unwrap();
        assert_eq!(ports[0].head_devices[0], HeadDeviceConfig::new("D6364"));
        assert_eq!(
            ports[1].head_devices[0],
            HeadDeviceConfig::new("D6464")
                .with_data_kind("GS")
                .with_signal_bit("M3400")
        );
    }

    #[test]
    fn test_parse_serial_ports_env() {
        let ports = parse_serial_ports_env("/dev/ttyUSB0:/D6364,M3300; /dev/ttyUSB1:D6464 ;bogus;");
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].port_path, "/dev/ttyUSB0");
        assert_eq!(ports[0].head_devices[0].address, "D6364");
        assert_eq!(ports[0].head_devices[0].signal_bit.as_deref(), Some("M3300"));
        assert_eq!(ports[1].head_devices[0].signal_bit, None);
    }
}
