// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Port registry
//!
//! Immutable lookup table from serial port to PLC head devices, built once
//! from the `ports` configuration section. Building it is where a malformed
//! or conflicting mapping is caught, before any reader or writer starts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;

use crate::acquisition::Reading;
use crate::config::PortConfig;
use crate::error::{GatewayError, Result};
use crate::plc::{DeviceAddress, DeviceKind};

/// Destination of the readings of one data kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadDevice {
    /// Low word of the double word receiving the value
    pub address: DeviceAddress,
    /// Upper-case data-kind code, `None` for the catch-all head device
    pub data_kind: Option<String>,
    pub signal_bit: Option<DeviceAddress>,
}

/// A serial port and the head devices its readings go to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub port_path: String,
    pub ftdi_id: Option<String>,
    pub baud_rate: Option<u32>,
    pub head_devices: Vec<HeadDevice>,
}

impl PortBinding {
    /// Head device receiving frames tagged with `data_kind`.
    ///
    /// An exact data-kind match wins, otherwise the catch-all head device (if
    /// any) takes the frame.
    pub fn head_for(&self, data_kind: Option<&str>) -> Option<&HeadDevice> {
        data_kind
            .and_then(|kind| {
                self.head_devices
                    .iter()
                    .find(|h| h.data_kind.as_deref().is_some_and(|k| k.eq_ignore_ascii_case(kind)))
            })
            .or_else(|| self.head_devices.iter().find(|h| h.data_kind.is_none()))
    }
}

/// Lookup table of all port bindings
#[derive(Debug, Clone, Default)]
pub struct PortRegistry {
    bindings: Vec<Arc<PortBinding>>,
    by_port: HashMap<String, usize>,
}

fn parse_device(port: &str, text: &str, expected: DeviceKind, role: &str) -> Result<DeviceAddress> {
    let address: DeviceAddress = text.parse().map_err(|e| {
        GatewayError::config(format!("port {}: invalid {} '{}': {}", port, role, text, e))
    })?;
    if address.kind() != expected {
        return Err(GatewayError::config(format!(
            "port {}: {} {} must be a {} device",
            port,
            role,
            address,
            match expected {
                DeviceKind::Word => "word",
                DeviceKind::Bit => "bit",
            }
        )));
    }
    Ok(address)
}

impl PortRegistry {
    /// Build and validate the registry
    pub fn from_config(ports: &[PortConfig]) -> Result<Self> {
        let mut registry = PortRegistry::default();
        // Every head device occupies two consecutive words
        let mut words: HashMap<DeviceAddress, String> = HashMap::new();
        let mut signal_bits: HashMap<DeviceAddress, String> = HashMap::new();
        let mut ftdi_ids: HashMap<String, String> = HashMap::new();

        for port in ports {
            let path = port.port_path.trim();
            if path.is_empty() {
                return Err(GatewayError::config("port binding with an empty port_path"));
            }
            if registry.by_port.contains_key(path) {
                return Err(GatewayError::config(format!("port {} is bound twice", path)));
            }
            if port.head_devices.is_empty() {
                return Err(GatewayError::config(format!(
                    "port {} has no head device",
                    path
                )));
            }
            if let Some(id) = port.ftdi_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
                if let Some(other) = ftdi_ids.insert(id.to_string(), path.to_string()) {
                    return Err(GatewayError::config(format!(
                        "FTDI id {} is used by both {} and {}",
                        id, other, path
                    )));
                }
            }

            let mut kinds = HashSet::new();
            let mut catch_all = false;
            let mut head_devices = Vec::with_capacity(port.head_devices.len());
            for entry in &port.head_devices {
                let address = parse_device(path, &entry.address, DeviceKind::Word, "head device")?;
                for word in [address, address.offset(1)] {
                    if let Some(owner) = words.insert(word, path.to_string()) {
                        return Err(GatewayError::config(format!(
                            "head device {} of port {} overlaps a head device of port {}",
                            address, path, owner
                        )));
                    }
                }

                let data_kind = entry
                    .data_kind
                    .as_deref()
                    .map(|k| k.trim().to_ascii_uppercase())
                    .filter(|k| !k.is_empty());
                match &data_kind {
                    Some(kind) => {
                        if !kinds.insert(kind.clone()) {
                            return Err(GatewayError::config(format!(
                                "port {}: data kind {} is routed twice",
                                path, kind
                            )));
                        }
                    }
                    None => {
                        if catch_all {
                            return Err(GatewayError::config(format!(
                                "port {}: more than one head device without data_kind",
                                path
                            )));
                        }
                        catch_all = true;
                    }
                }

                let signal_bit = match entry.signal_bit.as_deref() {
                    Some(bit) => {
                        let bit = parse_device(path, bit, DeviceKind::Bit, "signal bit")?;
                        if let Some(owner) = signal_bits.insert(bit, path.to_string()) {
                            return Err(GatewayError::config(format!(
                                "signal bit {} is used by both {} and {}",
                                bit, owner, path
                            )));
                        }
                        Some(bit)
                    }
                    None => None,
                };

                head_devices.push(HeadDevice {
                    address,
                    data_kind,
                    signal_bit,
                });
            }

            debug!(
                "Registered port {} -> {}",
                path,
                head_devices
                    .iter()
                    .map(|h| h.address.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            registry
                .by_port
                .insert(path.to_string(), registry.bindings.len());
            registry.bindings.push(Arc::new(PortBinding {
                port_path: path.to_string(),
                ftdi_id: port.ftdi_id.clone(),
                baud_rate: port.baud_rate,
                head_devices,
            }));
        }

        Ok(registry)
    }

    /// Head devices bound to `port`
    pub fn resolve(&self, port: &str) -> Option<&[HeadDevice]> {
        self.binding(port).map(|b| b.head_devices.as_slice())
    }

    pub fn binding(&self, port: &str) -> Option<&Arc<PortBinding>> {
        self.by_port.get(port).map(|&index| &self.bindings[index])
    }

    /// Head device entry a reading is destined for.
    ///
    /// `None` when the reading names a port or head device the registry
    /// does not know.
    pub fn route(&self, reading: &Reading) -> Option<&HeadDevice> {
        self.resolve(&reading.source_port)?
            .iter()
            .find(|h| h.address == reading.head_device)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Arc<PortBinding>> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
