// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC connection configuration
//!
//! This module defines the `plc` section: where the PLC lives, which CPU family
//! it belongs to and how the gateway connects to it.

use serde::{Deserialize, Serialize};

use crate::plc::PlcModel;

/// Transport used to reach the PLC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlcTransportKind {
    /// MC protocol 3E binary frames over TCP
    #[default]
    Tcp,
    /// In-memory PLC, for dry runs without hardware
    Mock,
}

/// Configuration for the PLC connection.
///
/// # Example
///
/// ```
/// use rust_scale_gateway::config::PlcConfig;
///
/// let plc = PlcConfig {
///     address: "10.0.0.5".to_string(),
///     port: 5007,
///     ..Default::default()
/// };
/// assert_eq!(plc.connect_retries, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// IP address or host name of the PLC Ethernet module
    pub address: String,

    /// TCP port opened for MC protocol binary communication on the PLC
    pub port: u16,

    /// CPU family, selects the device specification layout of the frames
    #[serde(default)]
    pub model: PlcModel,

    #[serde(default)]
    pub transport: PlcTransportKind,

    /// Timeout of a single connection attempt in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout of a request/response exchange in milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Connection attempts made at startup before giving up
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Delay between startup connection attempts in milliseconds
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_io_timeout_ms() -> u64 {
    2000
}

fn default_connect_retries() -> u32 {
    5
}

fn default_connect_retry_delay_ms() -> u64 {
    2000
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            address: "192.168.3.61".to_string(),
            port: 5014,
            model: PlcModel::Q,
            transport: PlcTransportKind::Tcp,
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            connect_retries: default_connect_retries(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
        }
    }
}
