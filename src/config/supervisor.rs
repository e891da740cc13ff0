// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Health supervisor configuration
//!
//! Read by the `health_supervisor` binary only; the gateway daemon ignores it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Name of the container running the gateway
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Docker CLI used for inspect and restart
    #[serde(default = "default_docker_command")]
    pub docker_command: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Minimum time between two recovery actions
    #[serde(default = "default_restart_cooldown_secs")]
    pub restart_cooldown_secs: u64,

    /// sysfs driver directory holding the `bind` and `unbind` files
    #[serde(default = "default_usb_driver_path")]
    pub usb_driver_path: String,

    /// USB bus ids (e.g. `1-1.2`) rebound when a scale disappears
    #[serde(default)]
    pub usb_bus_ids: Vec<String>,

    /// Directory of the stable serial device links
    #[serde(default = "default_serial_by_id_dir")]
    pub serial_by_id_dir: String,

    /// Pause between unbind and bind, in milliseconds
    #[serde(default = "default_rebind_delay_ms")]
    pub rebind_delay_ms: u64,
}

fn default_container_name() -> String {
    "scale-gateway".to_string()
}

fn default_docker_command() -> String {
    "docker".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_restart_cooldown_secs() -> u64 {
    120
}

fn default_usb_driver_path() -> String {
    "/sys/bus/usb/drivers/usb".to_string()
}

fn default_serial_by_id_dir() -> String {
    "/dev/serial/by-id".to_string()
}

fn default_rebind_delay_ms() -> u64 {
    1000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            container_name: default_container_name(),
            docker_command: default_docker_command(),
            poll_interval_secs: default_poll_interval_secs(),
            restart_cooldown_secs: default_restart_cooldown_secs(),
            usb_driver_path: default_usb_driver_path(),
            usb_bus_ids: Vec::new(),
            serial_by_id_dir: default_serial_by_id_dir(),
            rebind_delay_ms: default_rebind_delay_ms(),
        }
    }
}
