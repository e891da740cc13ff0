// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Aggregation loop configuration

use serde::{Deserialize, Serialize};

/// Configuration of the `gateway` section.
///
/// Controls which readings reach the PLC, how they are scaled and how the
/// daemon behaves on shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Fixed-point multiplier: the PLC receives `round(weight * scale)`
    #[serde(default = "default_scale")]
    pub scale: u32,

    /// Readings lighter than this are ignored
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,

    /// Forward unstable (`US`) readings as well as stable ones
    #[serde(default)]
    pub accept_unstable: bool,

    /// Only write a reading heavier than the last value written to the same
    /// head device
    #[serde(default)]
    pub peak_hold: bool,

    /// Seconds without an accepted reading before a head device is zeroed
    /// and its signal bit cleared; 0 disables the reset
    #[serde(default = "default_idle_reset_secs")]
    pub idle_reset_secs: u64,

    /// Capacity of the reading channel between the readers and the loop
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Time granted to pending writes once shutdown is requested
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Interval of the liveness log line; 0 disables it
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_scale() -> u32 {
    100
}

fn default_min_weight() -> f64 {
    1.0
}

fn default_idle_reset_secs() -> u64 {
    15
}

fn default_channel_capacity() -> usize {
    64
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_heartbeat_secs() -> u64 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            min_weight: default_min_weight(),
            accept_unstable: false,
            peak_hold: false,
            idle_reset_secs: default_idle_reset_secs(),
            channel_capacity: default_channel_capacity(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}
