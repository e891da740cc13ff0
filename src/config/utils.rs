// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::{debug, warn};

use super::{Config, WriteMode};
use crate::registry::PortRegistry;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./rust_scale_gateway --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema_str = include_str!("../../resources/config.schema.json");

    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **PLC endpoint**: non-zero port, warning on a non-IP address (host names
///   are accepted)
/// - **Serial framing**: supported data and stop bits, a non-empty terminator,
///   an expected length that fits in `max_frame_length`
/// - **Backoff curves**: initial delays not above their maximum
/// - **Gateway**: non-zero scale and channel capacity, non-negative minimum weight
/// - **Port mapping**: every rule of [`PortRegistry::from_config`]
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.plc.port == 0 {
        anyhow::bail!("Invalid PLC port number: {}", config.plc.port);
    }
    if config.plc.address.trim().is_empty() {
        anyhow::bail!("PLC address is empty");
    }
    if !is_valid_ip_address(&config.plc.address) {
        warn!(
            "PLC address {} is not an IP address, it will be resolved by name",
            config.plc.address
        );
    }

    let serial = &config.serial;
    if !(5..=8).contains(&serial.data_bits) {
        anyhow::bail!("Unsupported serial data bits: {}", serial.data_bits);
    }
    if !(1..=2).contains(&serial.stop_bits) {
        anyhow::bail!("Unsupported serial stop bits: {}", serial.stop_bits);
    }
    if serial.terminator.is_empty() {
        anyhow::bail!("Serial frame terminator is empty");
    }
    if serial.max_frame_length == 0 {
        anyhow::bail!("serial.max_frame_length must be positive");
    }
    if let Some(expected) = serial.expected_length {
        if expected == 0 || expected > serial.max_frame_length {
            anyhow::bail!(
                "serial.expected_length {} must be within 1..={}",
                expected,
                serial.max_frame_length
            );
        }
    }
    if serial.reconnect_initial_ms > serial.reconnect_max_ms {
        anyhow::bail!(
            "serial.reconnect_initial_ms ({}) exceeds reconnect_max_ms ({})",
            serial.reconnect_initial_ms,
            serial.reconnect_max_ms
        );
    }

    let policy = &config.write_policy;
    if policy.mode == WriteMode::RetryValidated {
        if policy.max_attempts == 0 {
            anyhow::bail!("write_policy.max_attempts must be at least 1");
        }
        if policy.backoff_multiplier < 1.0 {
            anyhow::bail!(
                "write_policy.backoff_multiplier must be >= 1.0, got {}",
                policy.backoff_multiplier
            );
        }
        if policy.initial_backoff_ms > policy.max_backoff_ms {
            anyhow::bail!(
                "write_policy.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                policy.initial_backoff_ms,
                policy.max_backoff_ms
            );
        }
    }

    let gateway = &config.gateway;
    if gateway.scale == 0 {
        anyhow::bail!("gateway.scale must be positive");
    }
    if gateway.channel_capacity == 0 {
        anyhow::bail!("gateway.channel_capacity must be positive");
    }
    if !(gateway.min_weight >= 0.0) {
        anyhow::bail!("gateway.min_weight must be >= 0, got {}", gateway.min_weight);
    }

    PortRegistry::from_config(&config.ports)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_ip_address() {
        assert!(is_valid_ip_address("192.168.3.61"));
        assert!(is_valid_ip_address("localhost"));
        assert!(is_valid_ip_address("::1"));
        assert!(!is_valid_ip_address("plc.local"));
    }

    #[test]
    fn test_default_config_is_valid() {
        validate_specific_rules(&Config::default()).unwrap();
    }

    #[test]
    fn test_rejects_bad_backoff() {
        let mut config = Config::default();
        config.write_policy.initial_backoff_ms = 5000;
        assert!(validate_specific_rules(&config).is_err());

        // Irrelevant for the fast path
        config.write_policy.mode = WriteMode::FastPath;
        assert!(validate_specific_rules(&config).is_ok());
    }

    #[test]
    fn test_rejects_bad_serial_framing() {
        let mut config = Config::default();
        config.serial.expected_length = Some(1024);
        assert!(validate_specific_rules(&config).is_err());

        let mut config = Config::default();
        config.serial.terminator.clear();
        assert!(validate_specific_rules(&config).is_err());
    }
}
