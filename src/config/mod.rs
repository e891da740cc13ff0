// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the scale gateway
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema before semantic checks are applied.
//!
//! ## Configuration Structure
//!
//! - `plc`: where the PLC is and how to connect to it
//! - `serial`: line parameters and framing of the scale ports
//! - `ports`: mapping of serial devices to PLC head devices
//! - `write_policy`: fast path or validated writes with retries
//! - `gateway`: filtering, scaling and shutdown behaviour of the loop
//! - `supervisor`: settings of the `health_supervisor` binary
//!
//! ## Usage
//!
//! ```no_run
//! use rust_scale_gateway::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Environment then command line overrides
//! config.apply_env(|name| std::env::var(name).ok()).unwrap();
//! config.apply_args(Some("10.0.0.5".to_string()), Some(5007), None);
//!
//! println!("PLC: {}:{}", config.plc.address, config.plc.port);
//! ```

pub mod gateway;
pub mod plc;
pub mod ports;
pub mod serial;
pub mod supervisor;
pub mod utils;
pub mod write_policy;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

pub use gateway::GatewayConfig;
pub use plc::{PlcConfig, PlcTransportKind};
pub use ports::{default_ports, parse_serial_ports_env, HeadDeviceConfig, PortConfig};
pub use serial::{ChecksumKind, SerialConfig, SerialParity};
pub use supervisor::SupervisorConfig;
pub use utils::{is_valid_ip_address, output_config_schema};
pub use write_policy::{WriteMode, WritePolicyConfig};

/// Root configuration structure of the gateway.
///
/// Every section falls back to its defaults when omitted, so a file holding
/// only a `ports` list is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub plc: PlcConfig,

    #[serde(default)]
    pub serial: SerialConfig,

    /// Serial device to head device mapping, loaded once at startup
    #[serde(default = "default_ports")]
    pub ports: Vec<PortConfig>,

    #[serde(default)]
    pub write_policy: WritePolicyConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plc: PlcConfig::default(),
            serial: SerialConfig::default(),
            ports: default_ports(),
            write_policy: WritePolicyConfig::default(),
            gateway: GatewayConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is replaced by the default configuration, which is also
    /// written to `path`. An invalid file leaves a `<name>.sample.yaml` next to
    /// it and returns an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;

        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        let schema_str = include_str!("../../resources/config.schema.json");
        let schema: serde_json::Value =
            serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = config.validate() {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Semantic checks the schema cannot express
    pub fn validate(&self) -> Result<()> {
        utils::validate_specific_rules(self)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply the deployment environment variables.
    ///
    /// `PLC_IP` and `PLC_PORT` override the PLC endpoint; `SERIAL_PORTS`
    /// (`port:head[,bit];...`) replaces the whole port mapping when it holds
    /// at least one valid entry. `lookup` wraps `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("PLC_IP").filter(|v| !v.trim().is_empty()) {
            debug!("Overriding PLC address from environment: {}", address);
            self.plc.address = address.trim().to_string();
        }

        if let Some(port) = lookup("PLC_PORT").filter(|v| !v.trim().is_empty()) {
            let port: u16 = port
                .trim()
                .parse()
                .with_context(|| format!("PLC_PORT is not a valid port number: {}", port))?;
            debug!("Overriding PLC port from environment: {}", port);
            self.plc.port = port;
        }

        if let Some(mapping) = lookup("SERIAL_PORTS") {
            let ports = parse_serial_ports_env(&mapping);
            if ports.is_empty() {
                anyhow::bail!("SERIAL_PORTS holds no valid entry: {:?}", mapping);
            }
            debug!("Overriding port mapping from environment ({} ports)", ports.len());
            self.ports = ports;
        }

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only explicitly provided values override the loaded configuration.
    pub fn apply_args(
        &mut self,
        plc_address: Option<String>,
        plc_port: Option<u16>,
        write_mode: Option<WriteMode>,
    ) {
        if let Some(address) = plc_address {
            debug!("Overriding PLC address from command line: {}", address);
            self.plc.address = address;
        }
        if let Some(port) = plc_port {
            debug!("Overriding PLC port from command line: {}", port);
            self.plc.port = port;
        }
        if let Some(mode) = write_mode {
            debug!("Overriding write policy from command line: {:?}", mode);
            self.write_policy.mode = mode;
        }
    }
}
