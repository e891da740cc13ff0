// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use rust_scale_gateway::config::Config;
use std::fs;
use std::path::Path;
use std::sync::Once;
use tempfile::tempdir;

static INIT: Once = Once::new();

// Setup logger for tests
fn setup() {
    INIT.call_once(|| {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

fn assert_sample_created(config_path: &Path) -> Result<()> {
    let sample_path = config_path.with_extension("sample.yaml");
    assert!(
        Path::new(&sample_path).exists(),
        "Sample config file was not created"
    );

    // The sample file must itself be a valid configuration
    let sample_config = Config::from_file(&sample_path)?;
    assert_eq!(sample_config.plc.port, 5014);
    assert_eq!(sample_config.ports.len(), 3);
    Ok(())
}

#[test]
fn test_schema_type_error_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    let invalid_yaml = r#"
plc:
  address: 12345          # String field with number value
  port: "not-an-integer"  # Integer field with string value
gateway:
  peak_hold: "true"       # Boolean field with string value
"#;
    fs::write(&config_path, invalid_yaml)?;

    let result = Config::from_file(&config_path);
    assert!(result.is_err(), "Config loading should have failed");
    assert_sample_created(&config_path)
}

#[test]
fn test_out_of_range_value_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    let invalid_config = r#"
plc:
  address: 192.168.3.61
  port: 99999             # Port out of range
"#;
    fs::write(&config_path, invalid_config)?;

    assert!(Config::from_file(&config_path).is_err());
    assert_sample_created(&config_path)
}

#[test]
fn test_unknown_field_is_rejected() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    fs::write(
        &config_path,
        r#"
plc:
  address: 192.168.3.61
  port: 5014
  tcp_keepalive: true
"#,
    )?;

    assert!(Config::from_file(&config_path).is_err());
    Ok(())
}

#[test]
fn test_semantic_error_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Schema valid, but both ports claim the same head device
    let conflicting = r#"
ports:
  - port_path: /dev/ttyUSB0
    head_devices: [D6364]
  - port_path: /dev/ttyUSB1
    head_devices: [D6364]
"#;
    fs::write(&config_path, conflicting)?;

    let err = Config::from_file(&config_path).unwrap_err();
    assert!(err.to_string().contains("D6364"), "{}", err);
    assert_sample_created(&config_path)
}

#[test]
fn test_bad_device_address_is_rejected() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    fs::write(
        &config_path,
        r#"
ports:
  - port_path: /dev/ttyUSB0
    head_devices:
      - address: D6364
        signal_bit: D3300   # Signal must be a bit device
"#,
    )?;

    assert!(Config::from_file(&config_path).is_err());
    Ok(())
}
