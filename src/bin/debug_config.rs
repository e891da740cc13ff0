// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Load a configuration and print how its port mapping resolves
use anyhow::Result;
use rust_scale_gateway::config::Config;
use rust_scale_gateway::registry::PortRegistry;
use std::path::PathBuf;

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"));

    println!("Testing file: {:?}", path);
    println!("File exists: {}", path.exists());

    let mut config = match Config::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            println!("Validation failed: {:#}", e);
            return Ok(());
        }
    };
    config.apply_env(|name| std::env::var(name).ok())?;

    println!(
        "PLC {}:{} ({:?}, {:?})",
        config.plc.address, config.plc.port, config.plc.model, config.write_policy.mode
    );
    let registry = PortRegistry::from_config(&config.ports)?;
    for binding in registry.bindings() {
        for head in &binding.head_devices {
            println!(
                "{} [{}] kind={} -> {} signal={}",
                binding.port_path,
                binding.ftdi_id.as_deref().unwrap_or("-"),
                head.data_kind.as_deref().unwrap_or("*"),
                head.address,
                head.signal_bit
                    .map(|bit| bit.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }

    Ok(())
}
