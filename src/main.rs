// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point of the scale to PLC gateway
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

use rust_scale_gateway::config::{self, Config, WriteMode};
use rust_scale_gateway::daemon::Daemon;
use rust_scale_gateway::GatewayError;

/// Serial scale to Mitsubishi PLC gateway
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// PLC address, overrides the configuration and PLC_IP
    #[arg(long)]
    plc_address: Option<String>,

    /// PLC MC protocol port, overrides the configuration and PLC_PORT
    #[arg(long)]
    plc_port: Option<u16>,

    /// Write policy
    #[arg(long, value_enum)]
    write_policy: Option<WriteMode>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(err) => {
            error!("{:#}", err);
            err.downcast_ref::<GatewayError>()
                .map(GatewayError::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<()> {
    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }

        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let mut config = Config::from_file(&args.config)?;
    config.apply_env(|name| std::env::var(name).ok())?;
    config.apply_args(args.plc_address, args.plc_port, args.write_policy);
    config
        .validate()
        .context("Configuration is invalid after applying overrides")?;

    info!(
        "Scale gateway {} starting, PLC {}:{} ({:?})",
        env!("CARGO_PKG_VERSION"),
        config.plc.address,
        config.plc.port,
        config.write_policy.mode
    );

    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;

    wait_for_signal().await?;
    info!("Received shutdown signal");

    daemon.shutdown();
    let report = daemon.join().await?;
    info!(
        "Gateway stopped: {} reading(s) written, {} failed, {} abandoned",
        report.written, report.failed, report.abandoned
    );
    Ok(())
}

/// Wait for SIGINT or SIGTERM
#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}
