// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Host-side watchdog for the scale gateway container
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use rust_scale_gateway::config::Config;
use rust_scale_gateway::supervisor::{DockerCli, Supervisor};

/// Restarts the gateway container and rebinds USB scales when they vanish
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway configuration file, read for the `ports` and `supervisor` sections
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run a single supervision round and exit
    #[arg(long)]
    once: bool,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
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

    let mut config = Config::from_file(&args.config)?;
    config.apply_env(|name| std::env::var(name).ok())?;

    let runtime = DockerCli::new(&config.supervisor);
    let mut supervisor = Supervisor::new(&config.supervisor, config.ports.clone(), Box::new(runtime));

    if args.once {
        let verdict = supervisor.check_once().await?;
        println!("{:?}", verdict);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(cancel.clone()));
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received shutdown signal");
    cancel.cancel();
    task.await.context("Supervisor task panicked")?;
    Ok(())
}
