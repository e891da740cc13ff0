// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Module
//!
//! Runs the gateway: one blocking reader per serial port, the aggregation
//! loop owning the PLC connection, and a heartbeat.
//!
//! ## Components
//!
//! * **Launch Daemon**: starts the tasks, signals shutdown and waits for them
//! * **Aggregation**: routes readings to the PLC writer and drains on shutdown
//!
//! ## Usage
//!
//! ```no_run
//! use rust_scale_gateway::{config::Config, daemon::Daemon};
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     daemon.shutdown();
//!     let report = daemon.join().await?;
//!     println!("{} readings written", report.written);
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod launch_daemon;

pub use aggregation::{AggregationLoop, LoopReport, LoopSettings, LoopState};
pub use launch_daemon::Daemon;
