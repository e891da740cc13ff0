// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC access over the MC protocol
//!
//! The gateway talks to the PLC through two small traits so that the real TCP
//! client and the in-memory mock are interchangeable:
//!
//! - [`PlcConnector`] opens sessions and is kept for the lifetime of the writer
//! - [`PlcTransport`] is one live session; it is dropped and re-opened by the
//!   [`PlcWriter`] whenever an I/O failure breaks it

use async_trait::async_trait;

use crate::config::{PlcConfig, PlcTransportKind};
use crate::error::Result;

pub mod client;
pub mod device;
pub mod frame;
pub mod mock;
pub mod writer;

pub use client::{McClient, McConnector};
pub use device::{DeviceAddress, DeviceKind, DeviceType};
pub use frame::PlcModel;
pub use mock::{MockPlc, MockStats};
pub use writer::{PlcWriter, RetrySettings, WritePolicy};

/// One live PLC session
#[async_trait]
pub trait PlcTransport: Send {
    /// Batch read of `count` word devices starting at `address`
    async fn read_words(&mut self, address: &DeviceAddress, count: usize) -> Result<Vec<u16>>;

    /// Batch write of word devices starting at `address`
    async fn write_words(&mut self, address: &DeviceAddress, values: &[u16]) -> Result<()>;

    /// Batch read of `count` bit devices starting at `address`
    async fn read_bits(&mut self, address: &DeviceAddress, count: usize) -> Result<Vec<bool>>;

    /// Batch write of bit devices starting at `address`
    async fn write_bits(&mut self, address: &DeviceAddress, values: &[bool]) -> Result<()>;
}

/// Factory of PLC sessions
#[async_trait]
pub trait PlcConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PlcTransport>>;

    /// Human readable peer description used in log lines
    fn describe(&self) -> String;
}

/// Build the connector selected by `plc.transport`
pub fn connector_from_config(config: &PlcConfig) -> Box<dyn PlcConnector> {
    match config.transport {
        PlcTransportKind::Tcp => Box::new(McConnector::from_config(config)),
        PlcTransportKind::Mock => Box::new(MockPlc::new()),
    }
}
