// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Scale data acquisition
//!
//! This module turns the byte stream of a serial scale into [`Reading`]s:
//!
//! - [`framer`] splits the stream on the configured terminator
//! - [`parser`] validates a frame and extracts the weight
//! - [`serial_reader`] owns the device handle and reconnects on failure
//! - [`replay`] feeds recorded byte streams instead of a device, for tests
//!   and bench runs

use chrono::{DateTime, Utc};

use crate::plc::DeviceAddress;

pub mod framer;
pub mod parser;
pub mod replay;
pub mod serial_reader;

pub use framer::FrameSplitter;
pub use parser::FrameParser;
pub use replay::ReplayOpener;
pub use serial_reader::{run_reader, PortOpener, SerialPortOpener, SerialReader};

/// Terminator-delimited frame, terminator excluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
}

impl RawFrame {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

/// A parsed weight measurement, consumed once by the aggregation loop
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Port path the frame was read from
    pub source_port: String,
    /// Head device the value is destined for
    pub head_device: DeviceAddress,
    /// Weight in the unit sent by the scale
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// `true` for a stable frame
    pub valid: bool,
}
