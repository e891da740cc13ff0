// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust scale gateway library
//!
//! Reads weight frames from serial scales and writes the values to a
//! Mitsubishi PLC over MC protocol 3E.

pub mod acquisition;
pub mod config;
pub mod daemon;
pub mod error;
pub mod plc;
pub mod registry;
pub mod supervisor;
pub mod utility;

pub use error::{GatewayError, Result};
