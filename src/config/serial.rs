// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial line configuration
//!
//! Line parameters shared by every scale port, and the framing rules applied
//! to the byte stream before parsing.

use serde::{Deserialize, Serialize};

/// Parity setting of the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    None,
    Odd,
    #[default]
    Even,
}

/// Frame integrity check appended by the scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    #[default]
    None,
    /// Two upper-case hex characters holding the XOR of all preceding bytes
    Xor,
}

/// Configuration of the serial scale lines.
///
/// The defaults match the scales installed on the line: 19200 baud,
/// 7 data bits, even parity, 1 stop bit, CR LF terminated frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// 5 to 8
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default)]
    pub parity: SerialParity,

    /// 1 or 2
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Read timeout in milliseconds; also bounds how long a reader takes to
    /// notice shutdown
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// First reopen delay after a failure, doubled up to `reconnect_max_ms`
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Frame terminator, CR LF by default
    #[serde(default = "default_terminator")]
    pub terminator: String,

    /// Exact frame length (terminator excluded); frames of another length
    /// are dropped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_length: Option<usize>,

    #[serde(default)]
    pub checksum: ChecksumKind,

    /// Bytes accumulated without a terminator before the buffer is discarded
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

fn default_baud_rate() -> u32 {
    19200
}

fn default_data_bits() -> u8 {
    7
}

fn default_stop_bits() -> u8 {
    1
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    10_000
}

fn default_terminator() -> String {
    "\r\n".to_string()
}

fn default_max_frame_length() -> usize {
    256
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: SerialParity::default(),
            stop_bits: default_stop_bits(),
            read_timeout_ms: default_read_timeout_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            terminator: default_terminator(),
            expected_length: None,
            checksum: ChecksumKind::default(),
            max_frame_length: default_max_frame_length(),
        }
    }
}
