// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Write policy configuration

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Write strategy of the PLC writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum WriteMode {
    /// Single write, no read-back
    FastPath,
    /// Write, settle, read back and compare, retry on mismatch
    #[default]
    RetryValidated,
}

/// Configuration of the `write_policy` section.
///
/// Only `mode` matters for `fast_path`; the other fields drive
/// `retry_validated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritePolicyConfig {
    #[serde(default)]
    pub mode: WriteMode,

    /// Total attempts, the first write included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between a write and its read-back, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_settle_delay_ms() -> u64 {
    350
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    2000
}

impl Default for WritePolicyConfig {
    fn default() -> Self {
        Self {
            mode: WriteMode::default(),
            max_attempts: default_max_attempts(),
            settle_delay_ms: default_settle_delay_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}
