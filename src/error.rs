// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error taxonomy of the gateway
//!
//! Only [`GatewayError::Config`] is fatal once the daemon is running; every
//! other variant is contained by the component that owns it and surfaces as a
//! log event.

use thiserror::Error;

/// Errors raised by the gateway components
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Serial device {port} I/O error: {source}")]
    DeviceIo {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Frame from {port} rejected: {reason}")]
    FrameParse { port: String, reason: String },

    #[error("PLC connection error: {reason}")]
    PlcConnection { reason: String },

    #[error("PLC returned end code 0x{end_code:04X} for command 0x{command:04X}")]
    PlcProtocol { command: u16, end_code: u16 },

    #[error("Malformed PLC response: {reason}")]
    PlcResponse { reason: String },

    #[error(
        "Write to {head_device} not confirmed after {attempts} attempt(s) (sent {expected}, read back {actual:?})"
    )]
    PlcWriteValidation {
        head_device: String,
        attempts: u32,
        expected: i64,
        actual: Option<i64>,
    },

    #[error("Value {value} cannot be encoded with scale {scale}")]
    ValueOutOfRange { value: f64, scale: u32 },

    #[error("Shutdown grace period of {grace_ms} ms elapsed, {abandoned} write(s) abandoned")]
    ShutdownTimeout { grace_ms: u64, abandoned: usize },
}

impl GatewayError {
    /// Shorthand for configuration failures
    pub fn config(reason: impl Into<String>) -> Self {
        GatewayError::Config {
            reason: reason.into(),
        }
    }

    /// Shorthand for connection level failures
    pub fn connection(reason: impl Into<String>) -> Self {
        GatewayError::PlcConnection {
            reason: reason.into(),
        }
    }

    /// Whether the PLC session must be torn down after this error.
    ///
    /// Protocol end codes and validation mismatches leave the session usable;
    /// transport failures and unparsable responses do not.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            GatewayError::PlcConnection { .. } | GatewayError::PlcResponse { .. }
        )
    }

    /// Process exit code used when this error ends the program
    pub fn exit_code(&self) -> i32 {
        match self {
            GatewayError::Config { .. } => 1,
            GatewayError::PlcConnection { .. }
            | GatewayError::PlcProtocol { .. }
            | GatewayError::PlcResponse { .. } => 2,
            GatewayError::ShutdownTimeout { .. } => 0,
            _ => 3,
        }
    }
}

/// Result alias used across the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(GatewayError::config("bad").exit_code(), 1);
        assert_eq!(GatewayError::connection("refused").exit_code(), 2);
        let timeout = GatewayError::ShutdownTimeout {
            grace_ms: 100,
            abandoned: 2,
        };
        assert_eq!(timeout.exit_code(), 0);
    }

    #[test]
    fn test_breaks_connection() {
        assert!(GatewayError::connection("reset").breaks_connection());
        assert!(!GatewayError::PlcProtocol {
            command: 0x1401,
            end_code: 0xC051
        }
        .breaks_connection());
    }
}
