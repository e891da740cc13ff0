// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Weight frame parser
//!
//! Scales stream frames shaped like
//!
//! ```text
//! HH[,KK],±NNNNNN.N UU[CC]
//! ST,+000012.50  g
//! US,GS,-   0.35 kg
//! ```
//!
//! where `HH` is the stability header (`ST` stable, `US` unstable, `OL`
//! overload), `KK` an optional data-kind code selecting the head device, then
//! the signed value and its unit. With `checksum: xor` the frame ends with two
//! upper-case hex characters holding the XOR of every preceding byte.

use std::sync::Arc;

use chrono::Utc;

use super::{RawFrame, Reading};
use crate::config::{ChecksumKind, SerialConfig};
use crate::error::{GatewayError, Result};
use crate::registry::PortBinding;

/// Turns raw frames of one port into readings
#[derive(Debug, Clone)]
pub struct FrameParser {
    binding: Arc<PortBinding>,
    expected_length: Option<usize>,
    checksum: ChecksumKind,
}

/// XOR of all bytes
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

impl FrameParser {
    pub fn new(binding: Arc<PortBinding>, config: &SerialConfig) -> Self {
        Self {
            binding,
            expected_length: config.expected_length,
            checksum: config.checksum,
        }
    }

    fn reject(&self, reason: impl Into<String>) -> GatewayError {
        GatewayError::FrameParse {
            port: self.binding.port_path.clone(),
            reason: reason.into(),
        }
    }

    /// Parse one frame; every rejected frame is a [`GatewayError::FrameParse`]
    pub fn parse(&self, frame: &RawFrame) -> Result<Reading> {
        let bytes = frame.bytes.as_slice();
        if !bytes.is_ascii() {
            return Err(self.reject("non-ASCII frame"));
        }
        if let Some(expected) = self.expected_length {
            if bytes.len() != expected {
                return Err(self.reject(format!(
                    "length {} instead of {}",
                    bytes.len(),
                    expected
                )));
            }
        }

        let body = match self.checksum {
            ChecksumKind::None => bytes,
            ChecksumKind::Xor => self.verify_xor(bytes)?,
        };
        // ASCII was checked above
        let text = std::str::from_utf8(body)
            .map_err(|_| self.reject("non-ASCII frame"))?
            .trim();

        let fields: Vec<&str> = text.split(',').map(str::trim).collect();
        let (header, data_kind, value_field) = match fields.as_slice() {
            [header, value] => (*header, None, *value),
            [header, kind, value] => (*header, Some(*kind), *value),
            _ => return Err(self.reject(format!("unexpected field count in {:?}", text))),
        };

        let valid = match header {
            "ST" => true,
            "US" => false,
            "OL" => return Err(self.reject("scale overload")),
            other => return Err(self.reject(format!("unknown header {:?}", other))),
        };

        let value = self.parse_value(value_field)?;
        let head = self.binding.head_for(data_kind).ok_or_else(|| {
            self.reject(format!("no head device for data kind {:?}", data_kind))
        })?;

        Ok(Reading {
            source_port: self.binding.port_path.clone(),
            head_device: head.address,
            value,
            timestamp: Utc::now(),
            valid,
        })
    }

    fn verify_xor<'a>(&self, bytes: &'a [u8]) -> Result<&'a [u8]> {
        if bytes.len() < 3 {
            return Err(self.reject("frame too short to carry a checksum"));
        }
        let (body, tail) = bytes.split_at(bytes.len() - 2);
        let received = std::str::from_utf8(tail)
            .ok()
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .ok_or_else(|| self.reject("checksum is not hexadecimal"))?;
        let computed = xor_checksum(body);
        if received != computed {
            return Err(self.reject(format!(
                "checksum {:02X} does not match computed {:02X}",
                received, computed
            )));
        }
        Ok(body)
    }

    /// `±NNNNNN.N UU`, blanks tolerated between sign and digits
    fn parse_value(&self, field: &str) -> Result<f64> {
        let (negative, rest) = match field.as_bytes().first() {
            Some(b'+') => (false, &field[1..]),
            Some(b'-') => (true, &field[1..]),
            _ => (false, field),
        };
        let rest = rest.trim_start();
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..end];
        if !number.bytes().any(|b| b.is_ascii_digit()) {
            return Err(self.reject(format!("no numeric value in {:?}", field)));
        }
        let magnitude: f64 = number
            .parse()
            .map_err(|_| self.reject(format!("invalid number {:?}", number)))?;
        Ok(if negative { -magnitude } else { magnitude })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeadDeviceConfig, PortConfig};
    use crate::registry::PortRegistry;
    use approx::assert_relative_eq;

    fn parser(heads: Vec<HeadDeviceConfig>, serial: SerialConfig) -> FrameParser {
        let registry = PortRegistry::from_config(&[PortConfig {
            port_path: "/dev/ttyUSB0".to_string(),
            ftdi_id: None,
            baud_rate: None,
            head_devices: heads,
        }])
        .unwrap();
        let binding = registry.binding("/dev/ttyUSB0").unwrap().clone();
        FrameParser::new(binding, &serial)
    }

    fn simple() -> FrameParser {
        parser(vec![HeadDeviceConfig::new("D6364")], SerialConfig::default())
    }

    #[test]
    fn test_stable_frame() {
        let reading = simple().parse(&RawFrame::new(b"ST,+000012.50  g".to_vec())).unwrap();
        assert_relative_eq!(reading.value, 12.5);
        assert!(reading.valid);
        assert_eq!(reading.head_device.to_string(), "D6364");
        assert_eq!(reading.source_port, "/dev/ttyUSB0");
    }

    #[test]
    fn test_unstable_and_negative() {
        let reading = simple().parse(&RawFrame::new(b"US,-   0.35 kg".to_vec())).unwrap();
        assert_relative_eq!(reading.value, -0.35);
        assert!(!reading.valid);
    }

    #[test]
    fn test_rejected_frames() {
        let parser = simple();
        for frame in [
            &b"OL,+999999.9  g"[..],
            b"XX,+000012.50  g",
            b"ST,  g",
            b"garbage",
            b"ST,+\xB012.5 g",
        ] {
            assert!(
                matches!(
                    parser.parse(&RawFrame::new(frame.to_vec())),
                    Err(GatewayError::FrameParse { .. })
                ),
                "{:?}",
                frame
            );
        }
    }

    #[test]
    fn test_expected_length() {
        let serial = SerialConfig {
            expected_length: Some(16),
            ..Default::default()
        };
        let parser = parser(vec![HeadDeviceConfig::new("D100")], serial);
        assert!(parser.parse(&RawFrame::new(b"ST,+000012.50  g".to_vec())).is_ok());
        assert!(parser.parse(&RawFrame::new(b"ST,+00012.50  g".to_vec())).is_err());
    }

    #[test]
    fn test_xor_checksum() {
        let serial = SerialConfig {
            checksum: ChecksumKind::Xor,
            ..Default::default()
        };
        let parser = parser(vec![HeadDeviceConfig::new("D100")], serial);
        let body = b"ST,+000012.50  g";
        let mut frame = body.to_vec();
        frame.extend_from_slice(format!("{:02X}", xor_checksum(body)).as_bytes());
        assert!(parser.parse(&RawFrame::new(frame.clone())).is_ok());

        let last = frame.len() - 1;
        frame[last] = if frame[last] == b'0' { b'1' } else { b'0' };
        assert!(parser.parse(&RawFrame::new(frame)).is_err());
    }

    #[test]
    fn test_data_kind_routing() {
        let parser = parser(
            vec![
                HeadDeviceConfig::new("D100").with_data_kind("GS"),
                HeadDeviceConfig::new("D102").with_data_kind("NT"),
            ],
            SerialConfig::default(),
        );
        let net = parser.parse(&RawFrame::new(b"ST,NT,+000010.00  g".to_vec())).unwrap();
        assert_eq!(net.head_device.to_string(), "D102");
        assert!(parser.parse(&RawFrame::new(b"ST,TR,+000010.00  g".to_vec())).is_err());
        assert!(parser.parse(&RawFrame::new(b"ST,+000010.00  g".to_vec())).is_err());
    }
}
