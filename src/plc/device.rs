// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC device addressing
//!
//! A device address is a device-type prefix followed by a number, for example
//! `D6364` (data register 6364) or `M3300` (internal relay 3300). Input, output,
//! link relay and link register devices (`X`, `Y`, `B`, `W`, `SB`, `SW`) are
//! numbered in hexadecimal, everything else in decimal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Access width of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Bit,
    Word,
}

/// Device types supported by the MC protocol client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Special relay
    SM,
    /// Special register
    SD,
    /// Input
    X,
    /// Output
    Y,
    /// Internal relay
    M,
    /// Latch relay
    L,
    /// Annunciator
    F,
    /// Edge relay
    V,
    /// Link relay
    B,
    /// Step relay
    S,
    /// Data register
    D,
    /// Link register
    W,
    /// Link special relay
    SB,
    /// Link special register
    SW,
    /// Timer current value
    TN,
    /// Counter current value
    CN,
    /// File register (block switching)
    R,
    /// File register (serial numbering)
    ZR,
    /// Index register
    Z,
}

impl DeviceType {
    /// All device types, longest prefixes first so that `SM` wins over `S`
    const ALL: [DeviceType; 19] = [
        DeviceType::SM,
        DeviceType::SD,
        DeviceType::SB,
        DeviceType::SW,
        DeviceType::TN,
        DeviceType::CN,
        DeviceType::ZR,
        DeviceType::X,
        DeviceType::Y,
        DeviceType::M,
        DeviceType::L,
        DeviceType::F,
        DeviceType::V,
        DeviceType::B,
        DeviceType::S,
        DeviceType::D,
        DeviceType::W,
        DeviceType::R,
        DeviceType::Z,
    ];

    /// Textual prefix of the device
    pub fn prefix(&self) -> &'static str {
        match self {
            DeviceType::SM => "SM",
            DeviceType::SD => "SD",
            DeviceType::X => "X",
            DeviceType::Y => "Y",
            DeviceType::M => "M",
            DeviceType::L => "L",
            DeviceType::F => "F",
            DeviceType::V => "V",
            DeviceType::B => "B",
            DeviceType::S => "S",
            DeviceType::D => "D",
            DeviceType::W => "W",
            DeviceType::SB => "SB",
            DeviceType::SW => "SW",
            DeviceType::TN => "TN",
            DeviceType::CN => "CN",
            DeviceType::R => "R",
            DeviceType::ZR => "ZR",
            DeviceType::Z => "Z",
        }
    }

    /// Binary device code used in 3E frames
    pub fn code(&self) -> u8 {
        match self {
            DeviceType::SM => 0x91,
            DeviceType::SD => 0xA9,
            DeviceType::X => 0x9C,
            DeviceType::Y => 0x9D,
            DeviceType::M => 0x90,
            DeviceType::L => 0x92,
            DeviceType::F => 0x93,
            DeviceType::V => 0x94,
            DeviceType::B => 0xA0,
            DeviceType::S => 0x98,
            DeviceType::D => 0xA8,
            DeviceType::W => 0xB4,
            DeviceType::SB => 0xA1,
            DeviceType::SW => 0xB5,
            DeviceType::TN => 0xC2,
            DeviceType::CN => 0xC5,
            DeviceType::R => 0xAF,
            DeviceType::ZR => 0xB0,
            DeviceType::Z => 0xCC,
        }
    }

    /// Reverse lookup of [`DeviceType::code`]
    pub fn from_code(code: u8) -> Option<DeviceType> {
        DeviceType::ALL.iter().copied().find(|d| d.code() == code)
    }

    /// Whether the device is addressed bit-wise or word-wise
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceType::SM
            | DeviceType::X
            | DeviceType::Y
            | DeviceType::M
            | DeviceType::L
            | DeviceType::F
            | DeviceType::V
            | DeviceType::B
            | DeviceType::S
            | DeviceType::SB => DeviceKind::Bit,
            _ => DeviceKind::Word,
        }
    }

    /// Whether device numbers are written in hexadecimal
    pub fn is_hex_numbered(&self) -> bool {
        matches!(
            self,
            DeviceType::X | DeviceType::Y | DeviceType::B | DeviceType::W | DeviceType::SB | DeviceType::SW
        )
    }
}

/// A single PLC device address such as `D6364`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub device: DeviceType,
    pub number: u32,
}

impl DeviceAddress {
    pub fn new(device: DeviceType, number: u32) -> Self {
        Self { device, number }
    }

    pub fn kind(&self) -> DeviceKind {
        self.device.kind()
    }

    /// Address `count` devices further along, e.g. `D6364 + 1 = D6365`
    pub fn offset(&self, count: u32) -> Self {
        Self {
            device: self.device,
            number: self.number + count,
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device.is_hex_numbered() {
            write!(f, "{}{:X}", self.device.prefix(), self.number)
        } else {
            write!(f, "{}{}", self.device.prefix(), self.number)
        }
    }
}

impl FromStr for DeviceAddress {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_uppercase();
        let device = DeviceType::ALL
            .iter()
            .copied()
            .find(|d| {
                text.starts_with(d.prefix())
                    && text[d.prefix().len()..]
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_ascii_hexdigit())
            })
            .ok_or_else(|| GatewayError::config(format!("Unknown PLC device '{}'", s)))?;

        let digits = &text[device.prefix().len()..];
        let radix = if device.is_hex_numbered() { 16 } else { 10 };
        let number = u32::from_str_radix(digits, radix).map_err(|_| {
            GatewayError::config(format!("Invalid device number in '{}'", s))
        })?;

        // 3E frames carry 3-byte device numbers for Q/L series CPUs
        if number > 0x00FF_FFFF {
            return Err(GatewayError::config(format!(
                "Device number out of range in '{}'",
                s
            )));
        }

        Ok(Self { device, number })
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_register() {
        let addr: DeviceAddress = "D6364".parse().unwrap();
        assert_eq!(addr.device, DeviceType::D);
        assert_eq!(addr.number, 6364);
        assert_eq!(addr.kind(), DeviceKind::Word);
        assert_eq!(addr.offset(1).to_string(), "D6365");
    }

    #[test]
    fn test_parse_bit_devices() {
        let m: DeviceAddress = "m3300".parse().unwrap();
        assert_eq!(m.device, DeviceType::M);
        assert_eq!(m.kind(), DeviceKind::Bit);

        let sm: DeviceAddress = "SM400".parse().unwrap();
        assert_eq!(sm.device, DeviceType::SM);
    }

    #[test]
    fn test_hex_numbered_devices() {
        let x: DeviceAddress = "X1F".parse().unwrap();
        assert_eq!(x.number, 0x1F);
        assert_eq!(x.to_string(), "X1F");

        let w: DeviceAddress = "W10".parse().unwrap();
        assert_eq!(w.number, 0x10);
    }

    #[test]
    fn test_code_lookup() {
        assert_eq!(DeviceType::D.code(), 0xA8);
        assert_eq!(DeviceType::M.code(), 0x90);
        assert_eq!(DeviceType::from_code(0xA8), Some(DeviceType::D));
        assert_eq!(DeviceType::from_code(0x00), None);
    }

    #[test]
    fn test_reject_malformed() {
        assert!("".parse::<DeviceAddress>().is_err());
        assert!("Q100".parse::<DeviceAddress>().is_err());
        assert!("D".parse::<DeviceAddress>().is_err());
        assert!("D12G".parse::<DeviceAddress>().is_err());
        assert!("D99999999".parse::<DeviceAddress>().is_err());
    }
}
