// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Fixed-point encoding of weights for PLC word registers
//!
//! The PLC program stores a weight as a signed 32-bit integer spread over two
//! consecutive data registers: the low word at the head device and the high
//! word at the next address. A scale of 100 means two implied decimals, so
//! `12.5` is stored as `1250`.

use crate::error::{GatewayError, Result};

/// Convert a weight to its raw fixed-point representation.
///
/// The value is rounded to the nearest integer step so that decimal inputs
/// such as `0.29` do not lose a step to binary floating point error.
pub fn to_fixed_point(value: f64, scale: u32) -> Result<i32> {
    let scaled = (value * scale as f64).round();
    if !scaled.is_finite() || scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(GatewayError::ValueOutOfRange { value, scale });
    }
    Ok(scaled as i32)
}

/// Convert a raw fixed-point integer back to a weight
pub fn from_fixed_point(raw: i32, scale: u32) -> f64 {
    raw as f64 / scale.max(1) as f64
}

/// Split a signed double word into `[low_word, high_word]`
pub fn split_dword(raw: i32) -> [u16; 2] {
    let bits = raw as u32;
    [(bits & 0xFFFF) as u16, (bits >> 16) as u16]
}

/// Rebuild a signed double word from `[low_word, high_word]`
pub fn join_dword(low: u16, high: u16) -> i32 {
    (((high as u32) << 16) | low as u32) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_fixed_point_rounds() {
        assert_eq!(to_fixed_point(12.5, 100).unwrap(), 1250);
        assert_eq!(to_fixed_point(9.3, 100).unwrap(), 930);
        assert_eq!(to_fixed_point(0.29, 100).unwrap(), 29);
        assert_eq!(to_fixed_point(-1.25, 100).unwrap(), -125);
    }

    #[test]
    fn test_to_fixed_point_out_of_range() {
        assert!(to_fixed_point(1.0e9, 100).is_err());
        assert!(to_fixed_point(f64::NAN, 100).is_err());
    }

    #[test]
    fn test_split_dword_low_word_first() {
        // Same layout as the ladder program expects: D6364 = low, D6365 = high
        assert_eq!(split_dword(930), [930, 0]);
        assert_eq!(split_dword(70_000), [4464, 1]);
        assert_eq!(split_dword(-1), [0xFFFF, 0xFFFF]);
    }

    #[test]
    fn test_join_dword() {
        assert_eq!(join_dword(4464, 1), 70_000);
        assert_eq!(join_dword(0xFFFF, 0xFFFF), -1);
        let [low, high] = split_dword(-123_456);
        assert_eq!(join_dword(low, high), -123_456);
    }

    #[test]
    fn test_from_fixed_point() {
        assert_eq!(from_fixed_point(1250, 100), 12.5);
        assert_eq!(from_fixed_point(7, 0), 7.0);
    }
}
