// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! MC protocol 3E binary frame codec
//!
//! Request layout (all multi-byte fields little endian):
//!
//! ```text
//! 50 00 | net | pc | io(2) | station | len(2) | timer(2) | cmd(2) | sub(2) | payload
//! ```
//!
//! Response layout:
//!
//! ```text
//! D0 00 | net | pc | io(2) | station | len(2) | end code(2) | data
//! ```
//!
//! `len` counts every byte that follows it.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::device::{DeviceAddress, DeviceKind, DeviceType};
use crate::error::{GatewayError, Result};

pub const REQUEST_SUBHEADER: [u8; 2] = [0x50, 0x00];
pub const RESPONSE_SUBHEADER: [u8; 2] = [0xD0, 0x00];

/// Bytes preceding the data-length-counted part of a response
pub const RESPONSE_HEADER_LEN: usize = 9;

pub const CMD_BATCH_READ: u16 = 0x0401;
pub const CMD_BATCH_WRITE: u16 = 0x1401;

/// Largest number of points a single batch command may carry
pub const MAX_BATCH_POINTS: usize = 960;

/// PLC CPU family, selects the device specification layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
pub enum PlcModel {
    #[default]
    #[value(name = "Q")]
    Q,
    #[value(name = "L")]
    L,
    #[value(name = "QnA")]
    QnA,
    #[serde(rename = "iQ-L")]
    #[value(name = "iQ-L")]
    IqL,
    #[serde(rename = "iQ-R")]
    #[value(name = "iQ-R")]
    IqR,
}

impl PlcModel {
    /// iQ-R and iQ-L CPUs use 4-byte device numbers and 2-byte device codes
    pub fn extended_device_spec(&self) -> bool {
        matches!(self, PlcModel::IqL | PlcModel::IqR)
    }

    pub fn subcommand(&self, kind: DeviceKind) -> u16 {
        match (kind, self.extended_device_spec()) {
            (DeviceKind::Word, false) => 0x0000,
            (DeviceKind::Bit, false) => 0x0001,
            (DeviceKind::Word, true) => 0x0002,
            (DeviceKind::Bit, true) => 0x0003,
        }
    }
}

/// Routing fields shared by every frame of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routing {
    pub network: u8,
    pub pc: u8,
    pub io: u16,
    pub station: u8,
    /// Monitoring timer in units of 250 ms
    pub monitoring_timer: u16,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            network: 0x00,
            pc: 0xFF,
            io: 0x03FF,
            station: 0x00,
            monitoring_timer: 0x0010,
        }
    }
}

/// Decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub end_code: u16,
    pub data: Vec<u8>,
}

/// Decoded request frame, used by the in-process PLC emulators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: u16,
    pub subcommand: u16,
    pub device: DeviceAddress,
    pub points: u16,
    pub data: Vec<u8>,
}

impl Request {
    pub fn is_bit_unit(&self) -> bool {
        self.subcommand & 0x0001 == 0x0001
    }
}

fn encode_device(model: PlcModel, address: &DeviceAddress, buf: &mut Vec<u8>) {
    let number = address.number.to_le_bytes();
    if model.extended_device_spec() {
        buf.extend_from_slice(&number);
        buf.extend_from_slice(&[address.device.code(), 0x00]);
    } else {
        buf.extend_from_slice(&number[..3]);
        buf.push(address.device.code());
    }
}

/// Assemble a complete request frame around `payload`
pub fn encode_request(routing: &Routing, command: u16, subcommand: u16, payload: &[u8]) -> Vec<u8> {
    // timer + command + subcommand
    let data_len = (6 + payload.len()) as u16;
    let mut frame = Vec::with_capacity(15 + payload.len());
    frame.extend_from_slice(&REQUEST_SUBHEADER);
    frame.push(routing.network);
    frame.push(routing.pc);
    frame.extend_from_slice(&routing.io.to_le_bytes());
    frame.push(routing.station);
    frame.extend_from_slice(&data_len.to_le_bytes());
    frame.extend_from_slice(&routing.monitoring_timer.to_le_bytes());
    frame.extend_from_slice(&command.to_le_bytes());
    frame.extend_from_slice(&subcommand.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn check_points(points: usize) -> Result<u16> {
    if points == 0 || points > MAX_BATCH_POINTS {
        return Err(GatewayError::PlcResponse {
            reason: format!("batch of {} points is outside 1..={}", points, MAX_BATCH_POINTS),
        });
    }
    Ok(points as u16)
}

/// Batch read of `points` devices starting at `address`
pub fn batch_read(
    routing: &Routing,
    model: PlcModel,
    address: &DeviceAddress,
    points: usize,
) -> Result<Vec<u8>> {
    let points = check_points(points)?;
    let mut payload = Vec::with_capacity(8);
    encode_device(model, address, &mut payload);
    payload.extend_from_slice(&points.to_le_bytes());
    Ok(encode_request(
        routing,
        CMD_BATCH_READ,
        model.subcommand(address.kind()),
        &payload,
    ))
}

/// Batch write of word values starting at `address`
pub fn batch_write_words(
    routing: &Routing,
    model: PlcModel,
    address: &DeviceAddress,
    values: &[u16],
) -> Result<Vec<u8>> {
    let points = check_points(values.len())?;
    let mut payload = Vec::with_capacity(8 + values.len() * 2);
    encode_device(model, address, &mut payload);
    payload.extend_from_slice(&points.to_le_bytes());
    for value in values {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    Ok(encode_request(
        routing,
        CMD_BATCH_WRITE,
        model.subcommand(DeviceKind::Word),
        &payload,
    ))
}

/// Batch write of bit values starting at `address`
pub fn batch_write_bits(
    routing: &Routing,
    model: PlcModel,
    address: &DeviceAddress,
    values: &[bool],
) -> Result<Vec<u8>> {
    let points = check_points(values.len())?;
    let mut payload = Vec::with_capacity(8 + values.len().div_ceil(2));
    encode_device(model, address, &mut payload);
    payload.extend_from_slice(&points.to_le_bytes());
    payload.extend_from_slice(&encode_bits(values));
    Ok(encode_request(
        routing,
        CMD_BATCH_WRITE,
        model.subcommand(DeviceKind::Bit),
        &payload,
    ))
}

/// Data length announced by a response header
pub fn response_data_len(header: &[u8]) -> Result<usize> {
    if header.len() < RESPONSE_HEADER_LEN {
        return Err(GatewayError::PlcResponse {
            reason: format!("response header too short ({} bytes)", header.len()),
        });
    }
    if header[..2] != RESPONSE_SUBHEADER {
        return Err(GatewayError::PlcResponse {
            reason: format!(
                "unexpected subheader {:02X} {:02X}",
                header[0], header[1]
            ),
        });
    }
    let len = u16::from_le_bytes([header[7], header[8]]) as usize;
    if len < 2 {
        return Err(GatewayError::PlcResponse {
            reason: format!("response data length {} cannot hold an end code", len),
        });
    }
    Ok(len)
}

/// Decode a complete response frame
pub fn decode_response(frame: &[u8]) -> Result<Response> {
    let len = response_data_len(frame)?;
    let body = &frame[RESPONSE_HEADER_LEN..];
    if body.len() != len {
        return Err(GatewayError::PlcResponse {
            reason: format!(
                "response announces {} bytes but carries {}",
                len,
                body.len()
            ),
        });
    }
    Ok(Response {
        end_code: u16::from_le_bytes([body[0], body[1]]),
        data: body[2..].to_vec(),
    })
}

/// Build a response frame with the routing fields of `routing`
pub fn encode_response(routing: &Routing, end_code: u16, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + 2 + data.len());
    frame.extend_from_slice(&RESPONSE_SUBHEADER);
    frame.push(routing.network);
    frame.push(routing.pc);
    frame.extend_from_slice(&routing.io.to_le_bytes());
    frame.push(routing.station);
    frame.extend_from_slice(&((2 + data.len()) as u16).to_le_bytes());
    frame.extend_from_slice(&end_code.to_le_bytes());
    frame.extend_from_slice(data);
    frame
}

/// Decode a complete request frame
pub fn decode_request(frame: &[u8]) -> Result<Request> {
    let malformed = |reason: &str| GatewayError::PlcResponse {
        reason: reason.to_string(),
    };
    if frame.len() < 15 || frame[..2] != REQUEST_SUBHEADER {
        return Err(malformed("not a 3E request"));
    }
    let len = u16::from_le_bytes([frame[7], frame[8]]) as usize;
    if frame.len() != RESPONSE_HEADER_LEN + len {
        return Err(malformed("request length mismatch"));
    }
    let command = u16::from_le_bytes([frame[11], frame[12]]);
    let subcommand = u16::from_le_bytes([frame[13], frame[14]]);
    let payload = &frame[15..];

    let extended = subcommand & 0x0002 == 0x0002;
    let spec_len = if extended { 6 } else { 4 };
    if payload.len() < spec_len + 2 {
        return Err(malformed("request payload too short"));
    }
    let (number, code) = if extended {
        (
            u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            payload[4],
        )
    } else {
        (
            u32::from_le_bytes([payload[0], payload[1], payload[2], 0]),
            payload[3],
        )
    };
    let device = DeviceType::from_code(code).ok_or_else(|| malformed("unknown device code"))?;
    let points = u16::from_le_bytes([payload[spec_len], payload[spec_len + 1]]);

    Ok(Request {
        command,
        subcommand,
        device: DeviceAddress::new(device, number),
        points,
        data: payload[spec_len + 2..].to_vec(),
    })
}

/// Decode `count` little endian words from response data
pub fn decode_words(data: &[u8], count: usize) -> Result<Vec<u16>> {
    if data.len() < count * 2 {
        return Err(GatewayError::PlcResponse {
            reason: format!("expected {} words, got {} bytes", count, data.len()),
        });
    }
    Ok(data
        .chunks_exact(2)
        .take(count)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Bits travel two per byte: `0x10` is the first bit, `0x01` the second
pub fn encode_bits(values: &[bool]) -> Vec<u8> {
    values
        .chunks(2)
        .map(|pair| {
            let mut byte = 0u8;
            if pair[0] {
                byte |= 0x10;
            }
            if pair.len() > 1 && pair[1] {
                byte |= 0x01;
            }
            byte
        })
        .collect()
}

pub fn decode_bits(data: &[u8], count: usize) -> Result<Vec<bool>> {
    if data.len() < count.div_ceil(2) {
        return Err(GatewayError::PlcResponse {
            reason: format!("expected {} bits, got {} bytes", count, data.len()),
        });
    }
    let mut bits = Vec::with_capacity(count);
    for byte in data {
        for bit in [byte & 0xF0 == 0x10, byte & 0x0F == 0x01] {
            if bits.len() < count {
                bits.push(bit);
            }
        }
    }
    Ok(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_write_words_layout() {
        let addr: DeviceAddress = "D6364".parse().unwrap();
        let frame = batch_write_words(&Routing::default(), PlcModel::Q, &addr, &[1250, 0]).unwrap();

        assert_eq!(&frame[..9], &[0x50, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0x10, 0x00]);
        // timer, command, subcommand
        assert_eq!(&frame[9..15], &[0x10, 0x00, 0x01, 0x14, 0x00, 0x00]);
        // 6364 = 0x0018DC, device code D
        assert_eq!(&frame[15..19], &[0xDC, 0x18, 0x00, 0xA8]);
        assert_eq!(&frame[19..21], &[0x02, 0x00]);
        assert_eq!(&frame[21..], &[0xE2, 0x04, 0x00, 0x00]);
    }

    #[test]
    fn test_iqr_device_spec() {
        let addr: DeviceAddress = "D100".parse().unwrap();
        let frame = batch_read(&Routing::default(), PlcModel::IqR, &addr, 2).unwrap();
        assert_eq!(&frame[13..15], &[0x02, 0x00]);
        assert_eq!(&frame[15..21], &[0x64, 0x00, 0x00, 0x00, 0xA8, 0x00]);

        let request = decode_request(&frame).unwrap();
        assert_eq!(request.device, addr);
        assert_eq!(request.points, 2);
        assert_eq!(request.command, CMD_BATCH_READ);
    }

    #[test]
    fn test_bit_write_packs_nibbles() {
        let addr: DeviceAddress = "M3300".parse().unwrap();
        let frame = batch_write_bits(&Routing::default(), PlcModel::Q, &addr, &[true, false, true]).unwrap();
        let request = decode_request(&frame).unwrap();
        assert!(request.is_bit_unit());
        assert_eq!(request.data, vec![0x10, 0x10]);
        assert_eq!(decode_bits(&request.data, 3).unwrap(), vec![true, false, true]);
    }

    #[test]
    fn test_decode_response() {
        let frame = encode_response(&Routing::default(), 0, &[0xE2, 0x04, 0x00, 0x00]);
        let response = decode_response(&frame).unwrap();
        assert_eq!(response.end_code, 0);
        assert_eq!(decode_words(&response.data, 2).unwrap(), vec![1250, 0]);
    }

    #[test]
    fn test_decode_response_rejects_garbage() {
        assert!(decode_response(&[0x50, 0x00, 0x00]).is_err());
        let mut frame = encode_response(&Routing::default(), 0, &[1, 2]);
        frame.pop();
        assert!(decode_response(&frame).is_err());
        frame[0] = 0xAA;
        assert!(response_data_len(&frame).is_err());
    }

    #[test]
    fn test_batch_size_limits() {
        let addr: DeviceAddress = "D0".parse().unwrap();
        assert!(batch_write_words(&Routing::default(), PlcModel::Q, &addr, &[]).is_err());
        assert!(batch_read(&Routing::default(), PlcModel::Q, &addr, MAX_BATCH_POINTS + 1).is_err());
    }
}
