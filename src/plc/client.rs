// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! MC protocol client over TCP
//!
//! Requests are strictly sequential: one frame is written, then the response
//! header and its announced body are read before the next request goes out.
//! Any socket error or timeout is reported as
//! [`GatewayError::PlcConnection`], which tells the writer to drop the session.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::device::DeviceAddress;
use super::frame::{self, PlcModel, Routing, RESPONSE_HEADER_LEN};
use super::{PlcConnector, PlcTransport};
use crate::config::PlcConfig;
use crate::error::{GatewayError, Result};

/// A connected MC protocol session
pub struct McClient {
    stream: TcpStream,
    peer: String,
    model: PlcModel,
    routing: Routing,
    io_timeout: Duration,
}

impl McClient {
    /// Open a TCP session to `address:port`
    pub async fn connect(
        address: &str,
        port: u16,
        model: PlcModel,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self> {
        let peer = format!("{}:{}", address, port);
        let stream = timeout(connect_timeout, TcpStream::connect(&peer))
            .await
            .map_err(|_| GatewayError::connection(format!("connect to {} timed out", peer)))?
            .map_err(|e| GatewayError::connection(format!("connect to {} failed: {}", peer, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| GatewayError::connection(format!("{}: {}", peer, e)))?;

        info!("Connected to PLC at {} ({:?} series)", peer, model);
        Ok(Self {
            stream,
            peer,
            model,
            routing: Routing::default(),
            io_timeout,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn exchange(&mut self, command: u16, request: Vec<u8>) -> Result<Vec<u8>> {
        let peer = self.peer.clone();
        let io_error = move |e: std::io::Error| GatewayError::connection(format!("{}: {}", peer, e));
        let timed_out = |what: &str| {
            GatewayError::connection(format!("{} {} timed out", self.peer, what))
        };

        timeout(self.io_timeout, self.stream.write_all(&request))
            .await
            .map_err(|_| timed_out("request"))?
            .map_err(&io_error)?;

        let mut response = vec![0u8; RESPONSE_HEADER_LEN];
        timeout(self.io_timeout, self.stream.read_exact(&mut response))
            .await
            .map_err(|_| timed_out("response"))?
            .map_err(&io_error)?;

        let body_len = frame::response_data_len(&response)?;
        response.resize(RESPONSE_HEADER_LEN + body_len, 0);
        timeout(
            self.io_timeout,
            self.stream.read_exact(&mut response[RESPONSE_HEADER_LEN..]),
        )
        .await
        .map_err(|_| timed_out("response"))?
        .map_err(&io_error)?;

        let decoded = frame::decode_response(&response)?;
        if decoded.end_code != 0 {
            return Err(GatewayError::PlcProtocol {
                command,
                end_code: decoded.end_code,
            });
        }
        Ok(decoded.data)
    }
}

#[async_trait]
impl PlcTransport for McClient {
    async fn read_words(&mut self, address: &DeviceAddress, count: usize) -> Result<Vec<u16>> {
        let request = frame::batch_read(&self.routing, self.model, address, count)?;
        let data = self.exchange(frame::CMD_BATCH_READ, request).await?;
        let words = frame::decode_words(&data, count)?;
        debug!("Read {} word(s) from {}: {:?}", count, address, words);
        Ok(words)
    }

    async fn write_words(&mut self, address: &DeviceAddress, values: &[u16]) -> Result<()> {
        let request = frame::batch_write_words(&self.routing, self.model, address, values)?;
        self.exchange(frame::CMD_BATCH_WRITE, request).await?;
        debug!("Wrote {:?} to {}", values, address);
        Ok(())
    }

    async fn read_bits(&mut self, address: &DeviceAddress, count: usize) -> Result<Vec<bool>> {
        let request = frame::batch_read(&self.routing, self.model, address, count)?;
        let data = self.exchange(frame::CMD_BATCH_READ, request).await?;
        frame::decode_bits(&data, count)
    }

    async fn write_bits(&mut self, address: &DeviceAddress, values: &[bool]) -> Result<()> {
        let request = frame::batch_write_bits(&self.routing, self.model, address, values)?;
        self.exchange(frame::CMD_BATCH_WRITE, request).await?;
        debug!("Wrote {:?} to {}", values, address);
        Ok(())
    }
}

/// Opens [`McClient`] sessions from the `plc` configuration section
#[derive(Debug, Clone)]
pub struct McConnector {
    address: String,
    port: u16,
    model: PlcModel,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl McConnector {
    pub fn from_config(config: &PlcConfig) -> Self {
        Self {
            address: config.address.clone(),
            port: config.port,
            model: config.model,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            io_timeout: Duration::from_millis(config.io_timeout_ms),
        }
    }
}

#[async_trait]
impl PlcConnector for McConnector {
    async fn connect(&self) -> Result<Box<dyn PlcTransport>> {
        let client = McClient::connect(
            &self.address,
            self.port,
            self.model,
            self.connect_timeout,
            self.io_timeout,
        )
        .await?;
        Ok(Box::new(client))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
