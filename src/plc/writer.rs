// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC writer
//!
//! [`PlcWriter`] is the single owner of the PLC session. Every operation takes
//! `&mut self`, so writes are serialized without a lock. The write policy is
//! chosen once when the writer is built:
//!
//! - [`WritePolicy::FastPath`]: one write, no read-back
//! - [`WritePolicy::RetryValidated`]: write, wait for the settle delay, read the
//!   same devices back and compare; mismatches and I/O failures are retried with
//!   an exponential backoff until `max_attempts` is reached
//!
//! Whenever an error breaks the connection the session is dropped, and the next
//! operation opens a new one through the [`PlcConnector`].

use std::time::Duration;

use log::{debug, error, info, warn};

use super::device::{DeviceAddress, DeviceKind};
use super::{PlcConnector, PlcTransport};
use crate::config::{WriteMode, WritePolicyConfig};
use crate::error::{GatewayError, Result};
use crate::utility::{join_dword, split_dword, to_fixed_point};

/// Retry parameters of [`WritePolicy::RetryValidated`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub settle_delay: Duration,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl RetrySettings {
    fn next_backoff(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier.max(1.0))
            .min(self.max_backoff)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            settle_delay: Duration::from_millis(350),
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(2000),
        }
    }
}

/// How a value reaches the PLC
#[derive(Debug, Clone, PartialEq)]
pub enum WritePolicy {
    FastPath,
    RetryValidated(RetrySettings),
}

impl From<&WritePolicyConfig> for WritePolicy {
    fn from(config: &WritePolicyConfig) -> Self {
        match config.mode {
            WriteMode::FastPath => WritePolicy::FastPath,
            WriteMode::RetryValidated => WritePolicy::RetryValidated(RetrySettings {
                max_attempts: config.max_attempts,
                settle_delay: Duration::from_millis(config.settle_delay_ms),
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
                backoff_multiplier: config.backoff_multiplier,
                max_backoff: Duration::from_millis(config.max_backoff_ms),
            }),
        }
    }
}

/// A single delivery to the PLC
#[derive(Debug, Clone, Copy)]
enum Target {
    DWord { head: DeviceAddress, raw: i32 },
    Bit { bit: DeviceAddress, on: bool },
}

impl Target {
    fn expected(&self) -> i64 {
        match self {
            Target::DWord { raw, .. } => *raw as i64,
            Target::Bit { on, .. } => *on as i64,
        }
    }

    fn device(&self) -> &DeviceAddress {
        match self {
            Target::DWord { head, .. } => head,
            Target::Bit { bit, .. } => bit,
        }
    }
}

fn short_read(device: &DeviceAddress) -> GatewayError {
    GatewayError::PlcResponse {
        reason: format!("short read-back from {}", device),
    }
}

/// Sole owner of the PLC connection
pub struct PlcWriter {
    connector: Box<dyn PlcConnector>,
    session: Option<Box<dyn PlcTransport>>,
    policy: WritePolicy,
    scale: u32,
}

impl PlcWriter {
    /// Create a writer; no connection is opened until the first operation
    /// or [`PlcWriter::connect_with_retries`]
    pub fn new(connector: Box<dyn PlcConnector>, policy: WritePolicy, scale: u32) -> Self {
        Self {
            connector,
            session: None,
            policy,
            scale,
        }
    }

    pub fn policy(&self) -> &WritePolicy {
        &self.policy
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Open the session, trying `attempts` times with `delay` in between
    pub async fn connect_with_retries(&mut self, attempts: u32, delay: Duration) -> Result<()> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match self.connector.connect().await {
                Ok(session) => {
                    self.session = Some(session);
                    info!(
                        "PLC {} connected (attempt {}/{})",
                        self.connector.describe(),
                        attempt,
                        attempts
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "PLC connection attempt {}/{} failed: {}",
                        attempt, attempts, e
                    );
                    if attempt < attempts && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(GatewayError::connection(format!(
            "could not connect to {} after {} attempt(s)",
            self.connector.describe(),
            attempts
        )))
    }

    /// Write `value` as a fixed-point double word at `head_device`
    pub async fn write(&mut self, head_device: &DeviceAddress, value: f64) -> Result<()> {
        let raw = to_fixed_point(value, self.scale)?;
        self.write_raw(head_device, raw).await
    }

    /// Write an already scaled double word at `head_device`
    pub async fn write_raw(&mut self, head_device: &DeviceAddress, raw: i32) -> Result<()> {
        if head_device.kind() != DeviceKind::Word {
            return Err(GatewayError::config(format!(
                "{} is not a word device",
                head_device
            )));
        }
        self.deliver(Target::DWord {
            head: *head_device,
            raw,
        })
        .await
    }

    /// Zero the double word at `head_device`
    pub async fn reset(&mut self, head_device: &DeviceAddress) -> Result<()> {
        self.write_raw(head_device, 0).await
    }

    /// Raise or clear a signal bit
    pub async fn set_signal(&mut self, bit: &DeviceAddress, on: bool) -> Result<()> {
        if bit.kind() != DeviceKind::Bit {
            return Err(GatewayError::config(format!("{} is not a bit device", bit)));
        }
        self.deliver(Target::Bit { bit: *bit, on }).await
    }

    /// Drop the current session, if any
    pub fn disconnect(&mut self) {
        if self.session.take().is_some() {
            info!("PLC session to {} closed", self.connector.describe());
        }
    }

    async fn deliver(&mut self, target: Target) -> Result<()> {
        let settings = match &self.policy {
            WritePolicy::FastPath => return self.send(&target).await,
            WritePolicy::RetryValidated(settings) => settings.clone(),
        };

        let attempts = settings.max_attempts.max(1);
        let expected = target.expected();
        let mut backoff = settings.initial_backoff;
        let mut actual = None;

        for attempt in 1..=attempts {
            match self.send(&target).await {
                Ok(()) => {
                    if !settings.settle_delay.is_zero() {
                        tokio::time::sleep(settings.settle_delay).await;
                    }
                    match self.fetch(&target).await {
                        Ok(value) if value == expected => {
                            debug!(
                                "{} confirmed at {} (attempt {}/{})",
                                target.device(),
                                value,
                                attempt,
                                attempts
                            );
                            return Ok(());
                        }
                        Ok(value) => {
                            warn!(
                                "{} read back {} instead of {} (attempt {}/{})",
                                target.device(),
                                value,
                                expected,
                                attempt,
                                attempts
                            );
                            actual = Some(value);
                        }
                        Err(e) => warn!(
                            "Read-back of {} failed (attempt {}/{}): {}",
                            target.device(),
                            attempt,
                            attempts,
                            e
                        ),
                    }
                }
                Err(e) => warn!(
                    "Write to {} failed (attempt {}/{}): {}",
                    target.device(),
                    attempt,
                    attempts,
                    e
                ),
            }

            if attempt < attempts {
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                backoff = settings.next_backoff(backoff);
            }
        }

        error!(
            "Giving up on {} after {} attempt(s), last read-back {:?}",
            target.device(),
            attempts,
            actual
        );
        Err(GatewayError::PlcWriteValidation {
            head_device: target.device().to_string(),
            attempts,
            expected,
            actual,
        })
    }

    async fn session(&mut self) -> Result<&mut Box<dyn PlcTransport>> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                let session = self.connector.connect().await?;
                info!("PLC session to {} opened", self.connector.describe());
                session
            }
        };
        Ok(self.session.insert(session))
    }

    async fn send(&mut self, target: &Target) -> Result<()> {
        let session = self.session().await?;
        let result = match target {
            Target::DWord { head, raw } => session.write_words(head, &split_dword(*raw)).await,
            Target::Bit { bit, on } => session.write_bits(bit, &[*on]).await,
        };
        self.check(result)
    }

    async fn fetch(&mut self, target: &Target) -> Result<i64> {
        let session = self.session().await?;
        let result = match target {
            Target::DWord { head, .. } => {
                session
                    .read_words(head, 2)
                    .await
                    .and_then(|words| match words.as_slice() {
                        [low, high, ..] => Ok(join_dword(*low, *high) as i64),
                        _ => Err(short_read(head)),
                    })
            }
            Target::Bit { bit, .. } => {
                session
                    .read_bits(bit, 1)
                    .await
                    .and_then(|bits| bits.first().map(|b| *b as i64).ok_or_else(|| short_read(bit)))
            }
        };
        self.check(result)
    }

    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.breaks_connection() && self.session.take().is_some() {
                warn!(
                    "Dropping PLC session to {}: {}",
                    self.connector.describe(),
                    e
                );
            }
        }
        result
    }
}
