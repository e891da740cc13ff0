// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-memory PLC
//!
//! Selected with `plc.transport: mock` to run the gateway without hardware, and
//! used by the test suite. All sessions opened from one [`MockPlc`] share the
//! same device memory, so a test can keep a clone and inspect what the writer
//! did. Faults can be injected to exercise the retry and reconnect paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::info;

use super::device::DeviceAddress;
use super::{PlcConnector, PlcTransport};
use crate::error::{GatewayError, Result};

/// Operation counters of a [`MockPlc`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub connects: u32,
    pub word_writes: u32,
    pub word_reads: u32,
    pub bit_writes: u32,
    pub bit_reads: u32,
}

#[derive(Debug, Default)]
struct MockState {
    words: HashMap<DeviceAddress, u16>,
    bits: HashMap<DeviceAddress, bool>,
    stats: MockStats,
    ignore_writes: bool,
    fail_ops: u32,
    refuse_connects: u32,
    latency: Duration,
    generation: u64,
}

/// Shared-memory PLC emulator
#[derive(Debug, Clone, Default)]
pub struct MockPlc {
    state: Arc<Mutex<MockState>>,
}

impl MockPlc {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the memory from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stats(&self) -> MockStats {
        self.lock().stats.clone()
    }

    pub fn word(&self, address: &DeviceAddress) -> u16 {
        self.lock().words.get(address).copied().unwrap_or(0)
    }

    pub fn bit(&self, address: &DeviceAddress) -> bool {
        self.lock().bits.get(address).copied().unwrap_or(false)
    }

    /// Signed double word stored at `address` (low word) and `address + 1`
    pub fn dword(&self, address: &DeviceAddress) -> i32 {
        crate::utility::join_dword(self.word(address), self.word(&address.offset(1)))
    }

    /// Acknowledge writes without storing them, so every read-back returns
    /// the previous content
    pub fn set_ignore_writes(&self, ignore: bool) {
        self.lock().ignore_writes = ignore;
    }

    /// Fail the next `count` operations with a connection error and
    /// invalidate the sessions open at that time
    pub fn fail_next_operations(&self, count: u32) {
        self.lock().fail_ops = count;
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_connections(&self, count: u32) {
        self.lock().refuse_connects = count;
    }

    /// Delay applied to every operation
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }
}

#[async_trait]
impl PlcConnector for MockPlc {
    async fn connect(&self) -> Result<Box<dyn PlcTransport>> {
        let generation = {
            let mut state = self.lock();
            if state.refuse_connects > 0 {
                state.refuse_connects -= 1;
                return Err(GatewayError::connection("mock PLC refused the connection"));
            }
            state.stats.connects += 1;
            state.generation
        };
        info!("Connected to mock PLC (session {})", generation);
        Ok(Box::new(MockSession {
            plc: self.clone(),
            generation,
        }))
    }

    fn describe(&self) -> String {
        "mock PLC".to_string()
    }
}

struct MockSession {
    plc: MockPlc,
    generation: u64,
}

impl MockSession {
    /// Wait for the configured latency, then check injected faults
    async fn begin(&self) -> Result<()> {
        let latency = self.plc.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.plc.lock();
        if state.generation != self.generation {
            return Err(GatewayError::connection("mock PLC session was reset"));
        }
        if state.fail_ops > 0 {
            state.fail_ops -= 1;
            state.generation += 1;
            return Err(GatewayError::connection("mock PLC dropped the connection"));
        }
        Ok(())
    }
}

#[async_trait]
impl PlcTransport for MockSession {
    async fn read_words(&mut self, address: &DeviceAddress, count: usize) -> Result<Vec<u16>> {
        self.begin().await?;
        let mut state = self.plc.lock();
        state.stats.word_reads += 1;
        Ok((0..count as u32)
            .map(|i| state.words.get(&address.offset(i)).copied().unwrap_or(0))
            .collect())
    }

    async fn write_words(&mut self, address: &DeviceAddress, values: &[u16]) -> Result<()> {
        self.begin().await?;
        let mut state = self.plc.lock();
        state.stats.word_writes += 1;
        if !state.ignore_writes {
            for (i, value) in values.iter().enumerate() {
                state.words.insert(address.offset(i as u32), *value);
            }
        }
        Ok(())
    }

    async fn read_bits(&mut self, address: &DeviceAddress, count: usize) -> Result<Vec<bool>> {
        self.begin().await?;
        let mut state = self.plc.lock();
        state.stats.bit_reads += 1;
        Ok((0..count as u32)
            .map(|i| state.bits.get(&address.offset(i)).copied().unwrap_or(false))
            .collect())
    }

    async fn write_bits(&mut self, address: &DeviceAddress, values: &[bool]) -> Result<()> {
        self.begin().await?;
        let mut state = self.plc.lock();
        state.stats.bit_writes += 1;
        if !state.ignore_writes {
            for (i, value) in values.iter().enumerate() {
                state.bits.insert(address.offset(i as u32), *value);
            }
        }
        Ok(())
    }
}
