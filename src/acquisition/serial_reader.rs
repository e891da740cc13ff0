// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial reader
//!
//! A [`SerialReader`] is a blocking iterator of [`Reading`]s for one port. It
//! opens the device lazily, closes it on any read error or disconnect, waits an
//! exponential backoff and reopens the same path. The iterator only ends once
//! the cancellation token fires, so it is meant to run on a blocking thread
//! (see [`run_reader`]).

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serialport::{DataBits, Parity, StopBits};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{FrameParser, FrameSplitter, Reading};
use crate::config::{SerialConfig, SerialParity};
use crate::error::GatewayError;
use crate::registry::PortBinding;

/// Opens the byte source of a port
pub trait PortOpener: Send {
    fn open(&mut self) -> io::Result<Box<dyn Read + Send>>;
}

/// Opens a real serial device with the configured line parameters
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    path: String,
    baud_rate: u32,
    data_bits: DataBits,
    parity: Parity,
    stop_bits: StopBits,
    timeout: Duration,
}

pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

pub fn to_serialport_parity(parity: SerialParity) -> Parity {
    match parity {
        SerialParity::None => Parity::None,
        SerialParity::Odd => Parity::Odd,
        SerialParity::Even => Parity::Even,
    }
}

pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

impl SerialPortOpener {
    pub fn new(binding: &PortBinding, config: &SerialConfig) -> Self {
        Self {
            path: binding.port_path.clone(),
            baud_rate: binding.baud_rate.unwrap_or(config.baud_rate),
            data_bits: to_serialport_data_bits(config.data_bits),
            parity: to_serialport_parity(config.parity),
            stop_bits: to_serialport_stop_bits(config.stop_bits),
            timeout: Duration::from_millis(config.read_timeout_ms),
        }
    }
}

impl PortOpener for SerialPortOpener {
    fn open(&mut self) -> io::Result<Box<dyn Read + Send>> {
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .timeout(self.timeout)
            .open()?;
        info!(
            "Opened {} at {} baud ({:?}, {:?}, {:?})",
            self.path, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        );
        Ok(Box::new(port))
    }
}

/// Blocking, restartable sequence of readings from one port
pub struct SerialReader {
    binding: Arc<PortBinding>,
    opener: Box<dyn PortOpener>,
    handle: Option<Box<dyn Read + Send>>,
    splitter: FrameSplitter,
    parser: FrameParser,
    pending: VecDeque<Reading>,
    cancel: CancellationToken,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff: Duration,
    buf: Vec<u8>,
    dropped: u64,
}

impl SerialReader {
    pub fn new(
        binding: Arc<PortBinding>,
        opener: Box<dyn PortOpener>,
        config: &SerialConfig,
        cancel: CancellationToken,
    ) -> Self {
        let initial_backoff = Duration::from_millis(config.reconnect_initial_ms);
        Self {
            parser: FrameParser::new(binding.clone(), config),
            splitter: FrameSplitter::new(config.terminator.as_bytes().to_vec(), config.max_frame_length),
            binding,
            opener,
            handle: None,
            pending: VecDeque::new(),
            cancel,
            initial_backoff,
            max_backoff: Duration::from_millis(config.reconnect_max_ms),
            backoff: initial_backoff,
            buf: vec![0u8; 256],
            dropped: 0,
        }
    }

    pub fn port(&self) -> &str {
        &self.binding.port_path
    }

    /// Frames rejected by the parser so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn close(&mut self, reason: &str) {
        if self.handle.take().is_some() {
            info!("Closed {} ({})", self.binding.port_path, reason);
        }
        self.splitter.reset();
    }

    /// Sleep in short slices so that cancellation is noticed quickly.
    /// Returns `false` when cancelled.
    fn wait(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }

    fn back_off(&mut self) -> bool {
        let delay = self.backoff;
        warn!(
            "Reopening {} in {} ms",
            self.binding.port_path,
            delay.as_millis()
        );
        self.backoff = (self.backoff * 2).min(self.max_backoff);
        self.wait(delay)
    }

    fn ingest(&mut self, n: usize) {
        let frames = self.splitter.feed(&self.buf[..n]);
        for frame in frames {
            match self.parser.parse(&frame) {
                Ok(reading) => self.pending.push_back(reading),
                Err(e) => {
                    self.dropped += 1;
                    debug!("{}", e);
                }
            }
        }
    }
}

impl Iterator for SerialReader {
    type Item = Reading;

    fn next(&mut self) -> Option<Reading> {
        loop {
            if self.cancel.is_cancelled() {
                self.close("shutdown");
                return None;
            }
            if let Some(reading) = self.pending.pop_front() {
                return Some(reading);
            }

            if self.handle.is_none() {
                match self.opener.open() {
                    Ok(handle) => {
                        self.backoff = self.initial_backoff;
                        self.handle = Some(handle);
                    }
                    Err(e) => {
                        let e = GatewayError::DeviceIo {
                            port: self.binding.port_path.clone(),
                            source: e,
                        };
                        warn!("{}", e);
                        if !self.back_off() {
                            return None;
                        }
                        continue;
                    }
                }
            }
            let Some(handle) = self.handle.as_mut() else {
                continue;
            };

            match handle.read(&mut self.buf) {
                Ok(0) => {
                    warn!("{} disconnected", self.binding.port_path);
                    self.close("disconnected");
                    if !self.back_off() {
                        return None;
                    }
                }
                Ok(n) => self.ingest(n),
                Err(ref e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    // No data within the read timeout
                }
                Err(e) => {
                    let e = GatewayError::DeviceIo {
                        port: self.binding.port_path.clone(),
                        source: e,
                    };
                    error!("{}", e);
                    self.close("read error");
                    if !self.back_off() {
                        return None;
                    }
                }
            }
        }
    }
}

/// Drive a reader on the current (blocking) thread, forwarding readings into
/// the loop channel. Backpressure blocks the reader rather than dropping data.
pub fn run_reader(reader: SerialReader, tx: mpsc::Sender<Reading>) {
    let port = reader.port().to_string();
    info!("Reader for {} started", port);
    for reading in reader {
        if tx.blocking_send(reading).is_err() {
            debug!("Reading channel closed, stopping reader for {}", port);
            break;
        }
    }
    info!("Reader for {} stopped", port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::ReplayOpener;
    use crate::config::{HeadDeviceConfig, PortConfig};
    use crate::registry::PortRegistry;

    fn binding() -> Arc<PortBinding> {
        let registry = PortRegistry::from_config(&[PortConfig {
            port_path: "/dev/ttyUSB0".to_string(),
            ftdi_id: None,
            baud_rate: None,
            head_devices: vec![HeadDeviceConfig::new("D6364")],
        }])
        .unwrap();
        registry.binding("/dev/ttyUSB0").unwrap().clone()
    }

    fn fast_config() -> SerialConfig {
        SerialConfig {
            reconnect_initial_ms: 0,
            reconnect_max_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_reads_across_reconnects() {
        let opener = ReplayOpener::new(vec![
            b"ST,+000012.50  g\r\nbad frame\r\nST,+0000".to_vec(),
            // The partial frame above is lost with the first session
            b"01.00  g\r\nUS,+000003.25  g\r\n".to_vec(),
        ]);
        let cancel = CancellationToken::new();
        let mut reader = SerialReader::new(binding(), Box::new(opener), &fast_config(), cancel.clone());

        let values: Vec<(f64, bool)> = reader.by_ref().take(2).map(|r| (r.value, r.valid)).collect();
        assert_eq!(values, vec![(12.5, true), (3.25, false)]);
        // "bad frame" and the orphaned tail "01.00  g"
        assert_eq!(reader.dropped(), 2);

        cancel.cancel();
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_cancel_during_backoff() {
        let opener = ReplayOpener::failing();
        let cancel = CancellationToken::new();
        let config = SerialConfig {
            reconnect_initial_ms: 60_000,
            reconnect_max_ms: 60_000,
            ..Default::default()
        };
        let mut reader = SerialReader::new(binding(), Box::new(opener), &config, cancel.clone());

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });
        let started = Instant::now();
        assert!(reader.next().is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn test_run_reader_stops_when_channel_closes() {
        let opener = ReplayOpener::new(vec![b"ST,+000012.50  g\r\nST,+000013.50  g\r\n".to_vec()]);
        let cancel = CancellationToken::new();
        let reader = SerialReader::new(binding(), Box::new(opener), &fast_config(), cancel.clone());
        let (tx, mut rx) = mpsc::channel(1);

        let worker = std::thread::spawn(move || run_reader(reader, tx));
        let first = rx.blocking_recv().unwrap();
        assert_eq!(first.value, 12.5);
        drop(rx);
        cancel.cancel();
        worker.join().unwrap();
    }
}
