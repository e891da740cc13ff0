// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Aggregation loop
//!
//! Single consumer of the reading channel and sole owner of the [`PlcWriter`].
//! Every reading is routed through the [`PortRegistry`], filtered against the
//! per head device channel state and written to the PLC. Writes never overlap
//! because the loop awaits each one before taking the next reading.
//!
//! Once the cancellation token fires the loop drains: readings already queued
//! and the write in flight get until the shutdown grace deadline, anything
//! left after it is abandoned and reported as a
//! [`GatewayError::ShutdownTimeout`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::acquisition::Reading;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::plc::{DeviceAddress, PlcWriter};
use crate::registry::PortRegistry;

/// Where the loop currently is, published through a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, not consuming readings yet
    Idle,
    /// Pulling readings and routing them to the PLC
    Dispatching,
    /// Shutdown requested, finishing queued work
    Draining,
}

/// Counters logged when the loop exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub received: u64,
    pub written: u64,
    pub failed: u64,
    /// Readings filtered out or not routable
    pub dropped: u64,
    /// Idle resets written to the PLC
    pub resets: u64,
    /// Readings and idle resets left unwritten when the grace period ran out
    pub abandoned: u64,
}

/// Behaviour knobs of the loop, taken from the `gateway` section
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub min_weight: f64,
    pub accept_unstable: bool,
    pub peak_hold: bool,
    pub idle_reset: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl From<&GatewayConfig> for LoopSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            min_weight: config.min_weight,
            accept_unstable: config.accept_unstable,
            peak_hold: config.peak_hold,
            idle_reset: (config.idle_reset_secs > 0)
                .then(|| Duration::from_secs(config.idle_reset_secs)),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        }
    }
}

/// State of one head device since its last reset
#[derive(Debug)]
struct Channel {
    signal_bit: Option<DeviceAddress>,
    signal_raised: bool,
    last_written: Option<f64>,
    last_accepted: Instant,
}

/// How a unit of work ended with respect to shutdown
enum Flow {
    Completed,
    /// Shutdown was requested while the work was running, it still
    /// finished before the deadline
    CompletedDraining(Instant),
    Abandoned,
}

/// Await `work`; if `cancel` fires meanwhile, keep awaiting it only until
/// `grace` has elapsed.
async fn finish_within<F>(work: F, cancel: &CancellationToken, grace: Duration) -> Flow
where
    F: Future<Output = ()>,
{
    tokio::pin!(work);
    tokio::select! {
        biased;
        _ = &mut work => return Flow::Completed,
        _ = cancel.cancelled() => {}
    }
    let deadline = Instant::now() + grace;
    match time::timeout_at(deadline, work).await {
        Ok(()) => Flow::CompletedDraining(deadline),
        Err(_) => Flow::Abandoned,
    }
}

pub struct AggregationLoop {
    registry: Arc<PortRegistry>,
    writer: PlcWriter,
    settings: LoopSettings,
    channels: HashMap<DeviceAddress, Channel>,
    state: watch::Sender<LoopState>,
    report: LoopReport,
}

impl AggregationLoop {
    pub fn new(registry: Arc<PortRegistry>, writer: PlcWriter, settings: LoopSettings) -> Self {
        Self {
            registry,
            writer,
            settings,
            channels: HashMap::new(),
            state: watch::Sender::new(LoopState::Idle),
            report: LoopReport::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Follow the state transitions; the last state stays readable after the
    /// loop has returned
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn report(&self) -> &LoopReport {
        &self.report
    }

    fn tick_period(&self) -> Duration {
        self.settings
            .idle_reset
            .map(|idle| (idle / 4).clamp(Duration::from_millis(10), Duration::from_secs(1)))
            .unwrap_or(Duration::from_secs(1))
    }

    /// Consume readings until `cancel` fires or every sender is gone, then
    /// drain and return the counters.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Reading>,
        cancel: CancellationToken,
    ) -> LoopReport {
        info!("Aggregation loop started");
        self.state.send_replace(LoopState::Dispatching);
        let grace = self.settings.shutdown_grace;
        let mut ticker = time::interval(self.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut deadline = None;
        let mut abandoned_in_flight = false;
        loop {
            let reading = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match finish_within(self.reset_idle_channels(), &cancel, grace).await {
                        Flow::Completed => continue,
                        Flow::CompletedDraining(at) => deadline = Some(at),
                        Flow::Abandoned => {
                            self.report.abandoned += 1;
                            abandoned_in_flight = true;
                        }
                    }
                    break;
                }
                reading = rx.recv() => match reading {
                    Some(reading) => reading,
                    None => {
                        info!("All readers stopped");
                        break;
                    }
                },
            };

            self.report.received += 1;
            match finish_within(self.dispatch(reading), &cancel, grace).await {
                Flow::Completed => {}
                Flow::CompletedDraining(at) => {
                    deadline = Some(at);
                    break;
                }
                Flow::Abandoned => {
                    self.report.abandoned += 1;
                    abandoned_in_flight = true;
                    break;
                }
            }
        }

        self.state.send_replace(LoopState::Draining);
        if abandoned_in_flight {
            // The grace period is already spent
            deadline = Some(Instant::now());
        }
        self.drain(&mut rx, deadline.unwrap_or_else(|| Instant::now() + grace))
            .await;

        info!(
            "Aggregation loop stopped: {} received, {} written, {} failed, {} dropped, {} reset(s), {} abandoned",
            self.report.received,
            self.report.written,
            self.report.failed,
            self.report.dropped,
            self.report.resets,
            self.report.abandoned
        );
        self.report
    }

    async fn drain(&mut self, rx: &mut mpsc::Receiver<Reading>, deadline: Instant) {
        rx.close();
        debug!("Draining queued readings");
        loop {
            let reading = match time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(reading)) => reading,
                Ok(None) => break,
                Err(_) => break,
            };
            self.report.received += 1;
            if time::timeout_at(deadline, self.dispatch(reading)).await.is_err() {
                self.report.abandoned += 1;
                break;
            }
        }
        while rx.try_recv().is_ok() {
            self.report.received += 1;
            self.report.abandoned += 1;
        }

        if self.report.abandoned > 0 {
            let e = GatewayError::ShutdownTimeout {
                grace_ms: self.settings.shutdown_grace.as_millis() as u64,
                abandoned: self.report.abandoned as usize,
            };
            warn!("{}", e);
        } else {
            debug!("Drain complete");
        }
    }

    /// Route, filter and write one reading
    async fn dispatch(&mut self, reading: Reading) {
        let Some(head) = self.registry.route(&reading).cloned() else {
            warn!(
                "No head device {} bound to {}, reading dropped",
                reading.head_device, reading.source_port
            );
            self.report.dropped += 1;
            return;
        };
        if !reading.valid && !self.settings.accept_unstable {
            debug!("Unstable reading from {} ignored", reading.source_port);
            self.report.dropped += 1;
            return;
        }
        if reading.value < self.settings.min_weight {
            debug!(
                "Reading {} from {} below minimum weight {}",
                reading.value, reading.source_port, self.settings.min_weight
            );
            self.report.dropped += 1;
            return;
        }

        let channel = self.channels.entry(head.address).or_insert_with(|| Channel {
            signal_bit: head.signal_bit,
            signal_raised: false,
            last_written: None,
            last_accepted: Instant::now(),
        });
        channel.last_accepted = Instant::now();
        if self.settings.peak_hold && channel.last_written.is_some_and(|last| reading.value <= last)
        {
            debug!("{} not above held peak for {}", reading.value, head.address);
            self.report.dropped += 1;
            return;
        }

        if let Err(e) = self.writer.write(&head.address, reading.value).await {
            error!("{}", e);
            self.report.failed += 1;
            return;
        }
        self.report.written += 1;
        channel.last_written = Some(reading.value);
        debug!(
            "{} <- {} from {}",
            head.address, reading.value, reading.source_port
        );

        if let (Some(bit), false) = (channel.signal_bit, channel.signal_raised) {
            match self.writer.set_signal(&bit, true).await {
                Ok(()) => {
                    channel.signal_raised = true;
                    info!("Signal {} raised for {}", bit, head.address);
                }
                Err(e) => error!("Could not raise signal {}: {}", bit, e),
            }
        }
    }

    /// Zero every head device that has been quiet for the idle period
    async fn reset_idle_channels(&mut self) {
        let Some(idle) = self.settings.idle_reset else {
            return;
        };
        let now = Instant::now();
        let mut expired: Vec<DeviceAddress> = self
            .channels
            .iter()
            .filter(|(_, channel)| now.duration_since(channel.last_accepted) >= idle)
            .map(|(address, _)| *address)
            .collect();
        expired.sort_by_key(|address| address.number);

        for address in expired {
            info!(
                "No reading for {} s, resetting {}",
                idle.as_secs_f32(),
                address
            );
            if let Err(e) = self.writer.reset(&address).await {
                // Kept so the reset is retried on the next tick
                error!("Idle reset of {} failed: {}", address, e);
                self.report.failed += 1;
                continue;
            }
            self.report.resets += 1;
            let Some(channel) = self.channels.remove(&address) else {
                continue;
            };
            if let (Some(bit), true) = (channel.signal_bit, channel.signal_raised) {
                if let Err(e) = self.writer.set_signal(&bit, false).await {
                    error!("Could not clear signal {}: {}", bit, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_ports;
    use crate::plc::{MockPlc, WritePolicy};

    fn settings() -> LoopSettings {
        LoopSettings {
            min_weight: 1.0,
            accept_unstable: false,
            peak_hold: false,
            idle_reset: None,
            shutdown_grace: Duration::from_millis(500),
        }
    }

    fn reading(port: &str, head: &str, value: f64, valid: bool) -> Reading {
        Reading {
            source_port: port.to_string(),
            head_device: head.parse().unwrap(),
            value,
            timestamp: chrono::Utc::now(),
            valid,
        }
    }

    fn aggregation(plc: &MockPlc, settings: LoopSettings) -> AggregationLoop {
        let registry = Arc::new(PortRegistry::from_config(&default_ports()).unwrap());
        let writer = PlcWriter::new(Box::new(plc.clone()), WritePolicy::FastPath, 100);
        AggregationLoop::new(registry, writer, settings)
    }

    fn addr(text: &str) -> DeviceAddress {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_filters_and_signal() {
        let plc = MockPlc::new();
        let mut aggregation = aggregation(&plc, settings());

        aggregation.dispatch(reading("/dev/ttyUSB0", "D6364", 0.5, true)).await;
        aggregation.dispatch(reading("/dev/ttyUSB0", "D6364", 12.5, false)).await;
        aggregation.dispatch(reading("/dev/ttyUSB9", "D6364", 12.5, true)).await;
        assert_eq!(plc.stats().word_writes, 0);
        assert_eq!(aggregation.report().dropped, 3);

        aggregation.dispatch(reading("/dev/ttyUSB0", "D6364", 12.5, true)).await;
        aggregation.dispatch(reading("/dev/ttyUSB0", "D6364", 13.0, true)).await;
        assert_eq!(plc.dword(&addr("D6364")), 1300);
        assert!(plc.bit(&addr("M3300")));
        // Raised once only
        assert_eq!(plc.stats().bit_writes, 1);
        assert_eq!(aggregation.report().written, 2);
    }

    #[tokio::test]
    async fn test_peak_hold() {
        let plc = MockPlc::new();
        let mut aggregation = aggregation(
            &plc,
            LoopSettings {
                peak_hold: true,
                ..settings()
            },
        );
        for value in [5.0, 7.5, 6.0, 7.5] {
            aggregation.dispatch(reading("/dev/ttyUSB1", "D6464", value, true)).await;
        }
        assert_eq!(plc.dword(&addr("D6464")), 750);
        assert_eq!(aggregation.report().written, 2);
        assert_eq!(aggregation.report().dropped, 2);
    }

    #[tokio::test]
    async fn test_idle_reset_clears_channel() {
        let plc = MockPlc::new();
        let mut aggregation = aggregation(
            &plc,
            LoopSettings {
                idle_reset: Some(Duration::from_millis(200)),
                ..settings()
            },
        );
        aggregation.dispatch(reading("/dev/ttyUSB2", "D6564", 42.0, true)).await;
        assert!(plc.bit(&addr("M3500")));

        aggregation.reset_idle_channels().await;
        assert_eq!(plc.dword(&addr("D6564")), 4200);

        tokio::time::sleep(Duration::from_millis(300)).await;
        aggregation.reset_idle_channels().await;
        assert_eq!(plc.dword(&addr("D6564")), 0);
        assert!(!plc.bit(&addr("M3500")));
        assert_eq!(aggregation.report().resets, 1);
        assert!(aggregation.channels.is_empty());
    }

    #[tokio::test]
    async fn test_run_until_senders_gone() {
        let plc = MockPlc::new();
        let aggregation = aggregation(&plc, settings());
        let (tx, rx) = mpsc::channel(8);
        tx.send(reading("/dev/ttyUSB0", "D6364", 10.0, true)).await.unwrap();
        tx.send(reading("/dev/ttyUSB1", "D6464", 20.0, true)).await.unwrap();
        drop(tx);

        let report = aggregation.run(rx, CancellationToken::new()).await;
        assert_eq!(report.received, 2);
        assert_eq!(report.written, 2);
        assert_eq!(report.abandoned, 0);
        assert_eq!(plc.dword(&addr("D6464")), 2000);
    }

    #[tokio::test]
    async fn test_in_flight_write_abandoned_after_grace() {
        let plc = MockPlc::new();
        plc.set_latency(Duration::from_secs(5));
        let aggregation = aggregation(
            &plc,
            LoopSettings {
                shutdown_grace: Duration::from_millis(100),
                ..settings()
            },
        );
        let (tx, rx) = mpsc::channel(8);
        tx.send(reading("/dev/ttyUSB0", "D6364", 10.0, true)).await.unwrap();
        tx.send(reading("/dev/ttyUSB1", "D6464", 20.0, true)).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(aggregation.run(rx, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let started = std::time::Instant::now();
        let report = task.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.received, 2);
        assert_eq!(report.written, 0);
        assert_eq!(report.abandoned, 2);
        drop(tx);
    }

    #[tokio::test]
    async fn test_idle_reset_abandoned_after_grace() {
        let plc = MockPlc::new();
        let mut aggregation = aggregation(
            &plc,
            LoopSettings {
                idle_reset: Some(Duration::from_millis(40)),
                shutdown_grace: Duration::from_millis(100),
                ..settings()
            },
        );
        aggregation.dispatch(reading("/dev/ttyUSB0", "D6364", 10.0, true)).await;
        // The reset started by the next idle tick outlives the grace period
        plc.set_latency(Duration::from_secs(5));

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(aggregation.run(rx, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();

        let started = std::time::Instant::now();
        let report = task.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.written, 1);
        assert_eq!(report.resets, 0);
        assert_eq!(report.abandoned, 1);
        assert_eq!(plc.dword(&addr("D6364")), 1000);
        drop(tx);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let plc = MockPlc::new();
        let aggregation = aggregation(&plc, settings());
        let mut state = aggregation.subscribe();
        assert_eq!(aggregation.state(), LoopState::Idle);

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(aggregation.run(rx, cancel.clone()));
        state
            .wait_for(|s| *s == LoopState::Dispatching)
            .await
            .unwrap();

        tx.send(reading("/dev/ttyUSB0", "D6364", 10.0, true)).await.unwrap();
        cancel.cancel();
        let report = task.await.unwrap();
        assert_eq!(*state.borrow(), LoopState::Draining);
        assert_eq!(report.received, 1);
        assert_eq!(report.written, 1);
    }
}
