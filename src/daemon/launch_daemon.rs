// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::aggregation::{AggregationLoop, LoopReport, LoopSettings, LoopState};
use crate::acquisition::{run_reader, PortOpener, Reading, SerialPortOpener, SerialReader};
use crate::config::Config;
use crate::error::GatewayError;
use crate::plc::{connector_from_config, PlcConnector, PlcWriter, WritePolicy};
use crate::registry::{PortBinding, PortRegistry};

/// Extra time granted to the aggregation loop on top of its own grace period
const JOIN_MARGIN: Duration = Duration::from_secs(1);

/// The running gateway
///
/// Owns the handles of every task it spawned and the token used to stop them.
/// Readers run on the blocking pool, the aggregation loop and the heartbeat on
/// the async runtime.
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    aggregation: Option<JoinHandle<LoopReport>>,
    loop_state: Option<watch::Receiver<LoopState>>,
    cancel: CancellationToken,
    shutdown_grace: Duration,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            aggregation: None,
            loop_state: None,
            cancel: CancellationToken::new(),
            shutdown_grace: Duration::ZERO,
        }
    }

    /// Token cancelled by [`Daemon::shutdown`]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current state of the aggregation loop, `Idle` until it has started
    pub fn loop_state(&self) -> LoopState {
        self.loop_state
            .as_ref()
            .map(|state| *state.borrow())
            .unwrap_or(LoopState::Idle)
    }

    /// Launch the gateway with the PLC transport and serial devices named in
    /// the configuration.
    ///
    /// # Errors
    ///
    /// * [`GatewayError::Config`] when the port mapping is inconsistent
    /// * [`GatewayError::PlcConnection`] when the PLC cannot be reached within
    ///   the configured number of attempts
    pub async fn launch(&mut self, config: &Config) -> std::result::Result<(), GatewayError> {
        let connector = connector_from_config(&config.plc);
        let serial = config.serial.clone();
        self.launch_with(config, connector, move |binding| {
            Box::new(SerialPortOpener::new(binding, &serial)) as Box<dyn PortOpener>
        })
        .await
    }

    /// Launch the gateway with an explicit PLC connector and serial openers
    pub async fn launch_with<F>(
        &mut self,
        config: &Config,
        connector: Box<dyn PlcConnector>,
        opener: F,
    ) -> std::result::Result<(), GatewayError>
    where
        F: Fn(&PortBinding) -> Box<dyn PortOpener>,
    {
        let registry = Arc::new(PortRegistry::from_config(&config.ports)?);
        info!(
            "Starting gateway for {} port(s), PLC {}",
            registry.len(),
            connector.describe()
        );

        let policy = WritePolicy::from(&config.write_policy);
        debug!("Write policy: {:?}", policy);
        let mut writer = PlcWriter::new(connector, policy, config.gateway.scale);
        writer
            .connect_with_retries(
                config.plc.connect_retries,
                Duration::from_millis(config.plc.connect_retry_delay_ms),
            )
            .await?;

        let (tx, rx) = mpsc::channel::<Reading>(config.gateway.channel_capacity.max(1));
        for binding in registry.bindings() {
            self.start_reader(config, binding.clone(), opener(binding), tx.clone());
        }
        let queue = tx.downgrade();
        drop(tx);

        let settings = LoopSettings::from(&config.gateway);
        self.shutdown_grace = settings.shutdown_grace;
        let aggregation = AggregationLoop::new(registry, writer, settings);
        let state = aggregation.subscribe();
        self.loop_state = Some(state.clone());
        self.aggregation = Some(tokio::spawn(aggregation.run(rx, self.cancel.clone())));

        self.start_heartbeat(config.gateway.heartbeat_secs, queue, state);
        Ok(())
    }

    fn start_reader(
        &mut self,
        config: &Config,
        binding: Arc<PortBinding>,
        opener: Box<dyn PortOpener>,
        tx: mpsc::Sender<Reading>,
    ) {
        info!("Starting reader for {}", binding.port_path);
        let reader = SerialReader::new(binding, opener, &config.serial, self.cancel.child_token());
        let task = tokio::task::spawn_blocking(move || {
            run_reader(reader, tx);
            Ok(())
        });
        self.tasks.push(task);
    }

    /// Start a heartbeat task
    ///
    /// Logs that the daemon is alive together with the loop state and the
    /// number of readings waiting in the channel.
    fn start_heartbeat(
        &mut self,
        interval_secs: u64,
        queue: mpsc::WeakSender<Reading>,
        state: watch::Receiver<LoopState>,
    ) {
        if interval_secs == 0 {
            return;
        }
        info!("Starting heartbeat monitor");

        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let loop_state = *state.borrow();
                        match queue.upgrade() {
                            Some(tx) => debug!(
                                "Daemon heartbeat: {:?}, {} reading(s) queued",
                                loop_state,
                                tx.max_capacity() - tx.capacity()
                            ),
                            None => debug!("Daemon heartbeat: {:?}, no reader left", loop_state),
                        }
                    }
                }
            }
            Ok(())
        });

        self.tasks.push(task);
    }

    /// Signal all tasks to stop
    ///
    /// Readers close their ports at their next read timeout, the aggregation
    /// loop starts draining.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.cancel.cancel();
    }

    /// Wait for all tasks to complete
    ///
    /// Should be called after [`Daemon::shutdown`]. Returns the counters of the
    /// aggregation loop; a task that panics or does not finish in time is
    /// logged and skipped.
    pub async fn join(self) -> Result<LoopReport> {
        let mut report = LoopReport::default();
        if let Some(aggregation) = self.aggregation {
            match time::timeout(self.shutdown_grace + JOIN_MARGIN, aggregation).await {
                Ok(Ok(loop_report)) => report = loop_report,
                Ok(Err(e)) => error!("Aggregation loop panicked: {}", e),
                Err(_) => warn!("Aggregation loop did not stop within the grace period"),
            }
        }

        for task in self.tasks {
            match time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("Task failed: {}", e),
                Ok(Err(e)) => error!("Task panicked: {}", e),
                Err(_) => {
                    warn!("Task did not complete within timeout period, may be hung");
                }
            }
        }
        Ok(report)
    }
}
