// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Health supervisor
//!
//! Runs beside the gateway container, never inside it. Each poll checks that
//! every configured scale is visible to the OS and that the container is
//! running. A missing device triggers a USB rebind followed by a container
//! restart; a stopped container is restarted. Recovery actions are rate
//! limited by a cooldown so a permanently unplugged scale does not cause a
//! restart loop.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{PortConfig, SupervisorConfig};

/// A configured scale the OS does not currently expose
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDevice {
    pub port_path: String,
    /// Set when the device node exists but its FTDI link does not
    pub ftdi_id: Option<String>,
}

/// Ports whose device node or FTDI by-id link is absent
pub fn missing_devices(ports: &[PortConfig], by_id_dir: &Path) -> Vec<MissingDevice> {
    let links: Vec<String> = std::fs::read_dir(by_id_dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();

    ports
        .iter()
        .filter_map(|port| {
            if !Path::new(&port.port_path).exists() {
                return Some(MissingDevice {
                    port_path: port.port_path.clone(),
                    ftdi_id: None,
                });
            }
            let id = port.ftdi_id.as_deref().filter(|id| !id.is_empty())?;
            if links.iter().any(|link| link.contains(id)) {
                None
            } else {
                Some(MissingDevice {
                    port_path: port.port_path.clone(),
                    ftdi_id: Some(id.to_string()),
                })
            }
        })
        .collect()
}

/// Unbinds and rebinds USB devices through sysfs
#[derive(Debug, Clone)]
pub struct UsbRebinder {
    driver_path: PathBuf,
    bus_ids: Vec<String>,
    delay: Duration,
}

impl UsbRebinder {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            driver_path: PathBuf::from(&config.usb_driver_path),
            bus_ids: config.usb_bus_ids.clone(),
            delay: Duration::from_millis(config.rebind_delay_ms),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.bus_ids.is_empty()
    }

    async fn write_all(&self, file: &str) -> Result<()> {
        let path = self.driver_path.join(file);
        for id in &self.bus_ids {
            debug!("{} <- {}", path.display(), id);
            tokio::fs::write(&path, id)
                .await
                .with_context(|| format!("Failed to write {} to {}", id, path.display()))?;
        }
        Ok(())
    }

    /// Unbind every bus id, wait, then bind them again
    pub async fn rebind(&self) -> Result<()> {
        info!("Rebinding USB devices {}", self.bus_ids.join(", "));
        // A device that already dropped off the bus cannot be unbound
        if let Err(e) = self.write_all("unbind").await {
            warn!("{:#}", e);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.write_all("bind").await
    }
}

/// Control over the container running the gateway
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn is_running(&self) -> Result<bool>;
    async fn restart(&self) -> Result<()>;
}

/// [`ContainerRuntime`] backed by the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    command: String,
    container: String,
}

impl DockerCli {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            command: config.docker_command.clone(),
            container: config.container_name.clone(),
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.command)
            .args(args)
            .arg(&self.container)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.command))?;
        if !output.status.success() {
            bail!(
                "{} {} {} failed ({}): {}",
                self.command,
                args.join(" "),
                self.container,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn is_running(&self) -> Result<bool> {
        let state = self
            .docker(&["inspect", "-f", "{{.State.Running}}"])
            .await?;
        Ok(state == "true")
    }

    async fn restart(&self) -> Result<()> {
        self.docker(&["restart"]).await.map(|_| ())
    }
}

/// Outcome of one supervision round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    /// Devices were missing, USB rebound (if configured) and container restarted
    Recovered(Vec<MissingDevice>),
    /// The container was not running and has been restarted
    Restarted,
    /// Something is wrong but the last action is too recent
    CoolingDown,
}

pub struct Supervisor {
    ports: Vec<PortConfig>,
    by_id_dir: PathBuf,
    poll_interval: Duration,
    cooldown: Duration,
    rebinder: UsbRebinder,
    runtime: Box<dyn ContainerRuntime>,
    last_action: Option<Instant>,
}

impl Supervisor {
    pub fn new(
        config: &SupervisorConfig,
        ports: Vec<PortConfig>,
        runtime: Box<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            ports,
            by_id_dir: PathBuf::from(&config.serial_by_id_dir),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            cooldown: Duration::from_secs(config.restart_cooldown_secs),
            rebinder: UsbRebinder::new(config),
            runtime,
            last_action: None,
        }
    }

    fn cooling_down(&self) -> bool {
        self.last_action
            .is_some_and(|at| at.elapsed() < self.cooldown)
    }

    /// One supervision round
    pub async fn check_once(&mut self) -> Result<Verdict> {
        let missing = missing_devices(&self.ports, &self.by_id_dir);
        if !missing.is_empty() {
            for device in &missing {
                match &device.ftdi_id {
                    Some(id) => warn!("{}: no by-id link for FTDI {}", device.port_path, id),
                    None => warn!("{}: device node missing", device.port_path),
                }
            }
            if self.cooling_down() {
                return Ok(Verdict::CoolingDown);
            }
            self.last_action = Some(Instant::now());
            if self.rebinder.is_configured() {
                self.rebinder.rebind().await?;
            }
            self.runtime.restart().await?;
            info!("Container restarted after device recovery");
            return Ok(Verdict::Recovered(missing));
        }

        let running = match self.runtime.is_running().await {
            Ok(running) => running,
            Err(e) => {
                warn!("Container state unknown: {:#}", e);
                false
            }
        };
        if running {
            return Ok(Verdict::Healthy);
        }
        warn!("Gateway container is not running");
        if self.cooling_down() {
            return Ok(Verdict::CoolingDown);
        }
        self.last_action = Some(Instant::now());
        self.runtime.restart().await?;
        info!("Container restarted");
        Ok(Verdict::Restarted)
    }

    /// Poll until `cancel` fires; failed rounds are logged and retried at the
    /// next poll.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Supervising {} port(s) every {} s",
            self.ports.len(),
            self.poll_interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.check_once().await {
                        Ok(Verdict::Healthy) => debug!("All devices present, container running"),
                        Ok(verdict) => info!("Supervision round: {:?}", verdict),
                        Err(e) => error!("Recovery failed: {:#}", e),
                    }
                }
            }
        }
        info!("Supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeadDeviceConfig;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeRuntime {
        running: AtomicBool,
        restarts: AtomicU32,
    }

    #[async_trait]
    impl ContainerRuntime for Arc<FakeRuntime> {
        async fn is_running(&self) -> Result<bool> {
            Ok(self.running.load(Ordering::SeqCst))
        }

        async fn restart(&self) -> Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        dir: TempDir,
        runtime: Arc<FakeRuntime>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir(dir.path().join("by-id")).unwrap();
            std::fs::create_dir(dir.path().join("driver")).unwrap();
            std::fs::write(dir.path().join("ttyUSB0"), b"").unwrap();
            std::fs::write(
                dir.path().join("by-id").join("usb-FTDI_FT232R_USB_UART_A10KQ3PZ-if00-port0"),
                b"",
            )
            .unwrap();
            Self {
                dir,
                runtime: Arc::new(FakeRuntime::default()),
            }
        }

        fn port(&self, name: &str, ftdi: Option<&str>) -> PortConfig {
            PortConfig {
                port_path: self.dir.path().join(name).to_string_lossy().into_owned(),
                ftdi_id: ftdi.map(str::to_string),
                baud_rate: None,
                head_devices: vec![HeadDeviceConfig::new("D100")],
            }
        }

        fn config(&self, cooldown_secs: u64) -> SupervisorConfig {
            SupervisorConfig {
                usb_driver_path: self.dir.path().join("driver").to_string_lossy().into_owned(),
                usb_bus_ids: vec!["1-1.2".to_string()],
                serial_by_id_dir: self.dir.path().join("by-id").to_string_lossy().into_owned(),
                restart_cooldown_secs: cooldown_secs,
                rebind_delay_ms: 0,
                ..Default::default()
            }
        }

        fn supervisor(&self, ports: Vec<PortConfig>, cooldown_secs: u64) -> Supervisor {
            Supervisor::new(
                &self.config(cooldown_secs),
                ports,
                Box::new(self.runtime.clone()),
            )
        }
    }

    #[test]
    fn test_missing_devices() {
        let fixture = Fixture::new();
        let by_id = fixture.dir.path().join("by-id");
        let ports = vec![
            fixture.port("ttyUSB0", Some("A10KQ3PZ")),
            fixture.port("ttyUSB0", Some("B20XY")),
            fixture.port("ttyUSB1", None),
        ];
        let missing = missing_devices(&ports, &by_id);
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].ftdi_id.as_deref(), Some("B20XY"));
        assert!(missing[1].port_path.ends_with("ttyUSB1"));
        assert_eq!(missing[1].ftdi_id, None);
    }

    #[tokio::test]
    async fn test_healthy_and_restart() {
        let fixture = Fixture::new();
        fixture.runtime.running.store(true, Ordering::SeqCst);
        let mut supervisor = fixture.supervisor(vec![fixture.port("ttyUSB0", Some("A10KQ3PZ"))], 0);
        assert_eq!(supervisor.check_once().await.unwrap(), Verdict::Healthy);

        fixture.runtime.running.store(false, Ordering::SeqCst);
        assert_eq!(supervisor.check_once().await.unwrap(), Verdict::Restarted);
        assert_eq!(fixture.runtime.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_device_rebinds_once_per_cooldown() {
        let fixture = Fixture::new();
        fixture.runtime.running.store(true, Ordering::SeqCst);
        let mut supervisor = fixture.supervisor(vec![fixture.port("ttyUSB1", None)], 3600);

        let verdict = supervisor.check_once().await.unwrap();
        assert!(matches!(verdict, Verdict::Recovered(ref missing) if missing.len() == 1));
        let driver = fixture.dir.path().join("driver");
        assert_eq!(std::fs::read_to_string(driver.join("unbind")).unwrap(), "1-1.2");
        assert_eq!(std::fs::read_to_string(driver.join("bind")).unwrap(), "1-1.2");
        assert_eq!(fixture.runtime.restarts.load(Ordering::SeqCst), 1);

        assert_eq!(supervisor.check_once().await.unwrap(), Verdict::CoolingDown);
        assert_eq!(fixture.runtime.restarts.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_docker_cli_failure_is_reported() {
        let runtime = DockerCli::new(&SupervisorConfig {
            docker_command: "false".to_string(),
            ..Default::default()
        });
        assert!(runtime.is_running().await.is_err());
        assert!(runtime.restart().await.is_err());
    }
}
