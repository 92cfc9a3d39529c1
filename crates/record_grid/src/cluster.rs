//! Multi-process cluster orchestration.
//!
//! `MiniCluster` owns the full bring-up sequence: state-store first, then
//! catalog, then any number of workers. Each start call allocates ports,
//! spawns the daemon process, and blocks until the daemon answers a
//! protocol-level handshake on every port it advertises. A daemon that
//! never becomes ready is killed and the start fails; readiness is never
//! retried with a fresh process.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClusterStartError;
use crate::launcher::{DaemonHandle, DaemonKind, DaemonPorts, Launcher, PortAllocator, LOOPBACK};
use crate::readiness;

/// Generous per-daemon readiness bound. A healthy daemon on loopback
/// answers within milliseconds; missing this indicates a real fault.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone, Debug)]
pub struct MiniClusterConfig {
    /// Path to the `record-grid` binary the daemons are spawned from.
    pub binary: PathBuf,
    /// Directory receiving per-daemon stdout/stderr log files.
    pub log_dir: PathBuf,
    /// How long each daemon gets to pass its readiness probe.
    pub ready_timeout: Duration,
}

impl MiniClusterConfig {
    pub fn new(binary: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            log_dir: log_dir.into(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Where the cluster is in its lifecycle. Phases only move forward, except
/// that `ShuttingDown` is reachable from any of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterPhase {
    Empty,
    StateStoreRunning,
    CatalogRunning,
    WorkersRunning,
    ShuttingDown,
    Stopped,
}

/// Orchestrates one cluster of daemon processes.
///
/// Daemons must be started in dependency order; starting a daemon whose
/// dependency is absent fails with `MissingDependency` without creating a
/// process. Handles stay owned by the cluster and are handed out by
/// reference. Dropping the cluster kills every remaining daemon.
pub struct MiniCluster {
    config: MiniClusterConfig,
    launcher: Launcher,
    ports: PortAllocator,
    // Declaration order doubles as reverse shutdown order on drop.
    workers: Vec<DaemonHandle>,
    catalogd: Option<DaemonHandle>,
    statestored: Option<DaemonHandle>,
    phase: ClusterPhase,
}

impl MiniCluster {
    pub fn new(config: MiniClusterConfig) -> Self {
        let launcher = Launcher::new(&config.binary, &config.log_dir);
        Self {
            config,
            launcher,
            ports: PortAllocator::new(),
            workers: Vec::new(),
            catalogd: None,
            statestored: None,
            phase: ClusterPhase::Empty,
        }
    }

    pub fn phase(&self) -> ClusterPhase {
        self.phase
    }

    pub fn statestored(&self) -> Option<&DaemonHandle> {
        self.statestored.as_ref()
    }

    pub fn catalogd(&self) -> Option<&DaemonHandle> {
        self.catalogd.as_ref()
    }

    pub fn workers(&self) -> &[DaemonHandle] {
        &self.workers
    }

    /// Start the state-store daemon. Idempotent: a second call returns the
    /// handle of the already-running instance.
    pub async fn start_statestored(&mut self) -> Result<&DaemonHandle, ClusterStartError> {
        if self.statestored.is_some() {
            return Ok(self.statestored.as_ref().unwrap());
        }

        let port = self.ports.allocate()?;
        let args = vec!["--listen".to_string(), loopback_addr(port)];
        let ports = DaemonPorts {
            service: Some(port),
            ..DaemonPorts::default()
        };
        let handle = self
            .start_daemon(DaemonKind::StateStore, 0, args, ports)
            .await?;
        self.phase = ClusterPhase::StateStoreRunning;
        Ok(self.statestored.insert(handle))
    }

    /// Start the catalog daemon. Requires a running state-store; idempotent
    /// like `start_statestored`.
    pub async fn start_catalogd(&mut self) -> Result<&DaemonHandle, ClusterStartError> {
        if self.catalogd.is_some() {
            return Ok(self.catalogd.as_ref().unwrap());
        }
        let statestore = self
            .statestored
            .as_ref()
            .and_then(DaemonHandle::service_addr)
            .ok_or(ClusterStartError::MissingDependency {
                daemon: DaemonKind::Catalog,
                required: DaemonKind::StateStore,
            })?;

        let port = self.ports.allocate()?;
        let args = vec![
            "--listen".to_string(),
            loopback_addr(port),
            "--statestore".to_string(),
            statestore.to_string(),
        ];
        let ports = DaemonPorts {
            service: Some(port),
            ..DaemonPorts::default()
        };
        let handle = self
            .start_daemon(DaemonKind::Catalog, 0, args, ports)
            .await?;
        self.phase = ClusterPhase::CatalogRunning;
        Ok(self.catalogd.insert(handle))
    }

    /// Start one worker daemon with both roles enabled.
    pub async fn start_worker(&mut self) -> Result<&DaemonHandle, ClusterStartError> {
        self.start_worker_with_roles(true, true).await
    }

    /// Start one worker daemon, choosing which of its two services listen.
    /// Requires both the state-store and the catalog.
    pub async fn start_worker_with_roles(
        &mut self,
        enable_planning: bool,
        enable_data: bool,
    ) -> Result<&DaemonHandle, ClusterStartError> {
        let missing = |required| ClusterStartError::MissingDependency {
            daemon: DaemonKind::Worker,
            required,
        };
        let statestore = self
            .statestored
            .as_ref()
            .and_then(DaemonHandle::service_addr)
            .ok_or_else(|| missing(DaemonKind::StateStore))?;
        let catalog = self
            .catalogd
            .as_ref()
            .and_then(DaemonHandle::service_addr)
            .ok_or_else(|| missing(DaemonKind::Catalog))?;

        let mut args = vec![
            "--statestore".to_string(),
            statestore.to_string(),
            "--catalog".to_string(),
            catalog.to_string(),
        ];
        let mut ports = DaemonPorts::default();
        if enable_planning {
            let port = self.ports.allocate()?;
            args.push("--listen-planning".to_string());
            args.push(loopback_addr(port));
            ports.planning = Some(port);
        }
        if enable_data {
            let port = self.ports.allocate()?;
            args.push("--listen-data".to_string());
            args.push(loopback_addr(port));
            ports.data = Some(port);
        }

        let instance = self.workers.len();
        let handle = self
            .start_daemon(DaemonKind::Worker, instance, args, ports)
            .await?;
        self.phase = ClusterPhase::WorkersRunning;
        self.workers.push(handle);
        Ok(self.workers.last().unwrap())
    }

    /// Spawn one daemon and gate on readiness. On timeout the process is
    /// killed and its captured stderr is logged before the error surfaces.
    async fn start_daemon(
        &self,
        kind: DaemonKind,
        instance: usize,
        args: Vec<String>,
        ports: DaemonPorts,
    ) -> Result<DaemonHandle, ClusterStartError> {
        let mut handle = self.launcher.launch(kind, instance, &args, ports)?;
        let addrs = handle.advertised_addrs();
        if let Err(addr) = readiness::wait_until_ready(&addrs, self.config.ready_timeout).await {
            tracing::warn!(
                %kind,
                %addr,
                stderr = %handle.read_stderr(),
                "daemon never became ready, killing it",
            );
            handle.stop();
            return Err(ClusterStartError::DaemonNotReady {
                kind,
                addr,
                timeout: self.config.ready_timeout,
            });
        }
        tracing::info!(%kind, instance, pid = handle.pid(), "daemon ready");
        Ok(handle)
    }

    /// Stop every daemon in reverse dependency order. Safe to call more
    /// than once; the cluster ends in `Stopped` regardless.
    pub fn shutdown(&mut self) {
        self.phase = ClusterPhase::ShuttingDown;
        for worker in self.workers.iter_mut().rev() {
            stop_daemon(worker);
        }
        self.workers.clear();
        if let Some(catalogd) = self.catalogd.as_mut() {
            stop_daemon(catalogd);
        }
        self.catalogd = None;
        if let Some(statestored) = self.statestored.as_mut() {
            stop_daemon(statestored);
        }
        self.statestored = None;
        self.phase = ClusterPhase::Stopped;
    }
}

impl Drop for MiniCluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stop_daemon(handle: &mut DaemonHandle) {
    if !handle.is_alive() {
        tracing::warn!(
            kind = %handle.kind(),
            pid = handle.pid(),
            "daemon exited before shutdown",
        );
    }
    tracing::debug!(kind = %handle.kind(), pid = handle.pid(), "stopping daemon");
    handle.stop();
}

fn loopback_addr(port: u16) -> String {
    format!("{LOOPBACK}:{port}")
}
