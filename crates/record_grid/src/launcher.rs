//! Daemon process spawning and port assignment.
//!
//! The launcher allocates every port a daemon needs before the process is
//! created, builds the daemon's command line, and spawns it in the
//! background with stdout/stderr captured to per-daemon log files. It never
//! waits for readiness; that is the readiness gate's job.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::error::{ClusterStartError, LaunchError};

/// Daemons default to the loopback interface.
pub const LOOPBACK: &str = "127.0.0.1";

/// Retry cap for port allocation before surfacing `PortExhausted`.
const PORT_ATTEMPTS: usize = 16;

/// The three daemon kinds composing a cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DaemonKind {
    StateStore,
    Catalog,
    Worker,
}

impl std::fmt::Display for DaemonKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DaemonKind::StateStore => "statestored",
            DaemonKind::Catalog => "catalogd",
            DaemonKind::Worker => "workerd",
        };
        f.write_str(name)
    }
}

/// Allocates ports that are free right now and never double-assigned within
/// one orchestrator instance.
#[derive(Default)]
pub struct PortAllocator {
    assigned: HashSet<u16>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve one port: ask the OS for a free ephemeral port, verify it is
    /// not already assigned to a live daemon, retry with a new candidate
    /// otherwise, bounded by `PORT_ATTEMPTS`.
    pub fn allocate(&mut self) -> Result<u16, ClusterStartError> {
        for _ in 0..PORT_ATTEMPTS {
            let Ok(listener) = TcpListener::bind((LOOPBACK, 0)) else {
                continue;
            };
            let Ok(addr) = listener.local_addr() else {
                continue;
            };
            drop(listener);
            if self.assigned.insert(addr.port()) {
                return Ok(addr.port());
            }
        }
        Err(ClusterStartError::PortExhausted {
            attempts: PORT_ATTEMPTS,
        })
    }
}

/// Ports assigned to a daemon before its process is created.
///
/// State-store and catalog daemons use `service`; workers use `planning`
/// and/or `data` depending on which roles are enabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct DaemonPorts {
    pub service: Option<u16>,
    pub planning: Option<u16>,
    pub data: Option<u16>,
}

/// One spawned daemon process. Immutable after start apart from liveness;
/// owned by the orchestrator, handed to callers by reference.
#[derive(Debug)]
pub struct DaemonHandle {
    kind: DaemonKind,
    host: String,
    ports: DaemonPorts,
    child: Child,
    stderr_path: PathBuf,
}

impl DaemonHandle {
    pub fn kind(&self) -> DaemonKind {
        self.kind
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn service_port(&self) -> Option<u16> {
        self.ports.service
    }

    pub fn planning_port(&self) -> Option<u16> {
        self.ports.planning
    }

    pub fn data_port(&self) -> Option<u16> {
        self.ports.data
    }

    pub fn service_addr(&self) -> Option<SocketAddr> {
        self.addr_for(self.ports.service)
    }

    pub fn planning_addr(&self) -> Option<SocketAddr> {
        self.addr_for(self.ports.planning)
    }

    pub fn data_addr(&self) -> Option<SocketAddr> {
        self.addr_for(self.ports.data)
    }

    fn addr_for(&self, port: Option<u16>) -> Option<SocketAddr> {
        port.and_then(|port| format!("{}:{port}", self.host).parse().ok())
    }

    /// Every port this daemon advertises, for readiness probing and
    /// uniqueness checks.
    pub fn advertised_addrs(&self) -> Vec<SocketAddr> {
        self.service_addr()
            .into_iter()
            .chain(self.planning_addr())
            .chain(self.data_addr())
            .collect()
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Best-effort read of the captured stderr log, for diagnostics.
    pub fn read_stderr(&self) -> String {
        std::fs::read_to_string(&self.stderr_path).unwrap_or_default()
    }

    /// Terminate the process and reap it. Best-effort and idempotent.
    pub fn stop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawns daemon processes from a single `record-grid` binary.
pub struct Launcher {
    binary: PathBuf,
    log_dir: PathBuf,
}

impl Launcher {
    pub fn new(binary: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Start one daemon in the background. `instance` disambiguates log
    /// files when several daemons of the same kind run. The ports recorded
    /// on the handle must match what `args` tells the daemon to bind.
    pub fn launch(
        &self,
        kind: DaemonKind,
        instance: usize,
        args: &[String],
        ports: DaemonPorts,
    ) -> Result<DaemonHandle, LaunchError> {
        let start_failed = |source| LaunchError::StartFailed { kind, source };

        std::fs::create_dir_all(&self.log_dir).map_err(start_failed)?;
        let stdout_path = self.log_dir.join(format!("{kind}-{instance}.out.log"));
        let stderr_path = self.log_dir.join(format!("{kind}-{instance}.err.log"));
        let stdout_file = open_log(&stdout_path).map_err(start_failed)?;
        let stderr_file = open_log(&stderr_path).map_err(start_failed)?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(kind.to_string())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));

        tracing::debug!(%kind, instance, args = ?args, "spawning daemon");
        let child = cmd.spawn().map_err(start_failed)?;

        Ok(DaemonHandle {
            kind,
            host: LOOPBACK.to_string(),
            ports,
            child,
            stderr_path,
        })
    }
}

fn open_log(path: &Path) -> std::io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}
