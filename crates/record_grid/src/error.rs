//! Error taxonomy for cluster orchestration and the plan/fetch protocol.
//!
//! Every unrecovered failure carries a specific kind so callers can tell
//! "cluster never came up" apart from "plan was rejected" apart from "a
//! worker was unreachable".

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::launcher::DaemonKind;

/// Failure to create a daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to start {kind} process: {source}")]
    StartFailed {
        kind: DaemonKind,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while bringing up (part of) the cluster.
#[derive(Debug, Error)]
pub enum ClusterStartError {
    /// A daemon was started out of dependency order.
    #[error("cannot start {daemon}: {required} is not running")]
    MissingDependency {
        daemon: DaemonKind,
        required: DaemonKind,
    },

    /// The process was created but never passed the readiness probe.
    ///
    /// The partially-started process has already been killed when this
    /// surfaces; readiness timeouts are never retried because a daemon that
    /// misses a generous bound indicates a real fault, not slowness.
    #[error("{kind} did not become ready on {addr} within {timeout:?}")]
    DaemonNotReady {
        kind: DaemonKind,
        addr: SocketAddr,
        timeout: Duration,
    },

    /// Local port allocation retries were exhausted.
    #[error("no usable port found after {attempts} attempts")]
    PortExhausted { attempts: usize },

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Connection-level failure against a daemon port.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection refused by {addr}")]
    Refused { addr: SocketAddr },

    #[error("connect to {addr} timed out after {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },

    #[error("{addr} unreachable: {source}")]
    Unreachable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a planning call. Never retried internally; retry policy
/// belongs to the caller.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planning service unreachable: {0}")]
    Unreachable(#[from] ConnectError),

    /// The daemon understood the request but could not produce a plan.
    #[error("plan request rejected: {message}")]
    Rejected { message: String },

    #[error("protocol mismatch talking to planning service: {message}")]
    ProtocolMismatch { message: String },
}

/// Failure to drain a task's records.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every candidate host failed at the connection level.
    #[error("all {candidates} candidate hosts unreachable for task")]
    AllCandidatesUnreachable { candidates: usize },

    #[error("fetch call against {addr} timed out")]
    Timeout { addr: SocketAddr },

    #[error("protocol mismatch talking to worker: {message}")]
    ProtocolMismatch { message: String },
}
