//! RecordGrid: a miniature distributed record-serving cluster.
//!
//! The cluster is made of three daemon kinds, each an independent OS process:
//!
//! - `statestored`: cluster membership registry, started first.
//! - `catalogd`: table metadata and row service, depends on the state-store.
//! - `workerd`: serves planning requests and/or data-fetch sessions, depends
//!   on both of the above.
//!
//! The [`cluster::MiniCluster`] orchestrator spawns these daemons in
//! dependency order, waits for each to pass a protocol-level readiness probe,
//! and tracks their handles. Clients then drive the two-phase protocol: a
//! [`planner::PlannerClient`] turns a statement into a set of opaque tasks,
//! and [`fetch::fetch_all`] drains each task's records from one of the
//! workers named by the plan.

pub mod catalogd;
pub mod cluster;
pub mod conn;
pub mod dataset;
pub mod error;
pub mod fetch;
pub mod launcher;
pub mod planner;
pub mod proto;
pub mod readiness;
pub mod statestored;
pub mod workerd;

pub use cluster::{ClusterPhase, MiniCluster, MiniClusterConfig};
pub use error::{ClusterStartError, ConnectError, FetchError, LaunchError, PlanError};
pub use fetch::{fetch_all, FetchSession, Record};
pub use launcher::{DaemonHandle, DaemonKind};
pub use planner::PlannerClient;
pub use proto::{HostPort, PlanRequestParams, PlanRequestResult, RequestType, Task};
