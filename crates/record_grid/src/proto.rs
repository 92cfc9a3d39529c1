//! Logical wire messages shared by all daemons and clients.
//!
//! The encoding is a u32 length prefix followed by a JSON body (see
//! [`crate::conn`]); this module only defines the message shapes. Every
//! connection opens with a `Handshake` exchange, which doubles as the
//! readiness probe's success criterion.

use serde::{Deserialize, Serialize};

/// Bumped on any incompatible message change. Peers with a different
/// version are rejected at handshake time.
pub const PROTOCOL_VERSION: u32 = 1;

/// A network endpoint as carried on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    pub hostname: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Services a member can expose to the rest of the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Planning,
    Data,
    Catalog,
}

/// One member's registration record in the state-store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemberInfo {
    pub planning: Option<HostPort>,
    pub data: Option<HostPort>,
    pub catalog: Option<HostPort>,
}

impl MemberInfo {
    /// The endpoint registered for `service`, if any.
    pub fn endpoint(&self, service: ServiceKind) -> Option<&HostPort> {
        match service {
            ServiceKind::Planning => self.planning.as_ref(),
            ServiceKind::Data => self.data.as_ref(),
            ServiceKind::Catalog => self.catalog.as_ref(),
        }
    }
}

/// Kinds of plan request. A tagged variant so future request kinds extend
/// the enum rather than overloading a string discriminator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestType {
    Sql { statement: String },
}

/// Immutable parameters for one planning call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequestParams {
    pub request_type: RequestType,
}

impl PlanRequestParams {
    /// Convenience constructor for a SQL plan request.
    pub fn sql(statement: impl Into<String>) -> Self {
        Self {
            request_type: RequestType::Sql {
                statement: statement.into(),
            },
        }
    }
}

/// One unit of work returned by a plan. The payload is meaningful only to
/// the worker that executes it; `candidate_hosts` lists the workers able to
/// run it, in the planner's preference order, and is non-empty for any task
/// from a successful plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub payload: Vec<u8>,
    pub candidate_hosts: Vec<HostPort>,
}

/// Result of a planning call. An empty task list is a valid plan that
/// produces no work units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanRequestResult {
    pub tasks: Vec<Task>,
}

/// Column names and row count for one catalog table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableInfo {
    pub columns: Vec<String>,
    pub row_count: u64,
}

/// Requests understood by the cluster daemons. Each daemon answers the
/// subset it implements and rejects the rest.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Handshake {
        version: u32,
    },

    // state-store
    Register {
        member: MemberInfo,
    },
    ListMembers {
        service: ServiceKind,
    },

    // catalog
    GetTable {
        db: String,
        table: String,
    },
    FetchRows {
        db: String,
        table: String,
        column: String,
        offset: u64,
        limit: u64,
    },

    // worker planning service
    Plan {
        params: PlanRequestParams,
    },
    GetSchema {
        params: PlanRequestParams,
    },

    // worker data service
    Fetch {
        payload: Vec<u8>,
        /// Empty on the first call; thereafter the `next_cursor` from the
        /// previous batch.
        cursor: Vec<u8>,
    },
}

/// Responses to [`Request`]s.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Response {
    HandshakeOk {
        version: u32,
    },
    Ok,
    Members {
        members: Vec<HostPort>,
    },
    Table {
        info: TableInfo,
    },
    Rows {
        values: Vec<Vec<u8>>,
    },
    Plan {
        result: PlanRequestResult,
    },
    Schema {
        columns: Vec<String>,
    },
    Batch {
        records: Vec<Vec<u8>>,
        next_cursor: Vec<u8>,
        exhausted: bool,
    },

    /// Request-level rejection: the daemon understood the request but could
    /// not serve it (unknown table, malformed statement, bad payload).
    Rejected {
        message: String,
    },
}

/// Decoded form of the opaque task payload produced by the worker planning
/// service and consumed by the worker data service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub db: String,
    pub table: String,
    pub column: String,
    pub row_count: u64,
}

impl TaskPayload {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("task payload serializes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_payload_round_trips() {
        let payload = TaskPayload {
            db: "tpch".to_string(),
            table: "nation".to_string(),
            column: "n_name".to_string(),
            row_count: 25,
        };
        let decoded = TaskPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn member_endpoint_lookup() {
        let member = MemberInfo {
            planning: Some(HostPort::new("127.0.0.1", 1000)),
            data: None,
            catalog: None,
        };
        assert_eq!(
            member.endpoint(ServiceKind::Planning).unwrap().port,
            1000
        );
        assert!(member.endpoint(ServiceKind::Data).is_none());
    }
}
