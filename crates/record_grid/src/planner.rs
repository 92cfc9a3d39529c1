//! Client for the worker planning service.
//!
//! One connection, synchronous from the caller's perspective: `plan_request`
//! blocks until a response or a network-level failure. No retries happen
//! here; retry policy belongs to the caller.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::conn::{Conn, CALL_TIMEOUT, CONNECT_TIMEOUT};
use crate::error::{ConnectError, PlanError};
use crate::proto::{PlanRequestParams, PlanRequestResult, Request, Response};

pub struct PlannerClient {
    conn: Conn,
}

impl PlannerClient {
    /// Connect and handshake with default timeouts.
    pub async fn connect(addr: SocketAddr) -> Result<Self, PlanError> {
        Self::connect_with_timeouts(addr, CONNECT_TIMEOUT, CALL_TIMEOUT).await
    }

    pub async fn connect_with_timeouts(
        addr: SocketAddr,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, PlanError> {
        let mut conn = Conn::open(addr, connect_timeout, call_timeout).await?;
        conn.handshake().await.map_err(|err| map_io(addr, err))?;
        tracing::debug!(%addr, "connected to planning service");
        Ok(Self { conn })
    }

    /// Plan one request, returning the set of tasks to fetch.
    pub async fn plan_request(
        &mut self,
        params: &PlanRequestParams,
    ) -> Result<PlanRequestResult, PlanError> {
        let addr = self.conn.peer();
        let resp = self
            .conn
            .call(&Request::Plan {
                params: params.clone(),
            })
            .await
            .map_err(|err| map_io(addr, err))?;
        match resp {
            Response::Plan { result } => {
                // A successful plan never names a task without candidates.
                if result.tasks.iter().any(|t| t.candidate_hosts.is_empty()) {
                    return Err(PlanError::ProtocolMismatch {
                        message: "plan returned a task with no candidate hosts".to_string(),
                    });
                }
                Ok(result)
            }
            Response::Rejected { message } => Err(PlanError::Rejected { message }),
            other => Err(PlanError::ProtocolMismatch {
                message: format!("unexpected plan response: {other:?}"),
            }),
        }
    }

    /// Return the result schema (column names) for a request without
    /// planning it.
    pub async fn get_schema(
        &mut self,
        params: &PlanRequestParams,
    ) -> Result<Vec<String>, PlanError> {
        let addr = self.conn.peer();
        let resp = self
            .conn
            .call(&Request::GetSchema {
                params: params.clone(),
            })
            .await
            .map_err(|err| map_io(addr, err))?;
        match resp {
            Response::Schema { columns } => Ok(columns),
            Response::Rejected { message } => Err(PlanError::Rejected { message }),
            other => Err(PlanError::ProtocolMismatch {
                message: format!("unexpected get_schema response: {other:?}"),
            }),
        }
    }
}

fn map_io(addr: SocketAddr, err: io::Error) -> PlanError {
    match err.kind() {
        io::ErrorKind::InvalidData => PlanError::ProtocolMismatch {
            message: err.to_string(),
        },
        _ => PlanError::Unreachable(ConnectError::Unreachable { addr, source: err }),
    }
}
