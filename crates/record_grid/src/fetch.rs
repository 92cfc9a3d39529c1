//! Worker client: drains one task's records with candidate failover.
//!
//! One logical data stream per task, fetched from exactly one worker per
//! attempt. Candidates are tried in the planner's preference order and a
//! connection failure advances to the next one; once a session is open,
//! batches arrive in worker order until the worker reports exhaustion. The
//! session's connection is closed on every exit path, including a caller
//! abandoning the stream early, because dropping the session drops its
//! socket.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::conn::{Conn, CALL_TIMEOUT, CONNECT_TIMEOUT};
use crate::error::FetchError;
use crate::proto::{HostPort, Request, Response, Task};

/// One record as served by a worker.
pub type Record = Vec<u8>;

/// Ephemeral per-task fetch state against one chosen worker.
#[derive(Debug)]
pub struct FetchSession {
    conn: Conn,
    payload: Vec<u8>,
    cursor: Vec<u8>,
    exhausted: bool,
    chosen: HostPort,
}

impl FetchSession {
    /// Open a session against the first reachable candidate host.
    pub async fn open(task: &Task) -> Result<Self, FetchError> {
        Self::open_with_timeouts(task, CONNECT_TIMEOUT, CALL_TIMEOUT).await
    }

    pub async fn open_with_timeouts(
        task: &Task,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, FetchError> {
        for candidate in &task.candidate_hosts {
            let Some(addr) = resolve(candidate).await else {
                tracing::debug!(%candidate, "candidate does not resolve, trying next");
                continue;
            };
            let mut conn = match Conn::open(addr, connect_timeout, call_timeout).await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::debug!(%candidate, error = %err, "candidate unreachable, trying next");
                    continue;
                }
            };
            match conn.handshake().await {
                Ok(_) => {
                    return Ok(Self {
                        conn,
                        payload: task.payload.clone(),
                        cursor: Vec::new(),
                        exhausted: false,
                        chosen: candidate.clone(),
                    });
                }
                // A version skew is deterministic; failing over would only
                // mask it.
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    return Err(FetchError::ProtocolMismatch {
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::debug!(%candidate, error = %err, "handshake failed, trying next");
                    continue;
                }
            }
        }
        Err(FetchError::AllCandidatesUnreachable {
            candidates: task.candidate_hosts.len(),
        })
    }

    /// The candidate this session ended up connected to.
    pub fn chosen_host(&self) -> &HostPort {
        &self.chosen
    }

    /// Whether the worker has reported the stream complete.
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next batch of records. Returns an empty batch once the
    /// stream is exhausted.
    pub async fn next_batch(&mut self) -> Result<Vec<Record>, FetchError> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        let addr = self.conn.peer();
        let resp = self
            .conn
            .call(&Request::Fetch {
                payload: self.payload.clone(),
                cursor: self.cursor.clone(),
            })
            .await
            .map_err(|err| map_io(addr, err))?;
        match resp {
            Response::Batch {
                records,
                next_cursor,
                exhausted,
            } => {
                self.cursor = next_cursor;
                self.exhausted = exhausted;
                Ok(records)
            }
            Response::Rejected { message } => Err(FetchError::ProtocolMismatch { message }),
            other => Err(FetchError::ProtocolMismatch {
                message: format!("unexpected fetch response: {other:?}"),
            }),
        }
    }
}

/// Drain every record for one task. Not restartable: a fresh call re-runs
/// candidate selection from the start of the list.
pub async fn fetch_all(task: &Task) -> Result<Vec<Record>, FetchError> {
    let mut session = FetchSession::open(task).await?;
    let mut records = Vec::new();
    while !session.exhausted() {
        records.extend(session.next_batch().await?);
    }
    Ok(records)
}

async fn resolve(candidate: &HostPort) -> Option<SocketAddr> {
    tokio::net::lookup_host((candidate.hostname.as_str(), candidate.port))
        .await
        .ok()?
        .next()
}

fn map_io(addr: SocketAddr, err: io::Error) -> FetchError {
    match err.kind() {
        io::ErrorKind::TimedOut => FetchError::Timeout { addr },
        _ => FetchError::ProtocolMismatch {
            message: err.to_string(),
        },
    }
}
