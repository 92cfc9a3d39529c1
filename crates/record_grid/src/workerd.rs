//! Worker daemon: planning service and data-fetch service.
//!
//! A worker can run either service or both, per startup flags. The planning
//! service turns the one supported statement shape into a single task whose
//! payload names the table slice to read and whose candidate list is every
//! registered data service, local worker first. The data service drains
//! that payload in bounded batches, with the cursor encoding the next row
//! offset.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};

use crate::catalogd;
use crate::conn;
use crate::proto::{
    HostPort, MemberInfo, PlanRequestParams, PlanRequestResult, Request, RequestType, Response,
    ServiceKind, Task, TaskPayload, PROTOCOL_VERSION,
};
use crate::statestored;

/// Rows per fetch batch unless overridden; small enough that the reference
/// 25-row workload takes several cursor round-trips.
pub const DEFAULT_FETCH_BATCH_ROWS: u64 = 10;

/// Startup configuration for one worker daemon.
pub struct WorkerdConfig {
    pub statestore: SocketAddr,
    pub catalog: SocketAddr,
    pub listen_planning: Option<SocketAddr>,
    pub listen_data: Option<SocketAddr>,
    pub fetch_batch_rows: u64,
}

struct WorkerShared {
    statestore: SocketAddr,
    catalog: SocketAddr,
    fetch_batch_rows: u64,
    /// This worker's own data endpoint, preferred first in candidate lists.
    self_data: Option<HostPort>,
}

/// Run the worker daemon until the process is killed.
pub async fn run(config: WorkerdConfig) -> anyhow::Result<()> {
    let planning_listener = match config.listen_planning {
        Some(addr) => Some(
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("workerd failed to bind planning {addr}"))?,
        ),
        None => None,
    };
    let data_listener = match config.listen_data {
        Some(addr) => Some(
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("workerd failed to bind data {addr}"))?,
        ),
        None => None,
    };

    let to_host_port = |addr: SocketAddr| HostPort::new(addr.ip().to_string(), addr.port());
    statestored::register_member(
        config.statestore,
        MemberInfo {
            planning: config.listen_planning.map(to_host_port),
            data: config.listen_data.map(to_host_port),
            catalog: None,
        },
    )
    .await?;
    tracing::info!(
        planning = ?config.listen_planning,
        data = ?config.listen_data,
        statestore = %config.statestore,
        catalog = %config.catalog,
        "workerd registered and listening"
    );

    let shared = Arc::new(WorkerShared {
        statestore: config.statestore,
        catalog: config.catalog,
        fetch_batch_rows: config.fetch_batch_rows.max(1),
        self_data: config.listen_data.map(to_host_port),
    });

    tokio::try_join!(
        maybe_serve(planning_listener, shared.clone(), serve_planning_conn),
        maybe_serve(data_listener, shared, serve_data_conn),
    )?;
    Ok(())
}

/// Accept loop for one optional service. A disabled service parks forever
/// so the enabled one keeps the daemon alive.
async fn maybe_serve<F, Fut>(
    listener: Option<TcpListener>,
    shared: Arc<WorkerShared>,
    serve_conn: F,
) -> anyhow::Result<()>
where
    F: Fn(TcpStream, Arc<WorkerShared>) -> Fut + Copy + Send + 'static,
    Fut: std::future::Future<Output = std::io::Result<()>> + Send + 'static,
{
    let Some(listener) = listener else {
        std::future::pending::<()>().await;
        unreachable!();
    };
    loop {
        let (stream, peer) = listener.accept().await?;
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_conn(stream, shared).await {
                tracing::debug!(%peer, error = %err, "workerd connection ended");
            }
        });
    }
}

async fn serve_planning_conn(
    mut stream: TcpStream,
    shared: Arc<WorkerShared>,
) -> std::io::Result<()> {
    while let Some(req) = conn::read_request(&mut stream).await? {
        let resp = match req {
            Request::Handshake { .. } => Response::HandshakeOk {
                version: PROTOCOL_VERSION,
            },
            Request::Plan { params } => plan(&shared, &params).await,
            Request::GetSchema { params } => get_schema(&shared, &params).await,
            other => Response::Rejected {
                message: format!("planning service does not serve {other:?}"),
            },
        };
        conn::write_response(&mut stream, &resp).await?;
    }
    Ok(())
}

async fn serve_data_conn(mut stream: TcpStream, shared: Arc<WorkerShared>) -> std::io::Result<()> {
    while let Some(req) = conn::read_request(&mut stream).await? {
        let resp = match req {
            Request::Handshake { .. } => Response::HandshakeOk {
                version: PROTOCOL_VERSION,
            },
            Request::Fetch { payload, cursor } => fetch_batch(&shared, &payload, &cursor).await,
            other => Response::Rejected {
                message: format!("data service does not serve {other:?}"),
            },
        };
        conn::write_response(&mut stream, &resp).await?;
    }
    Ok(())
}

/// Plan one request. Rejections are deterministic and never retried by
/// clients, so every failure path carries a specific message.
async fn plan(shared: &WorkerShared, params: &PlanRequestParams) -> Response {
    let RequestType::Sql { statement } = &params.request_type;
    let stmt = match parse_select(statement) {
        Ok(stmt) => stmt,
        Err(message) => return Response::Rejected { message },
    };

    let info = match catalogd::get_table(shared.catalog, &stmt.db, &stmt.table).await {
        Ok(info) => info,
        Err(err) => {
            return Response::Rejected {
                message: format!("cannot resolve {}.{}: {err}", stmt.db, stmt.table),
            }
        }
    };
    if !info.columns.contains(&stmt.column) {
        return Response::Rejected {
            message: format!("unknown column {} in {}.{}", stmt.column, stmt.db, stmt.table),
        };
    }
    if info.row_count == 0 {
        // A plan over an empty table is valid and produces no work units.
        return Response::Plan {
            result: PlanRequestResult { tasks: Vec::new() },
        };
    }

    let mut candidates = match statestored::list_members(shared.statestore, ServiceKind::Data).await
    {
        Ok(candidates) => candidates,
        Err(err) => {
            return Response::Rejected {
                message: format!("cannot list data services: {err}"),
            }
        }
    };
    if candidates.is_empty() {
        return Response::Rejected {
            message: "no data services registered".to_string(),
        };
    }
    // Prefer the local data service, keeping the rest in registration order.
    if let Some(local) = &shared.self_data {
        if let Some(pos) = candidates.iter().position(|c| c == local) {
            candidates.rotate_left(pos);
        }
    }

    let payload = TaskPayload {
        db: stmt.db,
        table: stmt.table,
        column: stmt.column,
        row_count: info.row_count,
    };
    tracing::debug!(row_count = info.row_count, candidates = candidates.len(), "planned request");
    Response::Plan {
        result: PlanRequestResult {
            tasks: vec![Task {
                payload: payload.encode(),
                candidate_hosts: candidates,
            }],
        },
    }
}

async fn get_schema(shared: &WorkerShared, params: &PlanRequestParams) -> Response {
    let RequestType::Sql { statement } = &params.request_type;
    let stmt = match parse_select(statement) {
        Ok(stmt) => stmt,
        Err(message) => return Response::Rejected { message },
    };
    let info = match catalogd::get_table(shared.catalog, &stmt.db, &stmt.table).await {
        Ok(info) => info,
        Err(err) => {
            return Response::Rejected {
                message: format!("cannot resolve {}.{}: {err}", stmt.db, stmt.table),
            }
        }
    };
    if !info.columns.contains(&stmt.column) {
        return Response::Rejected {
            message: format!("unknown column {} in {}.{}", stmt.column, stmt.db, stmt.table),
        };
    }
    Response::Schema {
        columns: vec![stmt.column],
    }
}

/// Serve one fetch batch for a task payload at the given cursor.
async fn fetch_batch(shared: &WorkerShared, payload: &[u8], cursor: &[u8]) -> Response {
    let task = match TaskPayload::decode(payload) {
        Ok(task) => task,
        Err(err) => {
            return Response::Rejected {
                message: format!("bad task payload: {err}"),
            }
        }
    };
    let offset = match decode_cursor(cursor) {
        Ok(offset) => offset,
        Err(message) => return Response::Rejected { message },
    };
    if offset >= task.row_count {
        return Response::Batch {
            records: Vec::new(),
            next_cursor: Vec::new(),
            exhausted: true,
        };
    }

    let limit = shared.fetch_batch_rows.min(task.row_count - offset);
    let records = match catalogd::fetch_rows(
        shared.catalog,
        &task.db,
        &task.table,
        &task.column,
        offset,
        limit,
    )
    .await
    {
        Ok(records) => records,
        Err(err) => {
            return Response::Rejected {
                message: format!("cannot read rows: {err}"),
            }
        }
    };
    let next = offset + records.len() as u64;
    let exhausted = next >= task.row_count;
    Response::Batch {
        records,
        next_cursor: if exhausted {
            Vec::new()
        } else {
            next.to_string().into_bytes()
        },
        exhausted,
    }
}

struct SelectStmt {
    db: String,
    table: String,
    column: String,
}

/// Parse the one supported statement shape:
/// `select <column> from <db>.<table>`. Anything else is a plan rejection.
fn parse_select(statement: &str) -> Result<SelectStmt, String> {
    let tokens: Vec<&str> = statement.split_whitespace().collect();
    match tokens.as_slice() {
        [select, column, from, qualified]
            if select.eq_ignore_ascii_case("select") && from.eq_ignore_ascii_case("from") =>
        {
            let (db, table) = qualified
                .split_once('.')
                .ok_or_else(|| format!("table must be db-qualified: {qualified}"))?;
            if db.is_empty() || table.is_empty() || column.is_empty() {
                return Err(format!("unsupported statement: {statement:?}"));
            }
            Ok(SelectStmt {
                db: db.to_string(),
                table: table.to_string(),
                column: column.to_string(),
            })
        }
        _ => Err(format!(
            "unsupported statement: {statement:?} (expected `select <column> from <db>.<table>`)"
        )),
    }
}

/// The cursor is the decimal row offset; empty means "from the start".
fn decode_cursor(cursor: &[u8]) -> Result<u64, String> {
    if cursor.is_empty() {
        return Ok(0);
    }
    std::str::from_utf8(cursor)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("bad cursor: {cursor:?}"))
}
