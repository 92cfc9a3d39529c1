//! Table metadata and row service daemon.
//!
//! Serves schema lookups and bounded row reads over the built-in dataset.
//! The catalog registers itself with the state-store before accepting
//! requests, so a catalog that passes the readiness probe is already a
//! cluster member.

use std::net::SocketAddr;

use anyhow::{anyhow, Context};
use tokio::net::{TcpListener, TcpStream};

use crate::conn::{self, Conn, CALL_TIMEOUT, CONNECT_TIMEOUT};
use crate::dataset;
use crate::proto::{HostPort, MemberInfo, Request, Response, TableInfo, PROTOCOL_VERSION};
use crate::statestored;

/// Run the catalog daemon until the process is killed.
pub async fn run(listen: SocketAddr, statestore: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("catalogd failed to bind {listen}"))?;

    statestored::register_member(
        statestore,
        MemberInfo {
            planning: None,
            data: None,
            catalog: Some(HostPort::new(listen.ip().to_string(), listen.port())),
        },
    )
    .await?;
    tracing::info!(%listen, %statestore, "catalogd registered and listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(err) = serve_conn(stream).await {
                tracing::debug!(%peer, error = %err, "catalogd connection ended");
            }
        });
    }
}

async fn serve_conn(mut stream: TcpStream) -> std::io::Result<()> {
    while let Some(req) = conn::read_request(&mut stream).await? {
        let resp = match req {
            Request::Handshake { .. } => Response::HandshakeOk {
                version: PROTOCOL_VERSION,
            },
            Request::GetTable { db, table } => match dataset::lookup(&db, &table) {
                Some(t) => Response::Table { info: t.info() },
                None => Response::Rejected {
                    message: format!("unknown table {db}.{table}"),
                },
            },
            Request::FetchRows {
                db,
                table,
                column,
                offset,
                limit,
            } => match dataset::lookup(&db, &table) {
                Some(t) => match t.column_slice(&column, offset, limit) {
                    Some(values) => Response::Rows { values },
                    None => Response::Rejected {
                        message: format!("unknown column {column} in {db}.{table}"),
                    },
                },
                None => Response::Rejected {
                    message: format!("unknown table {db}.{table}"),
                },
            },
            other => Response::Rejected {
                message: format!("catalogd does not serve {other:?}"),
            },
        };
        conn::write_response(&mut stream, &resp).await?;
    }
    Ok(())
}

/// Resolve a table's schema and row count. `Err` covers both transport
/// failures and catalog-side rejections; the message tells them apart.
pub async fn get_table(catalog: SocketAddr, db: &str, table: &str) -> anyhow::Result<TableInfo> {
    let mut conn = open(catalog).await?;
    match conn
        .call(&Request::GetTable {
            db: db.to_string(),
            table: table.to_string(),
        })
        .await?
    {
        Response::Table { info } => Ok(info),
        Response::Rejected { message } => Err(anyhow!(message)),
        other => Err(anyhow!("unexpected get_table response: {other:?}")),
    }
}

/// Read one bounded slice of a column's values.
pub async fn fetch_rows(
    catalog: SocketAddr,
    db: &str,
    table: &str,
    column: &str,
    offset: u64,
    limit: u64,
) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut conn = open(catalog).await?;
    match conn
        .call(&Request::FetchRows {
            db: db.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            offset,
            limit,
        })
        .await?
    {
        Response::Rows { values } => Ok(values),
        Response::Rejected { message } => Err(anyhow!(message)),
        other => Err(anyhow!("unexpected fetch_rows response: {other:?}")),
    }
}

async fn open(catalog: SocketAddr) -> anyhow::Result<Conn> {
    let mut conn = Conn::open(catalog, CONNECT_TIMEOUT, CALL_TIMEOUT).await?;
    conn.handshake().await?;
    Ok(conn)
}
