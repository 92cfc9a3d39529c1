//! Cluster membership daemon.
//!
//! The state-store is the first daemon up. Every other daemon registers its
//! service endpoints here at startup, and the worker planning service asks
//! it which data services exist when building a task's candidate list.
//! Membership is in-memory and insertion-ordered; re-registering an
//! endpoint replaces the previous record.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time;

use crate::conn::{self, Conn, CALL_TIMEOUT, CONNECT_TIMEOUT};
use crate::proto::{HostPort, MemberInfo, Request, Response, ServiceKind, PROTOCOL_VERSION};

/// How often a registering daemon retries while the state-store is still
/// coming up, and how many times.
const REGISTER_ATTEMPTS: usize = 100;
const REGISTER_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Membership {
    members: Vec<MemberInfo>,
}

impl Membership {
    fn register(&mut self, member: MemberInfo) {
        self.members.retain(|existing| !overlaps(existing, &member));
        self.members.push(member);
    }

    fn endpoints(&self, service: ServiceKind) -> Vec<HostPort> {
        self.members
            .iter()
            .filter_map(|m| m.endpoint(service).cloned())
            .collect()
    }
}

/// Two registrations describe the same daemon if any endpoint matches.
fn overlaps(a: &MemberInfo, b: &MemberInfo) -> bool {
    let same = |x: &Option<HostPort>, y: &Option<HostPort>| match (x, y) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    };
    same(&a.planning, &b.planning) || same(&a.data, &b.data) || same(&a.catalog, &b.catalog)
}

/// Run the state-store daemon until the process is killed.
pub async fn run(listen: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("statestored failed to bind {listen}"))?;
    tracing::info!(%listen, "statestored listening");

    let membership = Arc::new(Mutex::new(Membership::default()));
    loop {
        let (stream, peer) = listener.accept().await?;
        let membership = membership.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_conn(stream, membership).await {
                tracing::debug!(%peer, error = %err, "statestored connection ended");
            }
        });
    }
}

async fn serve_conn(
    mut stream: TcpStream,
    membership: Arc<Mutex<Membership>>,
) -> std::io::Result<()> {
    while let Some(req) = conn::read_request(&mut stream).await? {
        let resp = match req {
            Request::Handshake { .. } => Response::HandshakeOk {
                version: PROTOCOL_VERSION,
            },
            Request::Register { member } => {
                tracing::info!(
                    planning = ?member.planning,
                    data = ?member.data,
                    catalog = ?member.catalog,
                    "member registered"
                );
                membership.lock().await.register(member);
                Response::Ok
            }
            Request::ListMembers { service } => Response::Members {
                members: membership.lock().await.endpoints(service),
            },
            other => Response::Rejected {
                message: format!("statestored does not serve {other:?}"),
            },
        };
        conn::write_response(&mut stream, &resp).await?;
    }
    Ok(())
}

/// Register a member with the state-store, retrying while it is still
/// coming up. Bounded; exhausting the retries is a startup failure.
pub async fn register_member(statestore: SocketAddr, member: MemberInfo) -> anyhow::Result<()> {
    let mut last_err = None;
    for _ in 0..REGISTER_ATTEMPTS {
        match try_register(statestore, &member).await {
            Ok(()) => return Ok(()),
            Err(err) => last_err = Some(err),
        }
        time::sleep(REGISTER_RETRY_INTERVAL).await;
    }
    Err(last_err.unwrap_or_else(|| anyhow!("no register attempt was made")))
        .with_context(|| format!("failed to register with statestored at {statestore}"))
}

async fn try_register(statestore: SocketAddr, member: &MemberInfo) -> anyhow::Result<()> {
    let mut conn = Conn::open(statestore, CONNECT_TIMEOUT, CALL_TIMEOUT).await?;
    conn.handshake().await?;
    match conn
        .call(&Request::Register {
            member: member.clone(),
        })
        .await?
    {
        Response::Ok => Ok(()),
        other => Err(anyhow!("unexpected register response: {other:?}")),
    }
}

/// Fetch the registered endpoints for one service kind.
pub async fn list_members(
    statestore: SocketAddr,
    service: ServiceKind,
) -> anyhow::Result<Vec<HostPort>> {
    let mut conn = Conn::open(statestore, CONNECT_TIMEOUT, CALL_TIMEOUT).await?;
    conn.handshake().await?;
    match conn.call(&Request::ListMembers { service }).await? {
        Response::Members { members } => Ok(members),
        other => Err(anyhow!("unexpected list_members response: {other:?}")),
    }
}
