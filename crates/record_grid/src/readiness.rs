//! Bounded readiness probing for freshly started daemons.
//!
//! Daemon startup (binding listeners, joining the cluster) is asynchronous
//! relative to process creation, so a handle must not reach callers until
//! every advertised port answers a real protocol handshake. A bare TCP
//! accept is not enough; the probe succeeds only when the handshake
//! completes.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::time;

use crate::conn::Conn;

/// Fixed polling interval between probe attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bound for one probe's connect + handshake.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// One readiness probe against a single port.
pub async fn probe(addr: SocketAddr) -> bool {
    let Ok(mut conn) = Conn::open(addr, PROBE_TIMEOUT, PROBE_TIMEOUT).await else {
        return false;
    };
    conn.handshake().await.is_ok()
}

/// Poll every address until all answer the handshake or `timeout` elapses.
/// Returns the first address that never became ready. A zero timeout still
/// performs one probe per address, so an already-ready daemon passes.
pub async fn wait_until_ready(addrs: &[SocketAddr], timeout: Duration) -> Result<(), SocketAddr> {
    let deadline = Instant::now() + timeout;
    for &addr in addrs {
        loop {
            if probe(addr).await {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(addr);
            }
            time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }
    Ok(())
}
