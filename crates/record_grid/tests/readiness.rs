//! Integration tests for the protocol-level readiness gate.
//!
//! Accepting a TCP connection is not readiness; a daemon is ready only once
//! it answers the protocol handshake on every advertised port.

mod common;

use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use common::{cleanup_dir, new_cluster};
use record_grid::readiness;

#[tokio::test(flavor = "multi_thread")]
async fn accepting_socket_without_handshake_is_not_ready() {
    // A plain listener accepts connections but never speaks the protocol.
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let result = readiness::wait_until_ready(&[addr], Duration::from_secs(2)).await;
    assert_eq!(result, Err(addr));
}

#[tokio::test(flavor = "multi_thread")]
async fn unbound_port_is_not_ready() {
    // Bind then drop, so the port is free and connections are refused.
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let result = readiness::wait_until_ready(&[addr], Duration::from_millis(500)).await;
    assert_eq!(result, Err(addr));
}

#[tokio::test(flavor = "multi_thread")]
async fn running_daemon_passes_even_with_zero_timeout() {
    let (mut cluster, dir) = new_cluster("readiness-zero");
    cluster.start_statestored().await.expect("statestored");
    let addr = cluster
        .statestored()
        .and_then(|h| h.service_addr())
        .expect("statestore addr");

    // Zero timeout still gets exactly one probe attempt per address.
    let result = readiness::wait_until_ready(&[addr], Duration::ZERO).await;
    assert_eq!(result, Ok(()));

    let dead: SocketAddr = "127.0.0.1:1".parse().unwrap();
    let result = readiness::wait_until_ready(&[addr, dead], Duration::ZERO).await;
    assert_eq!(result, Err(dead));

    cleanup_dir(&dir);
}
