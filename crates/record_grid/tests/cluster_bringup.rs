//! Integration tests for full-cluster bring-up and the plan/fetch protocol.
//!
//! These tests spawn real daemon processes from the record-grid binary:
//! one statestored, one catalogd, and three workers, then drive the
//! two-phase protocol end to end against the built-in `tpch.nation` table.

mod common;

use std::collections::HashSet;

use common::{bring_up, cleanup_dir, new_cluster};
use record_grid::dataset::NATION_NAMES;
use record_grid::proto::{PlanRequestParams, ServiceKind};
use record_grid::statestored;
use record_grid::{
    fetch_all, ClusterPhase, ClusterStartError, DaemonKind, FetchSession, PlanError, PlannerClient,
};

const NATION_QUERY: &str = "select n_name from tpch.nation";

#[tokio::test(flavor = "multi_thread")]
async fn three_worker_cluster_plans_and_fetches_all_records() {
    let (mut cluster, dir) = new_cluster("bringup-e2e");
    bring_up(&mut cluster, 3).await;
    assert_eq!(cluster.phase(), ClusterPhase::WorkersRunning);

    // Every advertised port across all daemons is pairwise distinct.
    let mut ports = HashSet::new();
    let mut handles = vec![
        cluster.statestored().expect("statestored handle"),
        cluster.catalogd().expect("catalogd handle"),
    ];
    handles.extend(cluster.workers());
    for handle in handles {
        for addr in handle.advertised_addrs() {
            assert!(ports.insert(addr.port()), "port {addr} assigned twice");
        }
    }

    let planning = cluster.workers()[0]
        .planning_addr()
        .expect("worker planning addr");
    let mut planner = PlannerClient::connect(planning).await.expect("connect");

    let result = planner
        .plan_request(&PlanRequestParams::sql(NATION_QUERY))
        .await
        .expect("plan");
    assert_eq!(result.tasks.len(), 1);
    let task = &result.tasks[0];
    assert_eq!(task.candidate_hosts.len(), 3, "one candidate per worker");

    let records = fetch_all(task).await.expect("fetch");
    assert_eq!(records.len(), 25);
    let names: HashSet<&[u8]> = records.iter().map(Vec::as_slice).collect();
    for nation in NATION_NAMES {
        assert!(names.contains(nation.as_bytes()), "missing {nation}");
    }

    // A fetch starts its own cursor; draining the same task twice yields
    // the same records.
    let again = fetch_all(task).await.expect("second fetch");
    assert_eq!(again, records);

    cluster.shutdown();
    assert_eq!(cluster.phase(), ClusterPhase::Stopped);
    cleanup_dir(&dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn get_schema_names_the_selected_column() {
    let (mut cluster, dir) = new_cluster("bringup-schema");
    bring_up(&mut cluster, 1).await;

    let planning = cluster.workers()[0].planning_addr().expect("planning addr");
    let mut planner = PlannerClient::connect(planning).await.expect("connect");
    let schema = planner
        .get_schema(&PlanRequestParams::sql(NATION_QUERY))
        .await
        .expect("schema");
    assert_eq!(schema, vec!["n_name".to_string()]);

    cleanup_dir(&dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_and_unknown_statements_are_rejected() {
    let (mut cluster, dir) = new_cluster("bringup-reject");
    bring_up(&mut cluster, 1).await;

    let planning = cluster.workers()[0].planning_addr().expect("planning addr");
    let mut planner = PlannerClient::connect(planning).await.expect("connect");

    for statement in [
        "not even sql",
        "select n_name from nowhere.nation",
        "select bogus_column from tpch.nation",
    ] {
        let err = planner
            .plan_request(&PlanRequestParams::sql(statement))
            .await
            .expect_err(statement);
        assert!(
            matches!(err, PlanError::Rejected { .. }),
            "{statement}: {err}"
        );
    }

    // Rejection leaves the connection usable; a good plan still succeeds.
    planner
        .plan_request(&PlanRequestParams::sql(NATION_QUERY))
        .await
        .expect("plan after rejection");

    cleanup_dir(&dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn statestore_tracks_every_registered_service() {
    let (mut cluster, dir) = new_cluster("bringup-members");
    bring_up(&mut cluster, 2).await;

    let statestore = cluster
        .statestored()
        .and_then(|h| h.service_addr())
        .expect("statestore addr");

    let planning = statestored::list_members(statestore, ServiceKind::Planning)
        .await
        .expect("list planning");
    assert_eq!(planning.len(), 2);

    let data = statestored::list_members(statestore, ServiceKind::Data)
        .await
        .expect("list data");
    assert_eq!(data.len(), 2);

    let catalog = statestored::list_members(statestore, ServiceKind::Catalog)
        .await
        .expect("list catalog");
    assert_eq!(catalog.len(), 1);
    assert_eq!(
        catalog[0].port,
        cluster.catalogd().unwrap().service_port().unwrap()
    );

    cleanup_dir(&dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn planning_only_worker_is_never_a_fetch_candidate() {
    let (mut cluster, dir) = new_cluster("bringup-roles");
    cluster.start_statestored().await.expect("statestored");
    cluster.start_catalogd().await.expect("catalogd");
    cluster
        .start_worker_with_roles(true, false)
        .await
        .expect("planning-only worker");
    cluster
        .start_worker_with_roles(false, true)
        .await
        .expect("data-only worker");

    let planning = cluster.workers()[0].planning_addr().expect("planning addr");
    assert!(cluster.workers()[0].data_addr().is_none());
    assert!(cluster.workers()[1].planning_addr().is_none());
    let data_port = cluster.workers()[1].data_port().expect("data port");

    let mut planner = PlannerClient::connect(planning).await.expect("connect");
    let result = planner
        .plan_request(&PlanRequestParams::sql(NATION_QUERY))
        .await
        .expect("plan");
    let task = &result.tasks[0];
    assert_eq!(task.candidate_hosts.len(), 1);
    assert_eq!(task.candidate_hosts[0].port, data_port);

    let session = FetchSession::open(task).await.expect("open session");
    assert_eq!(session.chosen_host().port, data_port);
    let records = fetch_all(task).await.expect("fetch");
    assert_eq!(records.len(), 25);

    cleanup_dir(&dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_requires_a_running_catalog() {
    let (mut cluster, dir) = new_cluster("bringup-no-catalog");
    cluster.start_statestored().await.expect("statestored");

    // State-store alone is not enough; the worker needs the catalog too.
    let err = cluster.start_worker().await.expect_err("must fail");
    assert!(
        matches!(
            err,
            ClusterStartError::MissingDependency {
                daemon: DaemonKind::Worker,
                required: DaemonKind::Catalog,
            }
        ),
        "{err}"
    );
    assert!(cluster.workers().is_empty());
    assert_eq!(cluster.phase(), ClusterPhase::StateStoreRunning);

    cleanup_dir(&dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_table_plans_to_an_empty_task_list() {
    let (mut cluster, dir) = new_cluster("bringup-empty-plan");
    bring_up(&mut cluster, 1).await;

    let planning = cluster.workers()[0].planning_addr().expect("planning addr");
    let mut planner = PlannerClient::connect(planning).await.expect("connect");
    let result = planner
        .plan_request(&PlanRequestParams::sql("select value from test.empty"))
        .await
        .expect("plan");
    assert!(result.tasks.is_empty(), "empty table produced work units");

    cleanup_dir(&dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_starts_return_the_running_daemon() {
    let (mut cluster, dir) = new_cluster("bringup-idempotent");
    cluster.start_statestored().await.expect("statestored");
    let first_pid = cluster.statestored().unwrap().pid();
    cluster.start_statestored().await.expect("second start");
    assert_eq!(cluster.statestored().unwrap().pid(), first_pid);

    cluster.start_catalogd().await.expect("catalogd");
    let catalog_pid = cluster.catalogd().unwrap().pid();
    cluster.start_catalogd().await.expect("second catalogd");
    assert_eq!(cluster.catalogd().unwrap().pid(), catalog_pid);

    cleanup_dir(&dir);
}
