//! Shared helpers for integration tests.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use record_grid::{MiniCluster, MiniClusterConfig};

/// Locate the record-grid binary built by cargo.
pub fn record_grid_bin() -> PathBuf {
    if let Some(bin) = std::env::var_os("CARGO_BIN_EXE_record-grid") {
        return PathBuf::from(bin);
    }
    let root = find_repo_root().unwrap_or_else(|| std::env::current_dir().unwrap());
    let exe = if cfg!(windows) {
        "record-grid.exe"
    } else {
        "record-grid"
    };
    let candidate = root.join("target").join("debug").join(exe);
    if candidate.exists() {
        return candidate;
    }
    panic!("record-grid binary not found; run `cargo build --bin record-grid` first");
}

/// Find the repo root by walking up until we see `.git`.
pub fn find_repo_root() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        if dir.join(".git").exists() {
            return Some(dir);
        }
        let parent = dir.parent()?.to_path_buf();
        if parent == dir {
            return None;
        }
        dir = parent;
    }
}

/// Build a per-test data directory under the repo's `.tmp/tests` folder.
pub fn test_dir(name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let pid = std::process::id();
    let root = find_repo_root().unwrap_or_else(std::env::temp_dir);
    root.join(".tmp")
        .join("tests")
        .join(format!("{name}-{pid}-{ts}"))
}

/// Best-effort cleanup of a test directory.
pub fn cleanup_dir(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

/// Build a cluster whose daemons log under a fresh per-test directory.
pub fn new_cluster(name: &str) -> (MiniCluster, PathBuf) {
    let dir = test_dir(name);
    let _ = std::fs::create_dir_all(&dir);
    let config = MiniClusterConfig::new(record_grid_bin(), dir.join("logs"));
    (MiniCluster::new(config), dir)
}

/// Start one state-store, one catalog, and `workers` full-role workers.
pub async fn bring_up(cluster: &mut MiniCluster, workers: usize) {
    cluster
        .start_statestored()
        .await
        .expect("start statestored");
    cluster.start_catalogd().await.expect("start catalogd");
    for _ in 0..workers {
        cluster.start_worker().await.expect("start worker");
    }
}
