//! Runner integration tests: instance locking around cycles.

mod common;

use common::fixtures::test_config;
use std::sync::Arc;
use tempfile::TempDir;

use snapshot_keeper::lock::InstanceLock;
use snapshot_keeper::runner::Runner;

#[tokio::test]
async fn run_once_skips_when_lock_is_held() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), "http://127.0.0.1:1", "http://127.0.0.1:1");

    // Another "instance" (this process, so certainly alive) holds the lock.
    let other = InstanceLock::new(dir.path());
    other.acquire().unwrap();

    let runner = Runner::new(Arc::new(config));
    let err = runner.run_once().await.unwrap_err();
    assert!(err.to_string().contains("another instance is running"));

    other.release();
}

#[tokio::test]
async fn run_once_releases_the_lock_after_a_failed_cycle() {
    let dir = TempDir::new().unwrap();
    // Both RPCs unreachable: role degrades to unknown, then the cluster slot
    // fetch fails and the cycle errors out.
    let config = test_config(dir.path(), "http://127.0.0.1:1", "http://127.0.0.1:1");

    let runner = Runner::new(Arc::new(config));
    assert!(runner.run_once().await.is_err());

    // The lock must be gone even though the cycle failed.
    let lock = InstanceLock::new(dir.path());
    lock.acquire().unwrap();
    lock.release();
}
