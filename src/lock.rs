//! Single-instance lock over the snapshot directory
//!
//! A PID file, not an OS lock: good enough for single-host coordination, and
//! stale locks from dead processes are silently reclaimed.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::constants;

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    started_at: String,
}

pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn new(snapshot_dir: &Path) -> Self {
        Self {
            path: snapshot_dir.join(constants::files::LOCK_FILENAME),
        }
    }

    /// Take the lock, overwriting a stale one. Fails when another live
    /// process holds it.
    pub fn acquire(&self) -> Result<()> {
        if let Ok(data) = std::fs::read_to_string(&self.path) {
            if let Ok(info) = serde_json::from_str::<LockInfo>(&data) {
                if is_process_alive(info.pid) {
                    return Err(anyhow!(
                        "another instance is running (PID: {}, started: {})",
                        info.pid,
                        info.started_at
                    ));
                }
                warn!(stale_pid = info.pid, "stale lock file found, overwriting");
            }
        }

        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now().to_rfc3339(),
        };
        let data = serde_json::to_string_pretty(&info)?;
        std::fs::write(&self.path, data)
            .map_err(|e| anyhow!("writing lock file {}: {}", self.path.display(), e))?;

        debug!(path = %self.path.display(), pid = info.pid, "lock acquired");
        Ok(())
    }

    /// Remove the lock file. A missing file is not an error.
    pub fn release(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "lock released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(path = %self.path.display(), error = %e, "failed to remove lock file"),
        }
    }
}

/// Signal 0 tests for existence without delivering anything.
fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Positive, fits in pid_t, far above any real pid_max.
    const DEAD_PID: u32 = 0x7FFF_FFF0;

    #[test]
    fn acquire_writes_lock_file() {
        let dir = TempDir::new().unwrap();
        let lock = InstanceLock::new(dir.path());

        lock.acquire().unwrap();

        let data =
            std::fs::read_to_string(dir.path().join(constants::files::LOCK_FILENAME)).unwrap();
        let info: LockInfo = serde_json::from_str(&data).unwrap();
        assert_eq!(info.pid, std::process::id());

        lock.release();
        assert!(!dir.path().join(constants::files::LOCK_FILENAME).exists());
    }

    #[test]
    fn live_pid_blocks_acquisition() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join(constants::files::LOCK_FILENAME);

        // Our own pid is certainly alive.
        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now().to_rfc3339(),
        };
        std::fs::write(&lock_path, serde_json::to_string(&info).unwrap()).unwrap();

        let lock = InstanceLock::new(dir.path());
        let err = lock.acquire().unwrap_err();
        assert!(err.to_string().contains("another instance is running"));
    }

    #[test]
    fn stale_pid_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join(constants::files::LOCK_FILENAME);

        let info = LockInfo {
            pid: DEAD_PID,
            started_at: Utc::now().to_rfc3339(),
        };
        std::fs::write(&lock_path, serde_json::to_string(&info).unwrap()).unwrap();

        let lock = InstanceLock::new(dir.path());
        lock.acquire().unwrap();

        let data = std::fs::read_to_string(&lock_path).unwrap();
        let info: LockInfo = serde_json::from_str(&data).unwrap();
        assert_eq!(info.pid, std::process::id());
    }

    #[test]
    fn unparseable_lock_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join(constants::files::LOCK_FILENAME);
        std::fs::write(&lock_path, "not json").unwrap();

        let lock = InstanceLock::new(dir.path());
        lock.acquire().unwrap();
    }

    #[test]
    fn release_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let lock = InstanceLock::new(dir.path());
        lock.release();
    }
}
