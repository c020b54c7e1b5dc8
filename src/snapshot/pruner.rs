//! Snapshot directory pruning
//!
//! Runs after a successful cycle: keeps the newest full snapshot and the
//! newest incremental built on it, deletes everything else the keeper owns.

use anyhow::Result;
use std::path::Path;
use tracing::warn;

use super::inventory::scan_directory;

/// Prune the snapshot directory. Individual deletions are best-effort; a
/// failure to remove one file is logged and never aborts the pass.
pub fn prune(dir: &Path) -> Result<()> {
    let inventory = scan_directory(dir)?;

    for path in &inventory.temp_files {
        warn!(file = %path.display(), "removing temp file");
        remove_best_effort(path);
    }

    let mut fulls: Vec<_> = inventory.snapshots.iter().filter(|s| s.is_full).collect();
    if fulls.is_empty() {
        // Nothing to anchor incrementals against; leave them alone.
        return Ok(());
    }
    fulls.sort_by(|a, b| b.slot.cmp(&a.slot));

    let newest_full = fulls[0];
    for old in &fulls[1..] {
        warn!(file = %old.path.display(), slot = old.slot, "pruning old full snapshot");
        remove_best_effort(&old.path);
    }

    let mut incrementals: Vec<_> = inventory.snapshots.iter().filter(|s| !s.is_full).collect();
    incrementals.sort_by(|a, b| b.slot.cmp(&a.slot));

    let mut kept_incremental = false;
    for inc in incrementals {
        if inc.base_slot != newest_full.slot {
            warn!(
                file = %inc.path.display(),
                base_slot = inc.base_slot,
                newest_full_slot = newest_full.slot,
                "pruning orphaned incremental snapshot"
            );
            remove_best_effort(&inc.path);
        } else if kept_incremental {
            warn!(file = %inc.path.display(), "pruning older incremental snapshot");
            remove_best_effort(&inc.path);
        } else {
            kept_incremental = true;
        }
    }

    Ok(())
}

fn remove_best_effort(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(file = %path.display(), error = %e, "failed to remove file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) {
        std::fs::write(dir.path().join(name), b"data").unwrap();
    }

    fn exists(dir: &TempDir, name: &str) -> bool {
        dir.path().join(name).exists()
    }

    #[test]
    fn keeps_only_newest_full() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "snapshot-100-HashA.tar.zst");
        touch(&dir, "snapshot-200-HashB.tar.zst");
        touch(&dir, "snapshot-300-HashC.tar.zst");

        prune(dir.path()).unwrap();

        assert!(exists(&dir, "snapshot-300-HashC.tar.zst"));
        assert!(!exists(&dir, "snapshot-100-HashA.tar.zst"));
        assert!(!exists(&dir, "snapshot-200-HashB.tar.zst"));
    }

    #[test]
    fn removes_orphaned_and_older_incrementals() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "snapshot-100-HashA.tar.zst");
        touch(&dir, "snapshot-200-HashB.tar.zst");
        touch(&dir, "snapshot-300-HashC.tar.zst");
        touch(&dir, "incremental-snapshot-100-150-HashD.tar.zst");
        touch(&dir, "incremental-snapshot-200-250-HashE.tar.zst");
        touch(&dir, "incremental-snapshot-300-350-HashF.tar.zst");
        touch(&dir, "snapshot-250-HashG.tar.zst.tmp");

        prune(dir.path()).unwrap();

        assert!(exists(&dir, "snapshot-300-HashC.tar.zst"));
        assert!(exists(&dir, "incremental-snapshot-300-350-HashF.tar.zst"));
        assert!(!exists(&dir, "snapshot-100-HashA.tar.zst"));
        assert!(!exists(&dir, "snapshot-200-HashB.tar.zst"));
        assert!(!exists(&dir, "incremental-snapshot-100-150-HashD.tar.zst"));
        assert!(!exists(&dir, "incremental-snapshot-200-250-HashE.tar.zst"));
        assert!(!exists(&dir, "snapshot-250-HashG.tar.zst.tmp"));
    }

    #[test]
    fn keeps_only_newest_matching_incremental() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "snapshot-300-HashA.tar.zst");
        touch(&dir, "incremental-snapshot-300-350-HashB.tar.zst");
        touch(&dir, "incremental-snapshot-300-400-HashC.tar.zst");

        prune(dir.path()).unwrap();

        assert!(exists(&dir, "incremental-snapshot-300-400-HashC.tar.zst"));
        assert!(!exists(&dir, "incremental-snapshot-300-350-HashB.tar.zst"));
    }

    #[test]
    fn no_fulls_leaves_incrementals_alone() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "incremental-snapshot-100-150-HashA.tar.zst");

        prune(dir.path()).unwrap();

        assert!(exists(&dir, "incremental-snapshot-100-150-HashA.tar.zst"));
    }

    #[test]
    fn removes_temp_and_partial_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "snapshot-300-HashA.tar.zst");
        touch(&dir, "snapshot-200-HashB.tar.zst.tmp");
        touch(&dir, "something.partial");

        prune(dir.path()).unwrap();

        assert!(exists(&dir, "snapshot-300-HashA.tar.zst"));
        assert!(!exists(&dir, "snapshot-200-HashB.tar.zst.tmp"));
        assert!(!exists(&dir, "something.partial"));
    }

    #[test]
    fn prune_is_idempotent() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "snapshot-100-HashA.tar.zst");
        touch(&dir, "snapshot-300-HashB.tar.zst");
        touch(&dir, "incremental-snapshot-300-350-HashC.tar.zst");
        touch(&dir, "leftover.tmp");

        prune(dir.path()).unwrap();
        let after_first: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();

        prune(dir.path()).unwrap();
        let after_second: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();

        assert_eq!(after_first.len(), 2);
        assert_eq!(after_first.len(), after_second.len());
    }
}
