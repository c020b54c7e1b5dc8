//! Local snapshot directory inventory

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::filename::{is_temp_filename, parse_local_filename};

/// A snapshot archive found in the local snapshot directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSnapshotFile {
    pub path: PathBuf,
    pub slot: u64,
    pub base_slot: u64,
    pub is_full: bool,
}

/// Everything of interest in the snapshot directory.
#[derive(Debug, Default)]
pub struct Inventory {
    pub snapshots: Vec<LocalSnapshotFile>,
    pub temp_files: Vec<PathBuf>,
}

/// List the snapshot directory, non-recursive, files only. Unreadable entries
/// and names matching neither snapshot pattern are skipped; temp files are
/// tracked separately so the pruner can delete them.
pub fn scan_directory(dir: &Path) -> Result<Inventory> {
    let mut inventory = Inventory::default();

    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if is_temp_filename(name) {
            inventory.temp_files.push(path);
            continue;
        }

        if let Some(parsed) = parse_local_filename(name) {
            inventory.snapshots.push(LocalSnapshotFile {
                path,
                slot: parsed.slot(),
                base_slot: parsed.base_slot(),
                is_full: parsed.is_full(),
            });
        }
    }

    Ok(inventory)
}

/// The snapshot archives in the directory, temp files excluded.
pub fn list_snapshots(dir: &Path) -> Result<Vec<LocalSnapshotFile>> {
    Ok(scan_directory(dir)?.snapshots)
}

/// The highest slot across all snapshots, 0 when there are none.
pub fn newest_slot(snapshots: &[LocalSnapshotFile]) -> u64 {
    snapshots.iter().map(|s| s.slot).max().unwrap_or(0)
}

/// The full snapshot with the highest slot, if any.
pub fn newest_full(snapshots: &[LocalSnapshotFile]) -> Option<&LocalSnapshotFile> {
    snapshots.iter().filter(|s| s.is_full).max_by_key(|s| s.slot)
}
