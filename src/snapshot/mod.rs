pub mod filename;
pub mod inventory;
pub mod pruner;

pub use filename::{
    format_full_name, format_incremental_name, parse_local_filename, ParsedSnapshotName,
};
pub use inventory::{newest_full, newest_slot, list_snapshots, LocalSnapshotFile};
pub use pruner::prune;
