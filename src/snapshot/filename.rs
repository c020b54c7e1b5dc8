//! Snapshot filename grammar
//!
//! This is the only module that knows how snapshot archives are named.
//! On-disk names are matched anchored; redirect Location values from probes
//! are matched unanchored because they may carry a path prefix.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::LazyLock;

static FULL_ANCHORED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^snapshot-(\d+)-[A-Za-z0-9]+\.tar\.(zst|bz2|gz)$").unwrap());
static INCREMENTAL_ANCHORED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^incremental-snapshot-(\d+)-(\d+)-[A-Za-z0-9]+\.tar\.(zst|bz2|gz)$").unwrap()
});
static FULL_SEARCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"snapshot-(\d+)-[A-Za-z0-9]+\.tar\.(zst|bz2|gz)").unwrap());
static INCREMENTAL_SEARCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"incremental-snapshot-(\d+)-(\d+)-[A-Za-z0-9]+\.tar\.(zst|bz2|gz)").unwrap()
});
static TEMP_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.(tmp|partial)$").unwrap());

/// Slots extracted from a snapshot filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedSnapshotName {
    Full { slot: u64 },
    Incremental { base_slot: u64, slot: u64 },
}

impl ParsedSnapshotName {
    pub fn slot(&self) -> u64 {
        match self {
            Self::Full { slot } => *slot,
            Self::Incremental { slot, .. } => *slot,
        }
    }

    pub fn base_slot(&self) -> u64 {
        match self {
            Self::Full { .. } => 0,
            Self::Incremental { base_slot, .. } => *base_slot,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

/// Classify an on-disk filename. Names that match neither pattern (including
/// uncompressed `.tar` archives) return None.
pub fn parse_local_filename(name: &str) -> Option<ParsedSnapshotName> {
    // Incremental first: a full-pattern search would also match inside an
    // incremental name, but anchoring makes the order irrelevant. Kept
    // explicit for clarity.
    if let Some(caps) = INCREMENTAL_ANCHORED_RE.captures(name) {
        let base_slot = caps[1].parse().ok()?;
        let slot = caps[2].parse().ok()?;
        return Some(ParsedSnapshotName::Incremental { base_slot, slot });
    }
    if let Some(caps) = FULL_ANCHORED_RE.captures(name) {
        let slot = caps[1].parse().ok()?;
        return Some(ParsedSnapshotName::Full { slot });
    }
    None
}

/// Parse a probed filename (typically the last segment of a redirect
/// Location) against the expected kind, unanchored.
pub fn parse_probed_filename(name: &str, expect_incremental: bool) -> Result<ParsedSnapshotName> {
    if expect_incremental {
        let caps = INCREMENTAL_SEARCH_RE.captures(name).ok_or_else(|| {
            anyhow!("filename {:?} does not match incremental snapshot pattern", name)
        })?;
        let base_slot = caps[1]
            .parse()
            .map_err(|e| anyhow!("invalid base slot in {:?}: {}", name, e))?;
        let slot = caps[2]
            .parse()
            .map_err(|e| anyhow!("invalid slot in {:?}: {}", name, e))?;
        Ok(ParsedSnapshotName::Incremental { base_slot, slot })
    } else {
        let caps = FULL_SEARCH_RE
            .captures(name)
            .ok_or_else(|| anyhow!("filename {:?} does not match full snapshot pattern", name))?;
        let slot = caps[1]
            .parse()
            .map_err(|e| anyhow!("invalid slot in {:?}: {}", name, e))?;
        Ok(ParsedSnapshotName::Full { slot })
    }
}

/// Whether a filename is an in-flight or abandoned partial download.
pub fn is_temp_filename(name: &str) -> bool {
    TEMP_SUFFIX_RE.is_match(name)
}

pub fn format_full_name(slot: u64, hash: &str, ext: &str) -> String {
    format!("snapshot-{}-{}.tar.{}", slot, hash, ext)
}

pub fn format_incremental_name(base_slot: u64, slot: u64, hash: &str, ext: &str) -> String {
    format!("incremental-snapshot-{}-{}-{}.tar.{}", base_slot, slot, hash, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_round_trips() {
        for ext in ["zst", "bz2", "gz"] {
            let name = format_full_name(250000000, "7Rv9qX2", ext);
            let parsed = parse_local_filename(&name).unwrap();
            assert_eq!(parsed, ParsedSnapshotName::Full { slot: 250000000 });
            assert!(parsed.is_full());
            assert_eq!(parsed.base_slot(), 0);
        }
    }

    #[test]
    fn incremental_name_round_trips() {
        let name = format_incremental_name(250000000, 250000500, "AbC123", "zst");
        let parsed = parse_local_filename(&name).unwrap();
        assert_eq!(
            parsed,
            ParsedSnapshotName::Incremental {
                base_slot: 250000000,
                slot: 250000500,
            }
        );
        assert_eq!(parsed.slot(), 250000500);
        assert_eq!(parsed.base_slot(), 250000000);
    }

    #[test]
    fn uncompressed_archives_rejected() {
        assert!(parse_local_filename("snapshot-100-Hash.tar").is_none());
        assert!(parse_local_filename("incremental-snapshot-100-200-Hash.tar").is_none());
    }

    #[test]
    fn unknown_names_rejected() {
        assert!(parse_local_filename("genesis.tar.bz2").is_none());
        assert!(parse_local_filename("snapshot-abc-Hash.tar.zst").is_none());
        assert!(parse_local_filename("notes.txt").is_none());
        // anchored: path prefixes do not classify on disk
        assert!(parse_local_filename("/downloads/snapshot-100-Hash.tar.zst").is_none());
    }

    #[test]
    fn probed_names_accept_path_prefixes() {
        let parsed = parse_probed_filename("/snapshot-100-Hash.tar.zst", false).unwrap();
        assert_eq!(parsed, ParsedSnapshotName::Full { slot: 100 });

        let parsed =
            parse_probed_filename("/incremental-snapshot-100-200-Hash.tar.zst", true).unwrap();
        assert_eq!(
            parsed,
            ParsedSnapshotName::Incremental {
                base_slot: 100,
                slot: 200,
            }
        );
    }

    #[test]
    fn probed_kind_mismatch_is_an_error() {
        assert!(parse_probed_filename("snapshot-100-Hash.tar.zst", true).is_err());
        assert!(parse_probed_filename("incremental-snapshot-100-200-Hash.tar.zst", false).is_err());
    }

    #[test]
    fn temp_suffixes_detected() {
        assert!(is_temp_filename("snapshot-100-Hash.tar.zst.tmp"));
        assert!(is_temp_filename("anything.partial"));
        assert!(!is_temp_filename("snapshot-100-Hash.tar.zst"));
    }
}
