//! Human-readable size strings ("60mb", "1.5gb", "100kb")

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::LazyLock;

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(b|kb|mb|gb|tb)?\s*$").unwrap());

/// Parse a size string into bytes. Units are base 1024. A missing unit means
/// megabytes, matching the convention used for the download speed floor.
pub fn parse_size(s: &str) -> Result<u64> {
    let caps = SIZE_RE
        .captures(s)
        .ok_or_else(|| anyhow!("invalid size {:?} (expected format: \"60mb\", \"100kb\", \"1gb\")", s))?;

    let value: f64 = caps[1]
        .parse()
        .map_err(|e| anyhow!("invalid size number {:?}: {}", &caps[1], e))?;

    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    let multiplier: f64 = match unit.as_str() {
        "tb" => 1024f64.powi(4),
        "gb" => 1024f64.powi(3),
        "mb" | "" => 1024f64.powi(2),
        "kb" => 1024.0,
        _ => 1.0, // "b"
    };

    Ok((value * multiplier) as u64)
}

/// Format a byte count as a human-readable string.
pub fn format_size(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_units() {
        assert_eq!(parse_size("100b").unwrap(), 100);
        assert_eq!(parse_size("100kb").unwrap(), 100 * 1024);
        assert_eq!(parse_size("60mb").unwrap(), 60 * 1024 * 1024);
        assert_eq!(parse_size("1gb").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1tb").unwrap(), 1024u64.pow(4));
    }

    #[test]
    fn missing_unit_means_megabytes() {
        assert_eq!(parse_size("60").unwrap(), 60 * 1024 * 1024);
    }

    #[test]
    fn accepts_fractions_case_and_whitespace() {
        assert_eq!(parse_size("1.5gb").unwrap(), (1.5 * 1024f64.powi(3)) as u64);
        assert_eq!(parse_size(" 60 MB ").unwrap(), 60 * 1024 * 1024);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("60pb").is_err());
        assert!(parse_size("-5mb").is_err());
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(60 * 1024 * 1024), "60.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 / 2), "1.5 GB");
    }
}
