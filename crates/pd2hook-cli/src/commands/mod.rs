//! CLI command implementations.

pub mod pattern;
pub mod pump;
pub mod scan;

use anyhow::Result;

/// Parse a hex address string (with or without 0x prefix)
pub fn parse_hex_address(s: &str) -> Result<usize> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    usize::from_str_radix(s, 16).map_err(|e| anyhow::anyhow!("Invalid hex address: {}", e))
}
