//! Pattern command: list every match of a single pattern in a module image.

use std::path::Path;

use anyhow::{Context, Result};
use pd2hook_core::{BufferRegion, CodeRegion, Pattern, find_all};

/// Run the pattern command, returning the number of matches
pub fn run(module: &Path, pattern: &str, base: usize, limit: usize) -> Result<usize> {
    let pattern: Pattern = pattern.parse()?;
    let region = BufferRegion::from_file(module, base)
        .with_context(|| format!("Failed to read module image {:?}", module))?;

    let matches = find_all(region.bytes(), &pattern);

    println!("Pattern: {}", pattern);
    println!("Matches: {}", matches.len());
    for pos in matches.iter().take(limit) {
        println!("  0x{:X} (+0x{:X})", base.wrapping_add(*pos), pos);
    }
    if matches.len() > limit {
        println!("  ... {} more", matches.len() - limit);
    }

    Ok(matches.len())
}
