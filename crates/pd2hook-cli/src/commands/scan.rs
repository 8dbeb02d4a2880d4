//! Scan command: resolve a signature definition file against a module image.

use std::path::Path;

use anyhow::{Context, Result, bail};
use owo_colors::OwoColorize;
use pd2hook_core::{BufferRegion, HookRuntime, SearchReport, load_signatures};

pub struct ScanOptions<'a> {
    pub module: &'a Path,
    pub signatures: &'a Path,
    pub base: usize,
    pub require_all: bool,
    pub json: bool,
}

/// Run the scan command
pub fn run(runtime: &HookRuntime, options: &ScanOptions) -> Result<()> {
    let set = load_signatures(options.signatures)
        .with_context(|| format!("Failed to load signatures from {:?}", options.signatures))?;
    let region = BufferRegion::from_file(options.module, options.base)
        .with_context(|| format!("Failed to read module image {:?}", options.module))?;

    runtime.register_set(&set)?;
    let report = runtime.search_in(&region)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &set.version);
    }

    let missing = report.unresolved().count();
    if options.require_all && missing > 0 {
        bail!(
            "{} of {} signatures unresolved",
            missing,
            report.entries.len()
        );
    }

    Ok(())
}

fn print_report(report: &SearchReport, version: &str) {
    if !version.is_empty() {
        println!("Signature set: {}", version);
    }
    println!(
        "Module: base 0x{:X}, size 0x{:X}",
        report.base_address, report.size
    );
    println!();

    let width = report
        .entries
        .iter()
        .map(|entry| entry.name.len())
        .max()
        .unwrap_or(0);

    for entry in &report.entries {
        match entry.address {
            Some(address) => println!(
                "  {:<width$}  {}  (+0x{:X})",
                entry.name,
                format!("0x{:X}", address).green(),
                address.wrapping_sub(report.base_address),
                width = width
            ),
            None => println!(
                "  {:<width$}  {}  [{}]",
                entry.name,
                "not found".red(),
                entry.pattern,
                width = width
            ),
        }
    }

    println!();
    println!(
        "Resolved {}/{}",
        report.resolved_count(),
        report.entries.len()
    );
}
