use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pd2hook_core::HookRuntime;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::parse_hex_address;

#[derive(Parser)]
#[command(name = "pd2hook")]
#[command(about = "Signature scanning and event pump tools for pd2hook")]
struct Args {
    #[arg(short, long, global = true, default_value = "pd2hook.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve every signature of a definition file against a module image
    Scan {
        /// Module image on disk
        #[arg(short, long)]
        module: PathBuf,

        /// Signature definition file (JSON)
        #[arg(short, long)]
        signatures: PathBuf,

        /// Base address the image is assumed to be loaded at (hex)
        #[arg(short, long, default_value = "0")]
        base: String,

        /// Fail when any signature is unresolved
        #[arg(long)]
        require_all: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List every match of a single IDA-style pattern
    Pattern {
        /// Module image on disk
        #[arg(short, long)]
        module: PathBuf,

        /// Pattern such as "55 8B EC ?? ?? 83"
        pattern: String,

        /// Base address the image is assumed to be loaded at (hex)
        #[arg(short, long, default_value = "0")]
        base: String,

        /// Maximum number of matches to print
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Feed the event queues from worker threads and drain them per tick
    Pump {
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        #[arg(short, long, default_value_t = 1000)]
        events: usize,

        /// Tick interval in milliseconds
        #[arg(short, long, default_value_t = 16)]
        tick_ms: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let directive = if args.verbose {
        "pd2hook=debug"
    } else {
        "pd2hook=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let config = config::load_config(&args.config)?;
    let runtime = HookRuntime::new(config);

    match args.command {
        Command::Scan {
            module,
            signatures,
            base,
            require_all,
            json,
        } => {
            let options = commands::scan::ScanOptions {
                module: &module,
                signatures: &signatures,
                base: parse_hex_address(&base)?,
                require_all,
                json,
            };
            commands::scan::run(&runtime, &options)
        }
        Command::Pattern {
            module,
            pattern,
            base,
            limit,
        } => {
            let count = commands::pattern::run(&module, &pattern, parse_hex_address(&base)?, limit)?;
            info!("Pattern search finished with {} matches", count);
            Ok(())
        }
        Command::Pump {
            workers,
            events,
            tick_ms,
        } => {
            commands::pump::run(&runtime, workers, events, Duration::from_millis(tick_ms))?;
            Ok(())
        }
    }
}
