//! Hang analysis CLI.
//!
//! Provides the `hangscan` binary. `analyze` runs the hang analysis over a
//! captured JSON snapshot and prints the findings; `validate` only loads and
//! checks the snapshot.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::Level;

use hangscan_analysis::{analyze, AnalysisConfig, TraversalContext};
use hangscan_snapshot::SnapshotStore;

/// Hang analysis for stalled multi-chip dataflow systems.
#[derive(Parser)]
#[command(name = "hangscan", about = "Find the streams responsible for a hang")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a snapshot for hangs.
    Analyze {
        /// Path to the snapshot JSON file.
        #[arg(short, long, env = "HANGSCAN_SNAPSHOT")]
        snapshot: PathBuf,

        /// Increase trace output (-v summaries, -vv steps, -vvv everything).
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,

        /// Shuffle the starting streams with this seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Print the report as JSON instead of text.
        #[arg(long)]
        json: bool,

        /// Do not log progress over the candidate streams.
        #[arg(long)]
        no_progress: bool,
    },
    /// Load a snapshot and check its topology without analyzing it.
    Validate {
        /// Path to the snapshot JSON file.
        #[arg(short, long, env = "HANGSCAN_SNAPSHOT")]
        snapshot: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Analyze {
            snapshot,
            verbose,
            seed,
            json,
            no_progress,
        } => {
            init_tracing(verbose);
            let config = AnalysisConfig {
                verbosity: verbose,
                shuffle_seed: seed,
                progress: !no_progress,
            };
            run_analyze(&snapshot, config, json)
        }
        Commands::Validate { snapshot } => {
            init_tracing(0);
            run_validate(&snapshot)
        }
    };
    process::exit(exit_code);
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

/// Execute the analyze subcommand.
///
/// Returns exit code: 0 = no hang found, 1 = hang or cycle reported,
/// 2 = analysis error, 3 = snapshot error.
fn run_analyze(path: &Path, config: AnalysisConfig, json: bool) -> i32 {
    let store = match SnapshotStore::load_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to load snapshot '{}': {}", path.display(), e);
            return 3;
        }
    };

    let report = match analyze(&store, &store, &store, config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Analysis error: {}", e);
            return 2;
        }
    };

    if json {
        let out = serde_json::to_string_pretty(&report)
            .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize report: {}\"}}", e));
        println!("{}", out);
    } else {
        print!("{}", report.render_text());
    }

    if report.found_hang() {
        1
    } else {
        0
    }
}

/// Execute the validate subcommand. Exit codes as for `analyze`, with 0 for
/// a usable snapshot.
fn run_validate(path: &Path) -> i32 {
    let store = match SnapshotStore::load_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: invalid snapshot '{}': {}", path.display(), e);
            return 3;
        }
    };

    let config = AnalysisConfig {
        progress: false,
        ..Default::default()
    };
    let ctx = match TraversalContext::new(&store, &store, &store, config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };

    let snapshot = store.snapshot();
    println!(
        "{}: {} chips, {} ethernet links, {} epochs, {} stream records, {} candidate streams",
        path.display(),
        snapshot.chips.len(),
        snapshot.ethernet_connections.len(),
        snapshot.epochs.len(),
        store.stream_record_count(),
        ctx.candidates().len()
    );
    0
}
