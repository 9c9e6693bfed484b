//! # quote-shards CLI (`qshard`)
//!
//! Generates the static shard tree and its manifests, and checks an
//! existing tree for consistency.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qshard generate --source S --output O` | Plan, write, publish, emit manifests |
//! | `qshard generate … --dry-run` | Print the per-space plan without writing |
//! | `qshard verify --output O` | Check coverage, widths, digests, manifests |
//!
//! ## Examples
//!
//! ```bash
//! # Generate from a local sentence bundle
//! qshard generate --source ./sentences-bundle --output ./dist
//!
//! # Generate from a bundle served over HTTP, with a custom layout
//! qshard --config ./qshard.toml generate --source https://example.org/bundle --output ./dist
//!
//! # Check what was published
//! qshard verify --output ./dist
//! ```
//!
//! Exit status is non-zero on any failure; the error kind and the failing
//! space are printed on stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use quote_shards::config::{self, Config};
use quote_shards::error::GenerateError;
use quote_shards::generate::{self, GenerateOptions, GenerateSummary};
use quote_shards::progress::ProgressMode;
use quote_shards::verify;

/// quote-shards — plan and write an edge-addressable static shard tree for
/// a quotation corpus.
#[derive(Parser)]
#[command(
    name = "qshard",
    about = "Plan and write an edge-addressable static shard tree for a quotation corpus",
    version,
    long_about = "qshard splits a quotation corpus into one file per fixed-width hex address, \
    globally and per category, so an edge rewrite rule can serve a random quote by taking a \
    prefix of a random id. It also writes rules.txt (address width per space) and \
    categories.json."
)]
struct Cli {
    /// Path to a configuration file (TOML). Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show info-level logs (honours RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Suppress all logs.
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shards and manifests.
    ///
    /// Every space is staged first and published only when all of them
    /// succeed, and a failed publish is rolled back. A failed run leaves the
    /// previous output and its manifests in place.
    Generate {
        /// Corpus location: a bundle directory, a JSON file, or an http(s) URL.
        #[arg(long)]
        source: String,

        /// Output directory.
        #[arg(long)]
        output: PathBuf,

        /// Plan only — print widths and counts without writing.
        #[arg(long)]
        dry_run: bool,

        /// Number of spaces written concurrently.
        #[arg(long)]
        jobs: Option<usize>,

        /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Check an output tree against its manifests.
    Verify {
        /// Output directory to check.
        #[arg(long)]
        output: PathBuf,
    },
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.quiet {
        tracing_subscriber::EnvFilter::new("off")
    } else if cli.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    } else {
        tracing_subscriber::EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        report_error(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = match &cli.config {
        Some(path) => {
            config::load_config(path).map_err(|e| GenerateError::config(format!("{:#}", e)))?
        }
        None => Config::default(),
    };

    match cli.command {
        Commands::Generate {
            source,
            output,
            dry_run,
            jobs,
            progress,
        } => {
            if jobs == Some(0) {
                return Err(GenerateError::config("--jobs must be >= 1").into());
            }
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let opts = GenerateOptions { dry_run, jobs };
            let summary = generate::run_generate(&cfg, &source, &output, &opts, reporter).await?;
            print_summary(&summary);
        }
        Commands::Verify { output } => {
            let report = verify::verify_output(&cfg, &output)?;
            if !report.is_ok() {
                for problem in &report.problems {
                    eprintln!("  {}", problem);
                }
                anyhow::bail!(
                    "verify {}: {} problem(s) in {} spaces",
                    output.display(),
                    report.problems.len(),
                    report.spaces
                );
            }
            println!(
                "verify {}: ok ({} spaces, {} files)",
                output.display(),
                report.spaces,
                report.files
            );
        }
    }

    Ok(())
}

fn print_summary(summary: &GenerateSummary) {
    if summary.dry_run {
        println!("generate (dry-run)");
    } else {
        println!("generate");
    }
    println!(
        "  {:<8} {:<20} {:>6} {:>8} {:>10}",
        "SPACE", "PATH", "WIDTH", "COUNT", "FILES"
    );
    for space in &summary.spaces {
        println!(
            "  {:<8} {:<20} {:>6} {:>8} {:>10}",
            space.space, space.path, space.width, space.count, space.capacity
        );
    }
    if !summary.dry_run {
        println!("ok");
    }
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<GenerateError>() {
        Some(gen) => match gen.space() {
            Some(space) => eprintln!("error: {} in space '{}': {}", gen.kind(), space, gen),
            None => eprintln!("error: {}: {}", gen.kind(), gen),
        },
        None => eprintln!("error: {:#}", err),
    }
}
