//! # Rule Harvest CLI (`harvest`)
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest run` | Full run: discover, sync, categorize, validate, migrate, index |
//! | `harvest discover` | Search for new sources and merge them into the registry |
//! | `harvest sources` | List registered sources and their working-copy status |
//! | `harvest index` | Rebuild the corpus index from the corpus |
//! | `harvest stats` | Per-tag corpus statistics |
//! | `harvest check <path>` | Run the configured checker on one file |
//!
//! An interrupt (Ctrl-C) during `run` discards the staging directory and
//! exits with status 130. A second interrupt while in-flight work drains
//! abandons that work and exits 130 at once.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use rule_harvest::categorize::build_globset;
use rule_harvest::config;
use rule_harvest::error::HarvestError;
use rule_harvest::index::write_index;
use rule_harvest::logging::init_tracing;
use rule_harvest::pipeline::{Pipeline, RunReport};
use rule_harvest::progress::ProgressMode;
use rule_harvest::sources;
use rule_harvest::stats;
use rule_harvest::traits::Verdict;

const EXIT_INTERRUPTED: i32 = 130;

/// Rule Harvest: collect, deduplicate, validate and categorize detection
/// rules from many public repositories into one corpus.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Rule Harvest — aggregate detection rules from many repositories into one validated corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/harvest.toml`. Relative paths inside it are
    /// resolved against the file's own directory.
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    /// Progress output on stderr.
    #[arg(long, global = true, value_enum, default_value_t = ProgressMode::Auto)]
    progress: ProgressMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline.
    Run {
        /// Skip discovery and sync; re-process the existing working copies.
        #[arg(long)]
        skip_sync: bool,
    },

    /// Search for new sources and add them to the registry.
    Discover,

    /// List registered sources and whether their working copy exists.
    Sources,

    /// Rewrite the corpus index from the current corpus.
    Index,

    /// Show per-tag corpus statistics.
    Stats,

    /// Run the configured checker on a single file and print the verdict.
    Check {
        /// Rule file to check.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging)?;

    match cli.command {
        Commands::Run { skip_sync } => {
            let pipeline = Pipeline::new(cfg)?.with_reporter(Arc::from(cli.progress.reporter()));
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "cannot listen for interrupt");
                    std::future::pending::<()>().await;
                }
            };
            // Listener is registered only once the first interrupt is handled.
            let force = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };

            match pipeline.run_until_forced(skip_sync, shutdown, force).await {
                Ok(report) => print_report(&report),
                Err(HarvestError::Interrupted) => {
                    eprintln!("interrupted, staging discarded");
                    std::process::exit(EXIT_INTERRUPTED);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Discover => {
            let pipeline = Pipeline::new(cfg)?;
            let added = pipeline.discover_sources().await?;
            println!("{} new sources added to registry", added);
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Index => {
            let include = build_globset(&cfg.categorize.include_globs)?;
            let entries = write_index(&cfg.paths.corpus_dir, &cfg.paths.index, &include)?;
            println!("{} entries written to {}", entries, cfg.paths.index.display());
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
        Commands::Check { path } => {
            let pipeline = Pipeline::new(cfg)?;
            let verdict = pipeline.check_file(&path).await;
            let valid = verdict == Verdict::Valid;
            match verdict {
                Verdict::Valid => println!("valid: {}", path.display()),
                Verdict::Invalid { status } => println!(
                    "invalid: {} (exit status {})",
                    path.display(),
                    status.map(|s| s.to_string()).unwrap_or_else(|| "signal".to_string())
                ),
                Verdict::TimedOut => println!("timed out: {}", path.display()),
                Verdict::Failed(e) => println!("checker error: {}", e),
                Verdict::Cancelled => println!("cancelled"),
            }
            if !valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    if let Some(added) = report.discovered {
        println!("discover:   {} new sources", added);
    }
    if let Some(sync) = &report.sync {
        println!("sync:       {}", sync.summary());
        for (url, reason) in &sync.failures {
            println!("  failed: {} ({})", url, reason);
        }
    }
    println!("categorize: {}", report.categorize.summary());
    println!("validate:   {}", report.validation.summary());
    println!("migrate:    {}", report.migration.summary());
    println!("index:      {} entries", report.index_entries);
    println!("corpus files: {}", report.corpus_files);
}
