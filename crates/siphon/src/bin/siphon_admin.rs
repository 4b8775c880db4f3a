//! siphon-admin — operator tooling for the ingestion pipeline.
//!
//! Diagnoses and repairs divergence between file metadata and storage,
//! demotes abandoned `processing` records, and applies retention
//! cleanup. Every command is idempotent; the destructive ones are gated
//! behind explicit flags and confirmation.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use siphon::repair::{self, MissingFile};
use siphon::storage::StorageGateway;
use siphon::{Config, Database, StorageConfig};

#[derive(Debug, Parser)]
#[command(name = "siphon-admin", about = "Operator tooling for the siphon pipeline")]
struct Cli {
    /// Path to the pipeline config JSON. Overrides --db and --data-dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Metadata database path (default: ~/.siphon/data/siphon.db).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Storage root directory for the filesystem backend.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Report records whose bytes are missing from storage.
    CheckFiles(CheckFilesArgs),
    /// Fail `processing` records abandoned by a crashed worker.
    SweepStale(SweepStaleArgs),
    /// Delete completed records older than the retention window.
    Cleanup(CleanupArgs),
}

#[derive(Debug, Args)]
struct CheckFilesArgs {
    /// Check only records belonging to this owner.
    #[arg(long)]
    owner: Option<String>,

    /// Mark missing records as failed (instructs re-upload).
    #[arg(long)]
    fix: bool,

    /// Delete metadata records for missing files (destructive).
    #[arg(long)]
    delete: bool,

    /// Skip the interactive confirmation for --delete.
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Args)]
struct SweepStaleArgs {
    /// Consider `processing` records older than this many minutes stale.
    #[arg(long, default_value = "60")]
    older_than_mins: u64,
}

#[derive(Debug, Args)]
struct CleanupArgs {
    /// Delete completed records older than this many days.
    #[arg(long)]
    older_than_days: u64,

    /// Skip the interactive confirmation.
    #[arg(long)]
    yes: bool,
}

fn main() -> Result<()> {
    tracing_log::LogTracer::init().context("failed to install log bridge")?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let (db, storage) = open_environment(&cli)?;

    match cli.command {
        Commands::CheckFiles(args) => check_files(&db, &storage, args),
        Commands::SweepStale(args) => sweep_stale(&db, args),
        Commands::Cleanup(args) => cleanup(&db, &storage, args),
    }
}

fn open_environment(cli: &Cli) -> Result<(Database, Arc<dyn StorageGateway>)> {
    if let Some(config_path) = &cli.config {
        let config: Config = siphon::load_config(config_path)
            .with_context(|| format!("failed to load config {}", config_path.display()))?;
        let db_path = config
            .database_path
            .clone()
            .or_else(siphon::db::default_database_path)
            .context("no database path configured and no home directory found")?;
        let db = Database::open(&db_path)?;
        let storage = siphon::storage::from_config(&config.storage);
        return Ok((db, storage));
    }

    let db_path = cli
        .db
        .clone()
        .or_else(siphon::db::default_database_path)
        .context("no --db given and no home directory found")?;
    let data_dir = cli
        .data_dir
        .clone()
        .context("either --config or --data-dir is required")?;

    let db = Database::open(&db_path)?;
    let storage = siphon::storage::from_config(&StorageConfig::Filesystem { root: data_dir });
    Ok((db, storage))
}

fn check_files(
    db: &Database,
    storage: &Arc<dyn StorageGateway>,
    args: CheckFilesArgs,
) -> Result<()> {
    if args.fix && args.delete {
        bail!("--fix and --delete are mutually exclusive");
    }

    match &args.owner {
        Some(owner) => println!("Checking files for owner={}...", owner),
        None => println!("Checking all files..."),
    }

    let report = repair::scan(db, storage, args.owner.as_deref())?;
    if report.is_empty() {
        println!("All file records have bytes in storage.");
        return Ok(());
    }

    print_report(&report);

    if args.fix {
        let fixed = repair::apply_fix(db, &report)?;
        println!("Updated {} record(s) to failed.", fixed);
    } else if args.delete {
        if !args.yes && !confirm("This will permanently delete metadata records!")? {
            println!("Deletion cancelled.");
            return Ok(());
        }
        let deleted = repair::apply_delete(db, &report)?;
        println!("Deleted {} record(s).", deleted);
    } else {
        println!();
        println!("To mark these records as failed, run with --fix.");
        println!("To delete them from the database, run with --delete (destructive).");
    }

    Ok(())
}

fn print_report(report: &[MissingFile]) {
    println!("Found {} missing file(s):", report.len());

    let mut by_owner: BTreeMap<&str, Vec<&MissingFile>> = BTreeMap::new();
    for item in report {
        by_owner.entry(item.owner.as_str()).or_default().push(item);
    }

    for (owner, items) in by_owner {
        println!();
        println!("Owner {}: {} missing file(s)", owner, items.len());
        for item in items {
            println!(
                "  - {}: {} (status={}, reason={})",
                item.file_record_id, item.original_filename, item.status, item.reason
            );
            println!("    Key: {}", item.storage_key);
        }
    }
}

fn sweep_stale(db: &Database, args: SweepStaleArgs) -> Result<()> {
    let demoted = repair::sweep_stale(db, args.older_than_mins)?;
    if demoted.is_empty() {
        println!("No stale processing records.");
    } else {
        println!("Failed {} stale record(s):", demoted.len());
        for id in demoted {
            println!("  - {}", id);
        }
    }
    Ok(())
}

fn cleanup(db: &Database, storage: &Arc<dyn StorageGateway>, args: CleanupArgs) -> Result<()> {
    if !args.yes
        && !confirm(&format!(
            "This will delete completed records older than {} day(s) and their bytes!",
            args.older_than_days
        ))?
    {
        println!("Cleanup cancelled.");
        return Ok(());
    }

    let stats = repair::cleanup_completed(db, storage, args.older_than_days)?;
    println!(
        "Cleaned up {} record(s) and {} output(s).",
        stats.deleted_records, stats.deleted_outputs
    );
    Ok(())
}

fn confirm(warning: &str) -> Result<bool> {
    println!("WARNING: {}", warning);
    print!("Type 'yes' to confirm: ");
    std::io::stdout().flush()?;

    let mut response = String::new();
    std::io::stdin().read_line(&mut response)?;
    Ok(response.trim().eq_ignore_ascii_case("yes"))
}
