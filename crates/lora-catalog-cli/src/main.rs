//! LoRA Catalog CLI - scan and migrate entry points.
//!
//! Both commands are safe to re-run. A fatal catalog error (failed migration,
//! database failure) exits non-zero; per-file problems only show up in the
//! summary counts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lora_catalog::{CatalogApi, CatalogConfig, MigrationReport, ScanOptions, ScanProgress};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "lora-catalog")]
#[command(about = "Index LoRA model files into a searchable SQLite catalog")]
struct Args {
    /// Model root directory (defaults to the configured root, then the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Catalog database path (defaults to <root>/__lora_catalog.sqlite)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON config file (defaults to <config dir>/lora-catalog/config.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the root and bring the catalog up to date
    Scan {
        /// Remove entries whose file no longer exists
        #[arg(long)]
        prune: bool,

        /// Changed files per committed batch
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Apply pending schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG wins over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = resolve_config(&args)?;
    info!("Catalog root: {}", config.root.display());

    // Opening migrates, so `migrate` only has to report the result
    let api = CatalogApi::open(config.clone())
        .await
        .with_context(|| format!("Failed to open catalog at {}", config.db_path().display()))?;

    match args.command {
        Command::Migrate => {
            println!("{}", migration_line(api.migration_report()));
        }
        Command::Scan { prune, batch_size } => {
            let mut options = ScanOptions::from_config(&config);
            options.prune_missing |= prune;
            if let Some(size) = batch_size {
                options.batch_size = size.max(1);
            }

            let summary = api
                .scan_with(
                    options,
                    Some(|p: ScanProgress| {
                        info!(
                            "Progress: {}/{} ({} skipped, {} failed)",
                            p.done, p.total, p.skipped, p.failed
                        );
                    }),
                )
                .await
                .context("Scan aborted")?;

            if summary.failed > 0 {
                warn!("{} files could not be indexed", summary.failed);
            }
            println!(
                "total={} updated={} skipped={} failed={} hashed={} removed={} elapsed_ms={}",
                summary.total,
                summary.updated,
                summary.skipped,
                summary.failed,
                summary.hashed,
                summary.removed,
                summary.elapsed_ms
            );
        }
    }

    Ok(())
}

fn migration_line(report: &MigrationReport) -> String {
    let applied: Vec<String> = report.applied.iter().map(u32::to_string).collect();
    format!(
        "from=V{} to=V{} applied=[{}]",
        report.from,
        report.to,
        applied.join(",")
    )
}

/// Config file, then command-line overrides.
fn resolve_config(args: &Args) -> Result<CatalogConfig> {
    let config_path = args.config.clone().or_else(default_config_path);

    let mut config = match config_path {
        Some(path) if args.config.is_some() || path.is_file() => CatalogConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        _ => CatalogConfig::default(),
    };

    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if config.root.as_os_str().is_empty() {
        config.root = std::env::current_dir().context("Failed to read current directory")?;
    }
    if let Some(db) = &args.db {
        config.db_path = Some(db.clone());
    }

    config.validate()?;
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| config_file_in(&dir))
}

fn config_file_in(dir: &Path) -> PathBuf {
    dir.join("lora-catalog").join("config.json")
}
