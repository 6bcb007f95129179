//! # Codex Sync CLI (`codex`)
//!
//! Thin command surface over the `codex_sync` library: every command loads
//! the config, calls one library entry point, and prints a summary.
//!
//! ## Usage
//!
//! ```bash
//! codex --config ./config/codex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codex init` | Create the SQLite database and run schema migrations |
//! | `codex fetch <url>` | Fetch one page through the cache |
//! | `codex rules` | Ingest the core rules document |
//! | `codex faction <slug>` | Ingest a faction page and index its datasheets |
//! | `codex units <slug>` | Scrape pending datasheets of a faction |
//! | `codex validate <slug>` | Check that a faction's URLs are live |
//! | `codex snapshot save\|list\|diff\|check` | Snapshot and drift auditing |
//! | `codex cache stats\|clear\|invalidate` | Page cache maintenance |
//! | `codex stats` | Store statistics |
//!
//! Logging goes to stderr and is controlled by `CODEX_LOG` (an `EnvFilter`
//! directive), falling back to `--verbose` / `--quiet`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use codex_sync::cache::CacheStore;
use codex_sync::config::{self, Config};
use codex_sync::{db, ingest, migrate, snapshot, stats};

/// Codex Sync: scrape, extract, and reconcile a tabletop ruleset.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/codex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "codex",
    about = "Scrape, extract, and reconcile a hierarchical tabletop ruleset into SQLite",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/codex.toml")]
    config: PathBuf,

    /// Log progress (info level) to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Only log errors.
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Fetch one URL through the cache and describe the result.
    Fetch {
        url: String,
        /// Bypass the cache and refetch.
        #[arg(long)]
        force: bool,
    },

    /// Ingest the core rules document.
    Rules {
        /// Bypass the cache and refetch.
        #[arg(long)]
        force: bool,
    },

    /// Ingest a faction page: army rules, detachments, stratagems,
    /// enhancements, and its datasheet index.
    Faction {
        /// Faction slug as used in the source URL (e.g. `necrons`).
        slug: String,
        /// Bypass the cache and refetch.
        #[arg(long)]
        force: bool,
    },

    /// Scrape pending datasheets from a faction's unit index.
    Units {
        /// Faction slug.
        slug: String,
        /// Maximum number of datasheets to process.
        #[arg(long)]
        limit: Option<usize>,
        /// Also retry entries that failed before.
        #[arg(long)]
        retry_failed: bool,
        /// Bypass the cache and refetch.
        #[arg(long)]
        force: bool,
    },

    /// Check that a faction page and its indexed datasheets are reachable.
    Validate {
        /// Faction slug.
        slug: String,
    },

    /// Save, list, and compare store snapshots.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Inspect or clear the page cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show store statistics.
    Stats,
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Capture the live store under a new name.
    Save { name: String },
    /// List saved snapshots, oldest first.
    List,
    /// Compare two saved snapshots, or one against the live store.
    Diff {
        before: String,
        /// Defaults to the live store.
        after: Option<String>,
    },
    /// Compare a snapshot (default: the newest) with the live store and
    /// exit non-zero on drift.
    Check { name: Option<String> },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry counts and size.
    Stats,
    /// Remove every cached page.
    Clear,
    /// Remove the cached page for one URL.
    Invalidate { url: String },
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("codex error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Fetch { url, force } => ingest::run_fetch(&cfg, &url, force).await?,
        Commands::Rules { force } => ingest::run_rules(&cfg, force).await?,
        Commands::Faction { slug, force } => ingest::run_faction(&cfg, &slug, force).await?,
        Commands::Units {
            slug,
            limit,
            retry_failed,
            force,
        } => ingest::run_units(&cfg, &slug, limit, retry_failed, force).await?,
        Commands::Validate { slug } => ingest::run_validate(&cfg, &slug).await?,
        Commands::Snapshot { action } => run_snapshot(&cfg, action).await?,
        Commands::Cache { action } => run_cache(&cfg, action)?,
        Commands::Stats => stats::run_stats(&cfg).await?,
    }

    Ok(())
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "info"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("CODEX_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

async fn run_snapshot(cfg: &Config, action: SnapshotAction) -> Result<()> {
    let dir = &cfg.snapshots.dir;
    match action {
        SnapshotAction::Save { name } => {
            let pool = db::connect(cfg).await?;
            let snap = snapshot::capture(&pool, &name).await?;
            pool.close().await;
            let path = snapshot::save(dir, &snap)?;
            println!("snapshot {} saved", name);
            println!("  factions: {}", snap.factions.len());
            println!("  path: {}", path.display());
        }
        SnapshotAction::List => {
            let infos = snapshot::list(dir)?;
            if infos.is_empty() {
                println!("No snapshots in {}", dir.display());
            }
            for info in infos {
                println!(
                    "  {:<24} {}  {} factions",
                    info.name,
                    info.taken_at.format("%Y-%m-%d %H:%M"),
                    info.factions
                );
            }
        }
        SnapshotAction::Diff { before, after } => {
            let old = snapshot::load(dir, &before)?;
            let diff = match after {
                Some(after) => snapshot::diff(&old, &snapshot::load(dir, &after)?),
                None => {
                    let pool = db::connect(cfg).await?;
                    let diff = snapshot::diff_live(&pool, &old).await?;
                    pool.close().await;
                    diff
                }
            };
            print!("{}", snapshot::render_diff(&diff));
        }
        SnapshotAction::Check { name } => {
            let name = match name {
                Some(name) => name,
                None => snapshot::list(dir)?
                    .pop()
                    .map(|info| info.name)
                    .ok_or_else(|| anyhow::anyhow!("No snapshots in {}", dir.display()))?,
            };
            let old = snapshot::load(dir, &name)?;
            let pool = db::connect(cfg).await?;
            let diff = snapshot::diff_live(&pool, &old).await?;
            pool.close().await;
            print!("{}", snapshot::render_diff(&diff));
            if !diff.is_empty() {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

fn run_cache(cfg: &Config, action: CacheAction) -> Result<()> {
    let cache = CacheStore::new(&cfg.cache.dir);
    match action {
        CacheAction::Stats => {
            let s = cache.stats()?;
            println!("cache {}", cache.dir().display());
            println!("  entries: {}", s.entries);
            println!("  complete: {}", s.complete);
            println!("  size: {}", stats::format_bytes(s.bytes));
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            println!("Removed {} cached pages.", removed);
        }
        CacheAction::Invalidate { url } => {
            if cache.invalidate(&url)? {
                println!("Invalidated {}", url);
            } else {
                println!("Not cached: {}", url);
            }
        }
    }
    Ok(())
}
