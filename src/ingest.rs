//! Ingestion pipeline orchestration.
//!
//! Coordinates one run: fetch (through the cache) → extract → reconcile.
//! Each `ingest_*` function takes an already-built [`Fetcher`] and pool so
//! it can be driven by tests with a scripted provider; the `run_*` wrappers
//! build those from config for the CLI and print the run summary.
//!
//! A page that cannot be fetched or parsed is an item failure: it is
//! counted in the summary and the run carries on.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::db;
use crate::extract::normalize::Normalizer;
use crate::extract::{self, PageKind};
use crate::fetch::{FetchOptions, Fetcher, FirecrawlProvider};
use crate::index;
use crate::models::ExtractedRecord;
use crate::reconcile::{self, ReconcileSummary};
use crate::validate::{validate_urls, HttpProbe};

/// Build a fetcher backed by the configured scraping provider.
pub fn build_fetcher(config: &Config) -> Result<Fetcher> {
    let provider = FirecrawlProvider::from_config(&config.fetcher)?;
    Ok(Fetcher::from_config(
        &config.fetcher,
        Arc::new(provider),
        CacheStore::new(&config.cache.dir),
    ))
}

pub fn fetch_options(force: bool) -> FetchOptions {
    if force {
        FetchOptions::refresh()
    } else {
        FetchOptions::default()
    }
}

/// Fetch and reconcile the core rules document.
pub async fn ingest_rules(
    pool: &SqlitePool,
    fetcher: &mut Fetcher,
    url: &str,
    opts: FetchOptions,
    normalizer: &Normalizer,
) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    let entry = match fetcher.fetch(url, opts).await {
        Ok(entry) => entry,
        Err(e) => {
            summary.fail("page", url, e.to_string());
            return Ok(summary);
        }
    };
    let records = extract::extract(&PageKind::Rules, &entry, normalizer);
    if records.is_empty() {
        summary.fail("page", url, "no rule sections found");
        return Ok(summary);
    }
    info!(url, sections = records.len(), "extracted rules");
    summary.merge(reconcile::reconcile(pool, "", &records).await?);
    Ok(summary)
}

/// Fetch and reconcile one faction page, registering its datasheets.
pub async fn ingest_faction(
    pool: &SqlitePool,
    fetcher: &mut Fetcher,
    faction_slug: &str,
    url: &str,
    opts: FetchOptions,
    normalizer: &Normalizer,
) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    let entry = match fetcher.fetch(url, opts).await {
        Ok(entry) => entry,
        Err(e) => {
            summary.fail("page", url, e.to_string());
            return Ok(summary);
        }
    };
    let kind = PageKind::Faction {
        slug: faction_slug.to_string(),
    };
    let records = extract::extract(&kind, &entry, normalizer);
    if records.is_empty() {
        summary.fail("page", url, "no faction content found");
        return Ok(summary);
    }
    summary.merge(reconcile::reconcile(pool, faction_slug, &records).await?);
    Ok(summary)
}

/// Work through a faction's unit index.
///
/// Every attempted entry is stamped: `success` when its unit was written,
/// `failed` with the reason otherwise.
pub async fn ingest_units(
    pool: &SqlitePool,
    fetcher: &mut Fetcher,
    faction_slug: &str,
    limit: Option<usize>,
    retry_failed: bool,
    opts: FetchOptions,
    normalizer: &Normalizer,
) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    let entries = index::pending(pool, faction_slug, retry_failed, limit).await?;
    info!(faction = faction_slug, count = entries.len(), "units to scrape");

    for entry in &entries {
        let page = match fetcher.fetch(&entry.source_url, opts).await {
            Ok(page) => page,
            Err(e) => {
                let message = e.to_string();
                summary.fail("unit", &entry.slug, message.clone());
                index::mark_failed(pool, entry, &message).await?;
                continue;
            }
        };

        let records = extract::extract(&PageKind::Unit, &page, normalizer);
        if records.is_empty() {
            let message = "datasheet has no name or an incomplete statline";
            warn!(unit = %entry.slug, url = %entry.source_url, "{}", message);
            summary.fail("unit", &entry.slug, message);
            index::mark_failed(pool, entry, message).await?;
            continue;
        }

        let before = summary.failed;
        let units: Vec<_> = records
            .into_iter()
            .filter_map(|record| match record {
                ExtractedRecord::Unit(unit) => Some(*unit),
                _ => None,
            })
            .collect();
        summary.merge(reconcile::reconcile_units(pool, faction_slug, &units).await?);

        if summary.failed > before {
            let message = summary
                .errors
                .last()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            index::mark_failed(pool, entry, &message).await?;
        } else {
            index::mark_success(pool, entry).await?;
        }
    }

    Ok(summary)
}

// ═══════════════════════════════════════════════════════════════════════
// CLI entry points
// ═══════════════════════════════════════════════════════════════════════

fn print_summary(title: &str, summary: &ReconcileSummary, fetcher: &Fetcher) {
    let stats = fetcher.stats();
    println!("{}", title);
    print!("{}", summary);
    println!(
        "  requests: {} (cache hits: {}, failed attempts: {})",
        stats.requests, stats.cache_hits, stats.failed_attempts
    );
    println!("ok");
}

/// Fetch one URL through the cache and describe what came back.
pub async fn run_fetch(config: &Config, url: &str, force: bool) -> Result<()> {
    let mut fetcher = build_fetcher(config)?;
    let entry = fetcher.fetch(url, fetch_options(force)).await?;
    println!("fetch {}", entry.request_url);
    println!("  from cache: {}", entry.served_from_cache);
    println!("  fetched at: {}", entry.fetched_at.to_rfc3339());
    println!("  content hash: {}", entry.content_hash);
    println!("  markdown: {} bytes", entry.markdown_body.len());
    println!("  html: {} bytes", entry.html().map(str::len).unwrap_or(0));
    Ok(())
}

pub async fn run_rules(config: &Config, force: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut fetcher = build_fetcher(config)?;
    let normalizer = Normalizer::load(config.extract.glossary.as_deref())?;

    let summary = ingest_rules(
        &pool,
        &mut fetcher,
        &config.source.rules_url,
        fetch_options(force),
        &normalizer,
    )
    .await?;
    print_summary("rules", &summary, &fetcher);

    pool.close().await;
    Ok(())
}

pub async fn run_faction(config: &Config, faction_slug: &str, force: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut fetcher = build_fetcher(config)?;
    let normalizer = Normalizer::load(config.extract.glossary.as_deref())?;
    let url = config.source.faction_url(faction_slug);

    let summary = ingest_faction(
        &pool,
        &mut fetcher,
        faction_slug,
        &url,
        fetch_options(force),
        &normalizer,
    )
    .await?;
    print_summary(&format!("faction {}", faction_slug), &summary, &fetcher);

    pool.close().await;
    Ok(())
}

pub async fn run_units(
    config: &Config,
    faction_slug: &str,
    limit: Option<usize>,
    retry_failed: bool,
    force: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut fetcher = build_fetcher(config)?;
    let normalizer = Normalizer::load(config.extract.glossary.as_deref())?;

    let summary = ingest_units(
        &pool,
        &mut fetcher,
        faction_slug,
        limit,
        retry_failed,
        fetch_options(force),
        &normalizer,
    )
    .await?;
    print_summary(&format!("units {}", faction_slug), &summary, &fetcher);

    pool.close().await;
    Ok(())
}

/// Probe the faction page and every indexed datasheet URL.
pub async fn run_validate(config: &Config, faction_slug: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut urls = vec![config.source.faction_url(faction_slug)];
    urls.extend(
        index::entries(&pool, faction_slug)
            .await?
            .into_iter()
            .map(|e| e.source_url),
    );
    pool.close().await;

    let probe = Arc::new(HttpProbe::new(Duration::from_secs(
        config.validation.timeout_secs,
    ))?);
    let checks = validate_urls(probe, &urls, config.validation.batch_size).await;

    let dead: Vec<_> = checks.iter().filter(|c| !c.is_live()).collect();
    println!("validate {}", faction_slug);
    println!("  checked: {}", checks.len());
    println!("  live: {}", checks.len() - dead.len());
    println!("  dead: {}", dead.len());
    for check in &dead {
        match (&check.status, &check.error) {
            (Some(status), _) => println!("    {} {}", status, check.url),
            (None, Some(error)) => println!("    ERR {} ({})", check.url, error),
            (None, None) => println!("    ERR {}", check.url),
        }
    }
    println!("ok");
    Ok(())
}
