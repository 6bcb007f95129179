//! Fetch → extract → reconcile runs driven by a scripted provider.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use codex_sync::cache::CacheStore;
use codex_sync::config::Config;
use codex_sync::extract::normalize::Normalizer;
use codex_sync::fetch::{
    ContentProvider, FetchError, FetchOptions, Fetcher, RateLimiter, RetryPolicy, ScrapedPage,
};
use codex_sync::ingest::{ingest_faction, ingest_rules, ingest_units};
use codex_sync::models::ScrapeStatus;
use codex_sync::{db, index, migrate};

const BASE: &str = "https://example.test/factions/necrons/";

const FACTION_PAGE: &str = r#"
<html><body>
<h1>Necrons</h1>
<h2>Army Rules</h2>
<h3>Reanimation Protocols</h3>
<p>Destroyed models return.</p>
<h2>Awakened Dynasty</h2>
<h3>Detachment Rule</h3>
<h4>Command Protocols</h4>
<p>Units gain a protocol each round.</p>
<h2>Stratagems</h2>
<div class="str10Wrap">
  <div class="str10Name">PROTOCOL OF THE HUNGRY VOID</div>
  <div class="str10CP">1CP</div>
  <div class="str10Type">Awakened Dynasty – Strategic Ploy Stratagem</div>
  <div class="str10Text">WHEN: Fight phase. TARGET: One unit. EFFECT: Add 1 to Strength.</div>
</div>
<h2>Datasheets</h2>
<a href="/factions/necrons/datasheets/Immortals">Immortals</a>
<a href="/factions/necrons/datasheets/Lokhust-Heavy-Destroyer">Lokhust Heavy Destroyer</a>
<a href="/factions/necrons/datasheets/Overlord">Overlord</a>
</body></html>
"#;

const IMMORTALS: &str = r#"
<html><body>
<div class="dsH2Header">Immortals</div>
<div class="dsCharWrap"><div class="dsCharName">M</div><div class="dsCharValue">5"</div></div>
<div class="dsCharWrap"><div class="dsCharName">T</div><div class="dsCharValue">5</div></div>
<div class="dsCharWrap"><div class="dsCharName">Sv</div><div class="dsCharValue">3+</div></div>
<div class="dsCharWrap"><div class="dsCharName">W</div><div class="dsCharValue">1</div></div>
<table class="wTable">
  <tr><td colspan="7">RANGED WEAPONS</td></tr>
  <tr><td>Gauss blaster</td><td>24"</td><td>2</td><td>3+</td><td>5</td><td>-1</td><td>1</td></tr>
</table>
<div class="dsKeywords">KEYWORDS: Infantry, Battleline</div>
<div class="dsFactionKeywords">FACTION KEYWORDS: Necrons</div>
</body></html>
"#;

// Markup drifted: the statline wrappers are gone.
const LOKHUST: &str = r#"
<html><body>
<div class="dsH2Header">Lokhust Heavy Destroyer</div>
<div class="stats">T 6 W 6</div>
</body></html>
"#;

const RULES: &str = "# Command Phase\n\nBoth players gain 1CP.\n\n## Battle-shock\n\nTake a test.\n";

/// Serves fixed pages by URL; anything else fails.
struct PageSet {
    pages: HashMap<String, (String, String)>,
}

#[async_trait]
impl ContentProvider for PageSet {
    async fn scrape(&self, url: &str, _timeout: Duration) -> Result<ScrapedPage, FetchError> {
        match self.pages.get(url) {
            Some((markdown, html)) => Ok(ScrapedPage {
                markdown: markdown.clone(),
                html: html.clone(),
                metadata: BTreeMap::new(),
            }),
            None => Err(FetchError::Provider {
                url: url.to_string(),
                message: "HTTP 404".to_string(),
            }),
        }
    }
}

fn page_set() -> PageSet {
    let mut pages = HashMap::new();
    let html = |url: &str, body: &str| (url.to_string(), (String::new(), body.to_string()));
    pages.extend([
        html(BASE, FACTION_PAGE),
        html(&format!("{}datasheets/Immortals", BASE), IMMORTALS),
        html(&format!("{}datasheets/Lokhust-Heavy-Destroyer", BASE), LOKHUST),
    ]);
    pages.insert(
        "https://example.test/rules/".to_string(),
        (RULES.to_string(), "<h1>Rules</h1>".to_string()),
    );
    PageSet { pages }
}

async fn setup() -> (TempDir, SqlitePool, Fetcher) {
    let tmp = TempDir::new().unwrap();
    let config = Config::rooted_at(tmp.path());
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    let fetcher = Fetcher::new(
        Arc::new(page_set()),
        CacheStore::new(&config.cache.dir),
        RateLimiter::per_minute(60_000),
        RetryPolicy {
            attempts: 1,
            base_delay: Duration::from_millis(1),
        },
        Duration::from_secs(5),
    );
    (tmp, pool, fetcher)
}

#[tokio::test]
async fn test_faction_then_units_marks_index() {
    let (_tmp, pool, mut fetcher) = setup().await;
    let n = Normalizer::builtin();
    let opts = FetchOptions::default();

    let faction = ingest_faction(&pool, &mut fetcher, "necrons", BASE, opts, &n)
        .await
        .unwrap();
    assert_eq!(faction.failed, 0);
    assert_eq!(faction.indexed, 3);

    let units = ingest_units(&pool, &mut fetcher, "necrons", None, false, opts, &n)
        .await
        .unwrap();
    assert_eq!(units.inserted, 1);
    assert_eq!(units.failed, 2);

    let entries = index::entries(&pool, "necrons").await.unwrap();
    let status: Vec<(&str, ScrapeStatus)> = entries
        .iter()
        .map(|e| (e.slug.as_str(), e.scrape_status))
        .collect();
    assert_eq!(
        status,
        vec![
            ("immortals", ScrapeStatus::Success),
            ("lokhust-heavy-destroyer", ScrapeStatus::Failed),
            ("overlord", ScrapeStatus::Failed),
        ]
    );
    assert!(entries.iter().all(|e| e.last_attempt_at.is_some()));
    assert!(entries[2]
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("404")));

    // Nothing pending until failures are retried
    let again = ingest_units(&pool, &mut fetcher, "necrons", None, false, opts, &n)
        .await
        .unwrap();
    assert_eq!(again.processed, 0);

    let retry = ingest_units(&pool, &mut fetcher, "necrons", Some(1), true, opts, &n)
        .await
        .unwrap();
    assert_eq!(retry.failed, 1);
    assert_eq!(retry.errors[0].slug, "lokhust-heavy-destroyer");
}

#[tokio::test]
async fn test_second_run_served_from_cache_and_unchanged() {
    let (_tmp, pool, mut fetcher) = setup().await;
    let n = Normalizer::builtin();
    let opts = FetchOptions::default();

    ingest_faction(&pool, &mut fetcher, "necrons", BASE, opts, &n)
        .await
        .unwrap();
    let requests = fetcher.stats().requests;

    let second = ingest_faction(&pool, &mut fetcher, "necrons", BASE, opts, &n)
        .await
        .unwrap();
    assert_eq!(fetcher.stats().requests, requests);
    assert_eq!(fetcher.stats().cache_hits, 1);
    assert_eq!(second.changed(), 0);
    assert_eq!(second.failed, 0);
}

#[tokio::test]
async fn test_unreachable_page_is_item_failure() {
    let (_tmp, pool, mut fetcher) = setup().await;
    let n = Normalizer::builtin();

    let summary = ingest_faction(
        &pool,
        &mut fetcher,
        "tyranids",
        "https://example.test/factions/tyranids/",
        FetchOptions::default(),
        &n,
    )
    .await
    .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors[0].kind, "page");
}

#[tokio::test]
async fn test_rules_ingest() {
    let (_tmp, pool, mut fetcher) = setup().await;
    let summary = ingest_rules(
        &pool,
        &mut fetcher,
        "https://example.test/rules/",
        FetchOptions::default(),
        &Normalizer::builtin(),
    )
    .await
    .unwrap();
    assert_eq!(summary.failed, 0);
    assert!(summary.inserted >= 2);
}
