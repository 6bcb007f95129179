//! Fetcher behavior against a scripted provider on tokio's paused clock.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use codex_sync::cache::{cache_key, CacheEntry, CacheStore};
use codex_sync::fetch::{
    ContentProvider, FetchError, FetchOptions, Fetcher, RateLimiter, RetryPolicy, ScrapedPage,
};

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Fail,
    EmptyHtml,
    Ok,
}

/// Provider that replays scripted outcomes and records dispatch times.
/// Once the script runs out every call succeeds.
#[derive(Default)]
struct ScriptedProvider {
    script: Mutex<VecDeque<Outcome>>,
    dispatches: Mutex<Vec<Instant>>,
}

impl ScriptedProvider {
    fn scripted(outcomes: &[Outcome]) -> Self {
        let provider = Self::default();
        provider.script.lock().unwrap().extend(outcomes.iter().copied());
        provider
    }

    fn failing_first(n: usize) -> Self {
        Self::scripted(&vec![Outcome::Fail; n])
    }

    fn dispatches(&self) -> Vec<Instant> {
        self.dispatches.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.dispatches.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    async fn scrape(&self, url: &str, _timeout: Duration) -> Result<ScrapedPage, FetchError> {
        self.dispatches.lock().unwrap().push(Instant::now());
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Outcome::Ok);
        let html = match outcome {
            Outcome::Fail => {
                return Err(FetchError::Provider {
                    url: url.to_string(),
                    message: "HTTP 503".to_string(),
                })
            }
            Outcome::EmptyHtml => "  \n".to_string(),
            Outcome::Ok => format!("<h1>Page</h1><p>{}</p>", url),
        };
        Ok(ScrapedPage {
            markdown: format!("# Page\n\nContent of {}", url),
            html,
            metadata: BTreeMap::new(),
        })
    }
}

fn fetcher(provider: Arc<ScriptedProvider>, cache_dir: &TempDir) -> Fetcher {
    Fetcher::new(
        provider,
        CacheStore::new(cache_dir.path()),
        RateLimiter::per_minute(10),
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(2000),
        },
        Duration::from_secs(60),
    )
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_requests_spaced_by_rate_limit() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::default());
    let mut fetcher = fetcher(provider.clone(), &tmp);

    for url in ["https://example.test/a", "https://example.test/b", "https://example.test/c"] {
        fetcher.fetch(url, FetchOptions::default()).await.unwrap();
    }

    let times = provider.dispatches();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_millis(6000),
            "requests only {:?} apart",
            pair[1] - pair[0]
        );
    }
    assert_eq!(fetcher.stats().requests, 3);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hits_skip_rate_limit() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::default());
    let mut fetcher = fetcher(provider.clone(), &tmp);
    let url = "https://example.test/cached";

    let first = fetcher.fetch(url, FetchOptions::default()).await.unwrap();
    assert!(!first.served_from_cache);

    let start = Instant::now();
    let second = fetcher.fetch(url, FetchOptions::default()).await.unwrap();
    assert!(second.served_from_cache);
    assert_eq!(second.content_hash, first.content_hash);
    assert_eq!(Instant::now() - start, Duration::ZERO);
    assert_eq!(provider.calls(), 1);
    assert_eq!(fetcher.stats().cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_doubles_then_succeeds() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::failing_first(2));
    let mut fetcher = fetcher(provider.clone(), &tmp);

    let entry = fetcher
        .fetch("https://example.test/flaky", FetchOptions::default())
        .await
        .unwrap();
    assert!(entry.is_complete());

    let times = provider.dispatches();
    assert_eq!(times.len(), 3, "no fourth attempt after success");
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert!(first_gap >= Duration::from_millis(2000) && first_gap < Duration::from_millis(2100));
    assert!(second_gap >= Duration::from_millis(4000) && second_gap < Duration::from_millis(4100));
    assert_eq!(fetcher.stats().failed_attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_to_caller() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::failing_first(5));
    let mut fetcher = fetcher(provider.clone(), &tmp);
    let url = "https://example.test/down";

    let err = fetcher.fetch(url, FetchOptions::default()).await.unwrap_err();
    match err {
        FetchError::Exhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert!(last.contains("503"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(provider.calls(), 3);
    // Nothing cached for a failed fetch
    assert!(fetcher.cache().get(url).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_force_refresh_bypasses_cache() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::default());
    let mut fetcher = fetcher(provider.clone(), &tmp);
    let url = "https://example.test/refresh";

    fetcher.fetch(url, FetchOptions::default()).await.unwrap();
    let refreshed = fetcher.fetch(url, FetchOptions::refresh()).await.unwrap();
    assert!(!refreshed.served_from_cache);
    assert_eq!(provider.calls(), 2);

    let no_cache = FetchOptions {
        use_cache: false,
        ..FetchOptions::default()
    };
    fetcher.fetch(url, no_cache).await.unwrap();
    assert_eq!(provider.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_incomplete_cache_entry_is_refetched() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::default());
    let mut fetcher = fetcher(provider.clone(), &tmp);
    let url = "https://example.test/legacy";

    let mut legacy = CacheEntry::new(
        url,
        "# Legacy\n\nmarkdown only".to_string(),
        String::new(),
        BTreeMap::new(),
        chrono::Utc::now(),
    );
    legacy.html_body = None;
    fetcher.cache().put(&legacy).unwrap();
    assert!(fetcher.cache().get(url).is_none());

    let entry = fetcher.fetch(url, FetchOptions::default()).await.unwrap();
    assert!(!entry.served_from_cache);
    assert!(entry.html().is_some());
    assert_eq!(provider.calls(), 1);

    // The refetch replaced the legacy entry
    assert!(fetcher.cache().get(url).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_cache_entry_is_a_miss() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::default());
    let mut fetcher = fetcher(provider.clone(), &tmp);
    let url = "https://example.test/corrupt";

    std::fs::write(tmp.path().join(format!("{}.json", cache_key(url))), "{not json").unwrap();

    let entry = fetcher.fetch(url, FetchOptions::default()).await.unwrap();
    assert!(!entry.served_from_cache);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_html_is_retried() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::scripted(&[Outcome::EmptyHtml]));
    let mut fetcher = fetcher(provider.clone(), &tmp);
    let url = "https://example.test/blank";

    let entry = fetcher.fetch(url, FetchOptions::default()).await.unwrap();
    assert!(entry.html().is_some_and(|h| h.contains("<h1>Page</h1>")));

    let times = provider.dispatches();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_millis(2000));
    assert_eq!(fetcher.stats().failed_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_always_empty_html_exhausts_without_caching() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::scripted(&[Outcome::EmptyHtml; 3]));
    let mut fetcher = fetcher(provider.clone(), &tmp);
    let url = "https://example.test/always-blank";

    let err = fetcher.fetch(url, FetchOptions::default()).await.unwrap_err();
    match err {
        FetchError::Exhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert!(last.contains("no HTML body"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(provider.calls(), 3);
    assert!(fetcher.cache().get(url).is_none());
}
