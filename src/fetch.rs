//! Remote fetcher: rate-limited, retrying, read-through/write-through cached.
//!
//! All page content comes from an external scraping provider behind the
//! [`ContentProvider`] trait. A [`Fetcher`] owns its own [`RateLimiter`], so
//! independent fetchers (and tests) never share throttling state.
//!
//! # Algorithm
//!
//! 1. With `use_cache` and without `force_refresh`, a complete cache entry is
//!    returned immediately.
//! 2. The limiter enforces a minimum spacing of `60000 / rate_per_minute` ms
//!    between outbound requests. There is no burst allowance.
//! 3. The provider is asked for both markdown and HTML.
//! 4. Failures are retried up to `retry_attempts` times in total, sleeping
//!    `base_delay * 2^(attempt - 1)` after each failed attempt. Exhausting
//!    the attempts returns [`FetchError::Exhausted`].
//! 5. A successful result is hashed, written to the cache, and returned.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::config::FetcherConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The provider answered but reported failure, or the transport failed.
    #[error("provider failed for {url}: {message}")]
    Provider { url: String, message: String },

    #[error("request for {url} timed out")]
    Timeout { url: String },

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("scraping provider API key not set (expected env var {0})")]
    MissingApiKey(String),
}

/// Raw provider output for one URL.
#[derive(Debug, Clone, Default)]
pub struct ScrapedPage {
    pub markdown: String,
    pub html: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// The remote scraping capability: `fetch(url) -> content`.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Fetch one URL in both markdown and HTML form.
    async fn scrape(&self, url: &str, timeout: Duration) -> Result<ScrapedPage, FetchError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Firecrawl-compatible HTTP provider
// ═══════════════════════════════════════════════════════════════════════

pub struct FirecrawlProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<ScrapeData>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl FirecrawlProvider {
    pub fn new(api_url: &str, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(config: &FetcherConfig) -> Result<Self, FetchError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| FetchError::MissingApiKey(config.api_key_env.clone()))?;
        Ok(Self::new(&config.api_url, api_key))
    }
}

#[async_trait]
impl ContentProvider for FirecrawlProvider {
    async fn scrape(&self, url: &str, timeout: Duration) -> Result<ScrapedPage, FetchError> {
        let provider_err = |message: String| FetchError::Provider {
            url: url.to_string(),
            message,
        };

        let body = serde_json::json!({
            "url": url,
            "formats": ["markdown", "html"],
            "timeout": timeout.as_millis() as u64,
        });

        let response = self
            .client
            .post(format!("{}/v1/scrape", self.api_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        url: url.to_string(),
                    }
                } else {
                    provider_err(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(provider_err(format!("HTTP {}: {}", status, text)));
        }

        let parsed: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| provider_err(format!("invalid response body: {}", e)))?;

        if !parsed.success {
            return Err(provider_err(
                parsed.error.unwrap_or_else(|| "success=false".to_string()),
            ));
        }
        let data = parsed
            .data
            .ok_or_else(|| provider_err("response has no data".to_string()))?;

        Ok(ScrapedPage {
            markdown: data.markdown.unwrap_or_default(),
            html: data.html.unwrap_or_default(),
            metadata: data.metadata,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Rate limiting and retry
// ═══════════════════════════════════════════════════════════════════════

/// Single global throttle guaranteeing a minimum gap between dispatches.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request_at: Option<Instant>,
    request_count: u64,
}

impl RateLimiter {
    pub fn per_minute(rate_per_minute: u32) -> Self {
        let rate = u64::from(rate_per_minute.max(1));
        Self {
            min_interval: Duration::from_millis(60_000 / rate),
            last_request_at: None,
            request_count: 0,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Sleep until the minimum interval since the last dispatch has passed.
    pub async fn wait(&self) {
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                debug!(wait_ms = remaining.as_millis() as u64, "rate limit");
                tokio::time::sleep(remaining).await;
            }
        }
    }

    /// Record an outbound request.
    pub fn mark_dispatched(&mut self) {
        self.last_request_at = Some(Instant::now());
        self.request_count = self.request_count.saturating_add(1);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub use_cache: bool,
    pub force_refresh: bool,
    /// Per-request timeout; the fetcher default applies when unset.
    pub timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            force_refresh: false,
            timeout: None,
        }
    }
}

impl FetchOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub failed_attempts: u64,
}

// ═══════════════════════════════════════════════════════════════════════
// Fetcher
// ═══════════════════════════════════════════════════════════════════════

pub struct Fetcher {
    provider: Arc<dyn ContentProvider>,
    cache: CacheStore,
    limiter: RateLimiter,
    retry: RetryPolicy,
    timeout: Duration,
    stats: FetchStats,
}

impl Fetcher {
    pub fn new(
        provider: Arc<dyn ContentProvider>,
        cache: CacheStore,
        limiter: RateLimiter,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            limiter,
            retry,
            timeout,
            stats: FetchStats::default(),
        }
    }

    pub fn from_config(
        config: &FetcherConfig,
        provider: Arc<dyn ContentProvider>,
        cache: CacheStore,
    ) -> Self {
        Self::new(
            provider,
            cache,
            RateLimiter::per_minute(config.rate_per_minute),
            RetryPolicy {
                attempts: config.retry_attempts.max(1),
                base_delay: Duration::from_millis(config.base_delay_ms),
            },
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            requests: self.limiter.request_count(),
            ..self.stats
        }
    }

    pub async fn fetch(&mut self, url: &str, opts: FetchOptions) -> Result<CacheEntry, FetchError> {
        if opts.use_cache && !opts.force_refresh {
            if let Some(hit) = self.cache.get(url) {
                debug!(url, "cache hit");
                self.stats.cache_hits += 1;
                return Ok(hit);
            }
        }

        self.limiter.wait().await;

        let timeout = opts.timeout.unwrap_or(self.timeout);
        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.retry.delay_after(attempt - 1);
                debug!(url, attempt, delay_ms = delay.as_millis() as u64, "retry backoff");
                tokio::time::sleep(delay).await;
            }

            self.limiter.mark_dispatched();
            let outcome = match tokio::time::timeout(timeout, self.provider.scrape(url, timeout))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout {
                    url: url.to_string(),
                }),
            };

            // HTML is what the extractors read; a page without it is a failed attempt.
            let outcome = outcome.and_then(|page| {
                if page.html.trim().is_empty() {
                    Err(FetchError::Provider {
                        url: url.to_string(),
                        message: "response has no HTML body".to_string(),
                    })
                } else {
                    Ok(page)
                }
            });

            match outcome {
                Ok(page) => {
                    let entry = CacheEntry::new(url, page.markdown, page.html, page.metadata, Utc::now());
                    if let Err(e) = self.cache.put(&entry) {
                        warn!(url, error = %e, "failed to write cache entry");
                    }
                    info!(url, attempt, hash = %entry.content_hash, "fetched");
                    return Ok(entry);
                }
                Err(e) => {
                    self.stats.failed_attempts += 1;
                    warn!(url, attempt, attempts, error = %e, "fetch attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts,
            last: last_error,
        })
    }
}
