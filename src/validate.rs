//! Bulk URL liveness checks.
//!
//! Probes run in fixed-size batches: every probe in a batch is spawned at
//! once and the whole batch is awaited before the next one starts. This is
//! a read-only availability check, so results carry no ordering guarantee
//! beyond being returned in input order.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlCheck {
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl UrlCheck {
    pub fn is_live(&self) -> bool {
        matches!(self.status, Some(code) if (200..400).contains(&code))
    }
}

#[async_trait]
pub trait LivenessProbe: Send + Sync + 'static {
    /// Return the HTTP status for a URL.
    async fn probe(&self, url: &str) -> Result<u16>;
}

/// Plain HTTP `HEAD` probe.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self, url: &str) -> Result<u16> {
        let response = self.client.head(url).send().await?;
        Ok(response.status().as_u16())
    }
}

pub async fn validate_urls<P: LivenessProbe>(
    probe: Arc<P>,
    urls: &[String],
    batch_size: usize,
) -> Vec<UrlCheck> {
    let batch_size = batch_size.max(1);
    let mut results: Vec<Option<UrlCheck>> = vec![None; urls.len()];

    for (batch_no, batch) in urls.chunks(batch_size).enumerate() {
        debug!(batch = batch_no, size = batch.len(), "probing batch");
        let mut set = JoinSet::new();
        for (offset, url) in batch.iter().enumerate() {
            let index = batch_no * batch_size + offset;
            let probe = Arc::clone(&probe);
            let url = url.clone();
            set.spawn(async move {
                let check = match probe.probe(&url).await {
                    Ok(status) => UrlCheck {
                        url,
                        status: Some(status),
                        error: None,
                    },
                    Err(e) => UrlCheck {
                        url,
                        status: None,
                        error: Some(e.to_string()),
                    },
                };
                (index, check)
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, check)) => results[index] = Some(check),
                Err(e) => debug!(error = %e, "probe task failed"),
            }
        }
    }

    results
        .into_iter()
        .zip(urls)
        .map(|(check, url)| {
            check.unwrap_or_else(|| UrlCheck {
                url: url.clone(),
                status: None,
                error: Some("probe task panicked".to_string()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl LivenessProbe for CountingProbe {
        async fn probe(&self, url: &str) -> Result<u16> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if url.ends_with("/missing") {
                Ok(404)
            } else if url.ends_with("/down") {
                anyhow::bail!("connection refused")
            } else {
                Ok(200)
            }
        }
    }

    #[tokio::test]
    async fn test_batches_bound_concurrency() {
        let probe = Arc::new(CountingProbe {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let mut urls: Vec<String> = (0..12).map(|i| format!("https://example.test/{}", i)).collect();
        urls.push("https://example.test/missing".to_string());
        urls.push("https://example.test/down".to_string());

        let checks = validate_urls(Arc::clone(&probe), &urls, 5).await;

        assert_eq!(checks.len(), urls.len());
        assert!(probe.max_in_flight.load(Ordering::SeqCst) <= 5);
        for (check, url) in checks.iter().zip(&urls) {
            assert_eq!(&check.url, url);
        }
        assert!(checks[0].is_live());
        assert_eq!(checks[12].status, Some(404));
        assert!(!checks[12].is_live());
        assert!(checks[13].error.as_deref().unwrap().contains("refused"));
    }
}
