//! Content-addressed page cache.
//!
//! One JSON file per fetched URL, named by the SHA-256 of the normalized
//! URL. Entries never expire; they are replaced by a forced refresh or
//! removed explicitly.
//!
//! Reads are forgiving: an unreadable or malformed file, or a legacy entry
//! written before HTML bodies were stored, is reported as a miss so the
//! fetcher goes back to the network. A damaged cache never fails a run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A fetched page as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub request_url: String,
    #[serde(default)]
    pub markdown_body: String,
    /// Missing in entries written by older versions.
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(skip)]
    pub served_from_cache: bool,
}

impl CacheEntry {
    /// Build a fresh (not cached) entry, hashing the HTML body or, when it
    /// is empty, the markdown body.
    pub fn new(
        request_url: &str,
        markdown_body: String,
        html_body: String,
        metadata: BTreeMap<String, serde_json::Value>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let content_hash = if html_body.is_empty() {
            content_hash(&markdown_body)
        } else {
            content_hash(&html_body)
        };
        Self {
            request_url: request_url.to_string(),
            markdown_body,
            html_body: Some(html_body),
            metadata,
            content_hash,
            fetched_at,
            served_from_cache: false,
        }
    }

    /// The HTML body, if present and non-empty.
    pub fn html(&self) -> Option<&str> {
        self.html_body.as_deref().filter(|h| !h.trim().is_empty())
    }

    pub fn is_complete(&self) -> bool {
        self.html().is_some()
    }
}

pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize a URL for cache keying: trimmed, fragment dropped, scheme and
/// host lowercased, trailing slash removed.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);
    let (head, rest) = match url.find("://") {
        Some(idx) => {
            let after = &url[idx + 3..];
            let host_end = after.find('/').map(|i| idx + 3 + i).unwrap_or(url.len());
            (url[..host_end].to_ascii_lowercase(), &url[host_end..])
        }
        None => (String::new(), url),
    };
    let mut normalized = format!("{}{}", head, rest);
    while normalized.ends_with('/') && !normalized.ends_with("://") {
        normalized.pop();
    }
    normalized
}

pub fn cache_key(url: &str) -> String {
    content_hash(&normalize_url(url))
}

/// Counts reported by `codex cache stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub complete: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", cache_key(url)))
    }

    /// Look up a URL. Incomplete or damaged entries are misses.
    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        let path = self.path_for(url);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(url, path = %path.display(), error = %e, "unreadable cache entry");
                return None;
            }
        };
        let mut entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(url, path = %path.display(), error = %e, "malformed cache entry");
                return None;
            }
        };
        if !entry.is_complete() {
            debug!(url, "cache entry has no HTML body; treating as miss");
            return None;
        }
        entry.served_from_cache = true;
        Some(entry)
    }

    /// Persist an entry, replacing any previous one for the same URL.
    pub fn put(&self, entry: &CacheEntry) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache dir: {}", self.dir.display()))?;
        let path = self.path_for(&entry.request_url);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string(entry)?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("Failed to write cache entry: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to commit cache entry: {}", path.display()))?;
        Ok(())
    }

    /// Remove the entry for a URL. Returns whether one existed.
    pub fn invalidate(&self, url: &str) -> Result<bool> {
        let path = self.path_for(url);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    /// Remove every entry. Returns the number of files removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.entry_paths()? {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        for path in self.entry_paths()? {
            stats.entries += 1;
            stats.bytes += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let complete = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok())
                .map(|e| e.is_complete())
                .unwrap_or(false);
            if complete {
                stats.complete += 1;
            }
        }
        Ok(stats)
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read cache dir: {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(url: &str, html: &str) -> CacheEntry {
        CacheEntry::new(
            url,
            "# Title\n\nbody".to_string(),
            html.to_string(),
            BTreeMap::new(),
            Utc::now(),
        )
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("  HTTPS://Example.COM/Factions/Necrons/#top "),
            "https://example.com/Factions/Necrons"
        );
        assert_eq!(
            cache_key("https://example.com/a/"),
            cache_key("https://EXAMPLE.com/a")
        );
        assert_ne!(cache_key("https://example.com/a"), cache_key("https://example.com/b"));
    }

    #[test]
    fn test_put_then_get_is_hit() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let e = entry("https://example.com/a", "<h1>A</h1>");
        store.put(&e).unwrap();

        let hit = store.get("https://example.com/a/").unwrap();
        assert!(hit.served_from_cache);
        assert_eq!(hit.content_hash, content_hash("<h1>A</h1>"));
        assert_eq!(hit.html(), Some("<h1>A</h1>"));
    }

    #[test]
    fn test_empty_html_is_miss() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let e = entry("https://example.com/a", "");
        // Falls back to hashing the markdown
        assert_eq!(e.content_hash, content_hash("# Title\n\nbody"));
        store.put(&e).unwrap();
        assert!(store.get("https://example.com/a").is_none());
    }

    #[test]
    fn test_legacy_entry_without_html_is_miss() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let legacy = serde_json::json!({
            "request_url": "https://example.com/legacy",
            "markdown_body": "text only",
            "content_hash": "abc",
            "fetched_at": "2024-01-01T00:00:00Z"
        });
        std::fs::write(
            tmp.path().join(format!("{}.json", cache_key("https://example.com/legacy"))),
            legacy.to_string(),
        )
        .unwrap();
        assert!(store.get("https://example.com/legacy").is_none());
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        std::fs::write(
            tmp.path().join(format!("{}.json", cache_key("https://example.com/x"))),
            "{not json",
        )
        .unwrap();
        assert!(store.get("https://example.com/x").is_none());
    }

    #[test]
    fn test_invalidate_clear_and_stats() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().join("cache"));
        assert_eq!(store.stats().unwrap(), CacheStats::default());

        store.put(&entry("https://example.com/a", "<p>a</p>")).unwrap();
        store.put(&entry("https://example.com/b", "")).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.complete, 1);
        assert!(stats.bytes > 0);

        assert!(store.invalidate("https://example.com/a").unwrap());
        assert!(!store.invalidate("https://example.com/a").unwrap());
        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.stats().unwrap().entries, 0);
    }
}
