use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub cache: CacheConfig,
    pub snapshots: SnapshotConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_rate_per_minute")]
    pub rate_per_minute: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            rate_per_minute: default_rate_per_minute(),
            retry_attempts: default_retry_attempts(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.firecrawl.dev".to_string()
}
fn default_api_key_env() -> String {
    "FIRECRAWL_API_KEY".to_string()
}
fn default_rate_per_minute() -> u32 {
    10
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_fetch_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_validation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            timeout_secs: default_validation_timeout_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    5
}
fn default_validation_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub rules_url: String,
    pub faction_url_template: String,
}

impl SourceConfig {
    pub fn faction_url(&self, faction: &str) -> String {
        self.faction_url_template.replace("{faction}", faction)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExtractConfig {
    /// External glossary TOML; the built-in table is used when unset.
    #[serde(default)]
    pub glossary: Option<PathBuf>,
}

impl Config {
    /// Config rooted in a directory, used by tests and one-off tools.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            db: DbConfig {
                path: root.join("codex.sqlite"),
            },
            cache: CacheConfig {
                dir: root.join("cache"),
            },
            snapshots: SnapshotConfig {
                dir: root.join("snapshots"),
            },
            fetcher: FetcherConfig::default(),
            validation: ValidationConfig::default(),
            source: SourceConfig {
                rules_url: "https://wahapedia.ru/wh40k10ed/the-rules/core-rules/".to_string(),
                faction_url_template: "https://wahapedia.ru/wh40k10ed/factions/{faction}/"
                    .to_string(),
            },
            extract: ExtractConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.fetcher.rate_per_minute == 0 {
        anyhow::bail!("fetcher.rate_per_minute must be > 0");
    }
    if config.fetcher.retry_attempts == 0 {
        anyhow::bail!("fetcher.retry_attempts must be >= 1");
    }
    if config.validation.batch_size == 0 {
        anyhow::bail!("validation.batch_size must be >= 1");
    }
    if !config.source.faction_url_template.contains("{faction}") {
        anyhow::bail!(
            "source.faction_url_template must contain '{{faction}}': '{}'",
            config.source.faction_url_template
        );
    }
    Ok(())
}
