use crate::distributor::DEFAULT_DISTRIBUTOR_WORKERS;
use crate::publish::{PublishPoolConfig, ACCOUNT_CREATION_PAUSE, DEFAULT_RATE_LIMIT_BACKOFF};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::render::DEFAULT_TEMPLATE;
use crate::rss_utils;
use crate::telegraph::TELEGRAPH_API_URL;
use crate::traits::AccountProfile;
use crate::types::{FetchConfig, RecipientId, RelayError, Result, Source, DEFAULT_POLL_INTERVAL_SECONDS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

pub const ENV_DATABASE_URL: &str = "RELAY_DATABASE_URL";
pub const ENV_DISTRIBUTOR_WORKERS: &str = "RELAY_DISTRIBUTOR_WORKERS";
pub const ENV_QUEUE_CAPACITY: &str = "RELAY_QUEUE_CAPACITY";
pub const ENV_TEMPLATE: &str = "RELAY_TEMPLATE";
pub const ENV_LOG_MODE: &str = "RELAY_LOG_MODE";
pub const ENV_LOG_PATH: &str = "RELAY_LOG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub database_url: String,
    pub queue_capacity: usize,
    pub distributor_workers: usize,
    pub template: String,
    pub log: LogSettings,
    pub fetch: FetchConfig,
    pub publish: PublishSettings,
    pub sources: Vec<SourceConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://relay.db".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            distributor_workers: DEFAULT_DISTRIBUTOR_WORKERS,
            template: DEFAULT_TEMPLATE.to_string(),
            log: LogSettings::default(),
            fetch: FetchConfig::default(),
            publish: PublishSettings::default(),
            sources: Vec::new(),
        }
    }
}

/// `human` is the plain `fmt` layout, `machine` writes one JSON object per event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    #[default]
    Human,
    Machine,
}

impl std::str::FromStr for LogMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" => Ok(LogMode::Human),
            "machine" => Ok(LogMode::Machine),
            other => Err(RelayError::Config(format!(
                "log mode must be \"human\" or \"machine\", got {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub mode: LogMode,
    /// Append to this file instead of stdout.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    pub enabled: bool,
    pub account_count: usize,
    pub short_name: String,
    pub author_name: String,
    pub author_url: String,
    pub access_tokens: Vec<String>,
    pub rate_limit_backoff_seconds: u64,
    pub account_creation_pause_ms: u64,
    pub api_url: String,
    pub api_timeout_seconds: u64,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            account_count: 1,
            short_name: "rss-broadcaster".to_string(),
            author_name: String::new(),
            author_url: String::new(),
            access_tokens: Vec::new(),
            rate_limit_backoff_seconds: DEFAULT_RATE_LIMIT_BACKOFF.as_secs(),
            account_creation_pause_ms: ACCOUNT_CREATION_PAUSE.as_millis() as u64,
            api_url: TELEGRAPH_API_URL.to_string(),
            api_timeout_seconds: 30,
        }
    }
}

impl PublishSettings {
    pub fn pool_config(&self) -> PublishPoolConfig {
        PublishPoolConfig {
            account_count: self.account_count,
            profile: AccountProfile {
                short_name: self.short_name.clone(),
                author_name: self.author_name.clone(),
                author_url: self.author_url.clone(),
            },
            access_tokens: self.access_tokens.clone(),
            rate_limit_backoff: Duration::from_secs(self.rate_limit_backoff_seconds),
            account_creation_pause: Duration::from_millis(self.account_creation_pause_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default)]
    pub subscribers: Vec<RecipientId>,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

impl SourceConfig {
    /// The id is derived from the URL so it survives restarts, keeping stored
    /// correlation records pointing at the same source.
    pub fn to_source(&self) -> Source {
        Source::new(&self.url, &self.title, self.poll_interval_seconds)
            .with_id(Uuid::new_v5(&Uuid::NAMESPACE_URL, self.url.as_bytes()))
    }
}

impl RelayConfig {
    /// Reads `path` if it exists (defaults otherwise), then applies environment
    /// overrides. A `.env` file in the working directory is honoured.
    pub fn load(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml_str(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(workers) = lookup(ENV_DISTRIBUTOR_WORKERS) {
            self.distributor_workers = parse_count(ENV_DISTRIBUTOR_WORKERS, &workers)?;
        }
        if let Some(capacity) = lookup(ENV_QUEUE_CAPACITY) {
            self.queue_capacity = parse_count(ENV_QUEUE_CAPACITY, &capacity)?;
        }
        if let Some(template) = lookup(ENV_TEMPLATE) {
            self.template = template;
        }
        if let Some(mode) = lookup(ENV_LOG_MODE) {
            self.log.mode = mode.parse()?;
        }
        if let Some(path) = lookup(ENV_LOG_PATH) {
            self.log.path = (!path.trim().is_empty()).then(|| PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(RelayError::Config("queue_capacity must be at least 1".to_string()));
        }
        if self.distributor_workers == 0 {
            return Err(RelayError::Config(
                "distributor_workers must be at least 1".to_string(),
            ));
        }
        if self.publish.enabled
            && self.publish.access_tokens.is_empty()
            && self.publish.account_count == 0
        {
            return Err(RelayError::Config(
                "publishing is enabled but has no access tokens and account_count is 0".to_string(),
            ));
        }

        for source in &self.sources {
            if !rss_utils::url::is_valid_feed_url(&source.url) {
                return Err(RelayError::Config(format!("invalid feed url {:?}", source.url)));
            }
            if source.poll_interval_seconds == 0 {
                return Err(RelayError::Config(format!(
                    "poll_interval_seconds for {} must be at least 1",
                    source.url
                )));
            }
        }
        Ok(())
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|e| RelayError::Config(format!("{} must be a number, got {:?}: {}", key, value, e)))
}
