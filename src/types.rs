use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Poll cadence used when a source is registered without one.
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 300;

/// Identifier of whoever receives notifications (a chat id for most transports).
pub type RecipientId = String;

/// A polled content feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub poll_interval_seconds: u64,
    pub error_count: u32,
}

impl Source {
    pub fn new(url: impl Into<String>, title: impl Into<String>, poll_interval_seconds: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            title: title.into(),
            poll_interval_seconds,
            error_count: 0,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Title for log lines and rendered messages, falling back to the URL.
    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// One entry of a fetched feed, in the order the feed lists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub guid: String,
    pub title: String,
    pub content: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedItem {
    pub fn new(guid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            title: title.into(),
            content: None,
            description: None,
            author: None,
            link: None,
            published_at: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub items: Vec<FeedItem>,
}

/// A newly discovered item travelling from the scheduler to the distributor.
#[derive(Debug, Clone)]
pub struct ItemEnvelope {
    pub source_id: Uuid,
    pub source_title: String,
    pub dedup_key: String,
    pub item: FeedItem,
    /// Hosted copy of the item, filled in by the distributor when publishing is enabled.
    pub page_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "RSS-Broadcaster/1.0".to_string(),
            timeout_seconds: 30,
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Source already registered: {id}")]
    DuplicateSource { id: Uuid },

    #[error("Source not registered: {id}")]
    UnknownSource { id: Uuid },

    #[error("Poll interval must be at least one second (source {id})")]
    InvalidInterval { id: Uuid },

    #[error("Scheduler has been stopped")]
    SchedulerStopped,

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Notify error: {0}")]
    Notify(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the external page-hosting API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("rate limited by publishing API (retry after {retry_after_seconds:?}s)")]
    RateLimited { retry_after_seconds: Option<u64> },

    #[error("{0}")]
    Other(String),

    #[error("publish pool is not running")]
    PoolClosed,
}

pub type Result<T> = std::result::Result<T, RelayError>;
