use crate::types::{ItemEnvelope, ParsedFeed, PublishError, RecipientId, Result};
use async_trait::async_trait;
use uuid::Uuid;

/// Fetches and parses a feed by URL.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Items come back in the order the feed lists them (newest first for most feeds).
    async fn fetch_feed(&self, url: &str) -> Result<ParsedFeed>;
}

/// Records which feed items have already been processed.
///
/// Implementations must tolerate concurrent calls from every scheduler worker.
#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Marks `key` as seen. Returns `true` only when this call inserted it, so a
    /// single call doubles as the duplicate check.
    async fn mark_seen(&self, key: &str) -> Result<bool>;
}

/// Maps delivered message ids back to the source they came from.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn record_delivery(&self, message_id: &str, source_id: Uuid) -> Result<()>;

    async fn source_for_message(&self, message_id: &str) -> Result<Option<Uuid>>;

    /// Returns whether a record was removed.
    async fn forget_message(&self, message_id: &str) -> Result<bool>;
}

/// Resolves who is subscribed to a source right now.
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn subscribers(&self, source_id: Uuid) -> Result<Vec<RecipientId>>;
}

pub trait Renderer: Send + Sync {
    fn render(&self, envelope: &ItemEnvelope) -> Result<String>;
}

/// Outbound message transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends `message` and returns the transport's id for the delivered message.
    async fn notify(&self, recipient: &RecipientId, message: &str) -> Result<String>;
}

/// Page fields handed to a publishing account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub title: String,
    pub description: Option<String>,
    pub author_name: Option<String>,
    pub author_url: Option<String>,
    pub content_html: String,
}

/// Profile used when creating new publishing accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccountProfile {
    pub short_name: String,
    pub author_name: String,
    pub author_url: String,
}

/// One authenticated account of the page-hosting service.
#[async_trait]
pub trait PublishClient: Send + Sync {
    /// Creates a page and returns its public URL.
    async fn create_page(&self, page: &PageRequest) -> std::result::Result<String, PublishError>;

    fn access_token(&self) -> &str;
}

/// Creates or reconnects publishing accounts.
#[async_trait]
pub trait PublishAccounts: Send + Sync {
    async fn create_account(
        &self,
        profile: &AccountProfile,
    ) -> std::result::Result<Box<dyn PublishClient>, PublishError>;

    async fn connect(&self, access_token: &str) -> std::result::Result<Box<dyn PublishClient>, PublishError>;
}
