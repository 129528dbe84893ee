//! Round-robin pool of page-hosting accounts.
//!
//! All publishing goes through one consumer task that owns the clients and the
//! round-robin cursor, so at most one page is being created at any moment no
//! matter how many distributor workers are waiting. Callers talk to it through a
//! cloneable [`PublishHandle`] and wait on a private reply channel.

use crate::traits::{AccountProfile, PageRequest, PublishAccounts, PublishClient};
use crate::types::{ItemEnvelope, PublishError, RelayError, Result};
use backoff::backoff::{Backoff, Constant};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Fixed wait after a rate-limit signal before the next attempt.
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(10);

/// Pause between consecutive account creations during bootstrap.
pub const ACCOUNT_CREATION_PAUSE: Duration = Duration::from_secs(1);

/// Body used for items that carry no content, since pages cannot be empty.
pub const EMPTY_CONTENT: &str = "Empty Content";

#[derive(Debug, Clone)]
pub struct PublishPoolConfig {
    /// Accounts to create when no access tokens are supplied.
    pub account_count: usize,
    pub profile: AccountProfile,
    /// Existing accounts to reconnect. Takes precedence over `account_count`.
    pub access_tokens: Vec<String>,
    pub rate_limit_backoff: Duration,
    pub account_creation_pause: Duration,
}

impl Default for PublishPoolConfig {
    fn default() -> Self {
        Self {
            account_count: 1,
            profile: AccountProfile::default(),
            access_tokens: Vec::new(),
            rate_limit_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
            account_creation_pause: ACCOUNT_CREATION_PAUSE,
        }
    }
}

impl PageRequest {
    pub fn from_envelope(envelope: &ItemEnvelope) -> Self {
        let item = &envelope.item;
        let content_html = match item.content.as_deref() {
            Some(content) if !content.trim().is_empty() => content.to_string(),
            _ => EMPTY_CONTENT.to_string(),
        };

        Self {
            title: item.title.clone(),
            description: item.description.clone(),
            author_name: item.author.clone(),
            author_url: item.link.clone(),
            content_html,
        }
    }
}

pub struct PublishPool {
    clients: Vec<Box<dyn PublishClient>>,
    next: usize,
    rate_limit_backoff: Duration,
}

impl PublishPool {
    /// Reconnects the configured access tokens, or creates `account_count` new
    /// accounts one after another. Any failure aborts the whole bootstrap.
    pub async fn bootstrap(accounts: &dyn PublishAccounts, config: &PublishPoolConfig) -> Result<Self> {
        let mut clients = Vec::new();

        if config.access_tokens.is_empty() {
            for i in 0..config.account_count {
                if i > 0 {
                    tokio::time::sleep(config.account_creation_pause).await;
                }
                let client = accounts.create_account(&config.profile).await.map_err(|e| {
                    error!("Failed to create publishing account {}: {}", i + 1, e);
                    e
                })?;
                info!("Created publishing account {}", i + 1);
                clients.push(client);
            }
        } else {
            for token in &config.access_tokens {
                clients.push(accounts.connect(token).await?);
            }
            info!("Connected {} publishing accounts", clients.len());
        }

        Self::from_clients(clients, config.rate_limit_backoff)
    }

    pub fn from_clients(clients: Vec<Box<dyn PublishClient>>, rate_limit_backoff: Duration) -> Result<Self> {
        if clients.is_empty() {
            return Err(RelayError::Config(
                "publish pool needs at least one account".to_string(),
            ));
        }

        Ok(Self {
            clients,
            next: 0,
            rate_limit_backoff,
        })
    }

    /// Tokens of every account in the pool, e.g. to persist freshly created ones.
    pub fn access_tokens(&self) -> Vec<String> {
        self.clients.iter().map(|c| c.access_token().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Publishes `page`, sleeping and retrying on rate limits until the API
    /// either accepts the page or fails for another reason.
    pub async fn publish_with_retry(&mut self, page: &PageRequest) -> std::result::Result<String, PublishError> {
        let mut backoff = Constant::new(self.rate_limit_backoff);

        loop {
            match self.publish_once(page).await {
                Ok(url) => {
                    debug!("Published page {:?} at {}", page.title, url);
                    return Ok(url);
                }
                Err(PublishError::RateLimited { retry_after_seconds }) => {
                    let delay = backoff.next_backoff().unwrap_or(self.rate_limit_backoff);
                    warn!(
                        "Publishing API flood wait (asked for {:?}s), retrying {:?} in {:?}",
                        retry_after_seconds, page.title, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Error publishing page {:?}: {}", page.title, e);
                    return Err(e);
                }
            }
        }
    }

    /// One attempt on the current client. The cursor moves on whatever the outcome.
    async fn publish_once(&mut self, page: &PageRequest) -> std::result::Result<String, PublishError> {
        let client = &self.clients[self.next];
        let result = client.create_page(page).await;
        self.next = (self.next + 1) % self.clients.len();
        result
    }

    /// Moves the pool onto its consumer task. The task ends once every handle
    /// has been dropped.
    pub fn spawn(self) -> PublishHandle {
        let (requests, rx) = mpsc::channel(1);
        tokio::spawn(self.run(rx));
        PublishHandle { requests }
    }

    async fn run(mut self, mut requests: mpsc::Receiver<PublishRequest>) {
        while let Some(request) = requests.recv().await {
            let result = self.publish_with_retry(&request.page).await;
            if request.reply.send(result).is_err() {
                debug!("Publish caller went away before the result arrived");
            }
        }
        debug!("Publish pool stopped");
    }
}

struct PublishRequest {
    page: PageRequest,
    reply: oneshot::Sender<std::result::Result<String, PublishError>>,
}

/// Caller side of a running [`PublishPool`].
#[derive(Clone)]
pub struct PublishHandle {
    requests: mpsc::Sender<PublishRequest>,
}

impl PublishHandle {
    /// Hosts the envelope's item and returns the page URL. Waits for the pool's
    /// turn and any rate-limit backoff.
    pub async fn publish(&self, envelope: &ItemEnvelope) -> std::result::Result<String, PublishError> {
        self.publish_page(PageRequest::from_envelope(envelope)).await
    }

    pub async fn publish_page(&self, page: PageRequest) -> std::result::Result<String, PublishError> {
        let (reply, result) = oneshot::channel();
        self.requests
            .send(PublishRequest { page, reply })
            .await
            .map_err(|_| PublishError::PoolClosed)?;

        result.await.map_err(|_| PublishError::PoolClosed)?
    }
}
