use crate::parser::FeedParser;
use crate::traits::FeedFetcher;
use crate::types::{FetchConfig, ParsedFeed, RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Fetches feeds over HTTP and parses them with [`FeedParser`].
///
/// There is no retry here: a failed fetch is reported to the scheduler, which
/// waits for the source's next tick.
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    async fn fetch_body(&self, url: &str) -> Result<Vec<u8>> {
        let start_time = Instant::now();
        debug!("Fetching feed: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(RelayError::Fetch {
                url: url.to_string(),
                reason: format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            });
        }

        let max_bytes = self.config.max_feed_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > max_bytes {
                return Err(self.too_large(url, content_length as usize));
            }
        }

        let body = response.bytes().await?;
        if body.len() > max_bytes {
            return Err(self.too_large(url, body.len()));
        }

        info!(
            "Fetched feed: {} ({} bytes in {}ms)",
            url,
            body.len(),
            start_time.elapsed().as_millis()
        );
        Ok(body.to_vec())
    }

    fn too_large(&self, url: &str, size: usize) -> RelayError {
        RelayError::Fetch {
            url: url.to_string(),
            reason: format!(
                "feed size {}MB exceeds limit of {}MB",
                size / (1024 * 1024),
                self.config.max_feed_size_mb
            ),
        }
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch_feed(&self, url: &str) -> Result<ParsedFeed> {
        let body = self.fetch_body(url).await?;
        FeedParser::parse_feed(&body)
    }
}
