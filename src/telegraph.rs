use crate::publish::EMPTY_CONTENT;
use crate::rss_utils::feed::extract_text_from_html;
use crate::traits::{AccountProfile, PageRequest, PublishAccounts, PublishClient};
use crate::types::{PublishError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const TELEGRAPH_API_URL: &str = "https://api.telegra.ph";

const MAX_TITLE_CHARS: usize = 256;
const MAX_AUTHOR_CHARS: usize = 128;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResult {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageResult {
    url: String,
}

/// Maps a Telegraph error string onto [`PublishError`]. `FLOOD_WAIT_<n>` is the
/// API's rate-limit signal.
pub fn classify_api_error(message: &str) -> PublishError {
    match message.strip_prefix("FLOOD_WAIT") {
        Some(rest) => PublishError::RateLimited {
            retry_after_seconds: rest.trim_start_matches('_').parse().ok(),
        },
        None => PublishError::Other(message.to_string()),
    }
}

/// Page body as Telegraph nodes: the item's text in a single paragraph.
pub fn content_nodes(html: &str) -> Value {
    let text = extract_text_from_html(html);
    let text = if text.is_empty() {
        EMPTY_CONTENT.to_string()
    } else {
        text
    };
    json!([{ "tag": "p", "children": [text] }])
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

async fn call<T: DeserializeOwned>(
    http: &Client,
    base_url: &str,
    method: &str,
    params: &Value,
) -> std::result::Result<T, PublishError> {
    debug!("Calling Telegraph {}", method);

    let response = http
        .post(format!("{}/{}", base_url, method))
        .json(params)
        .send()
        .await
        .map_err(|e| PublishError::Other(format!("{} request failed: {}", method, e)))?;

    let body: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| PublishError::Other(format!("{} returned malformed response: {}", method, e)))?;

    if body.ok {
        body.result
            .ok_or_else(|| PublishError::Other(format!("{} returned no result", method)))
    } else {
        Err(classify_api_error(body.error.as_deref().unwrap_or("unknown error")))
    }
}

/// Creates and reconnects Telegraph accounts.
pub struct TelegraphAccounts {
    http: Client,
    base_url: String,
}

impl TelegraphAccounts {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("RSS-Broadcaster/1.0")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: TELEGRAPH_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn client(&self, access_token: String) -> Box<dyn PublishClient> {
        Box::new(TelegraphClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            access_token,
        })
    }
}

#[async_trait]
impl PublishAccounts for TelegraphAccounts {
    async fn create_account(
        &self,
        profile: &AccountProfile,
    ) -> std::result::Result<Box<dyn PublishClient>, PublishError> {
        let params = json!({
            "short_name": profile.short_name,
            "author_name": profile.author_name,
            "author_url": profile.author_url,
        });
        let account: AccountResult = call(&self.http, &self.base_url, "createAccount", &params).await?;
        let token = account
            .access_token
            .ok_or_else(|| PublishError::Other("createAccount returned no access token".to_string()))?;

        Ok(self.client(token))
    }

    async fn connect(&self, access_token: &str) -> std::result::Result<Box<dyn PublishClient>, PublishError> {
        // Reject stale tokens at startup rather than on the first publish
        let params = json!({ "access_token": access_token, "fields": ["short_name"] });
        let _: Value = call(&self.http, &self.base_url, "getAccountInfo", &params).await?;

        Ok(self.client(access_token.to_string()))
    }
}

/// One authenticated Telegraph account.
pub struct TelegraphClient {
    http: Client,
    base_url: String,
    access_token: String,
}

impl TelegraphClient {
    fn page_params(&self, page: &PageRequest) -> Value {
        let title = if page.title.trim().is_empty() {
            "Untitled".to_string()
        } else {
            truncate(&page.title, MAX_TITLE_CHARS)
        };

        let mut params = json!({
            "access_token": self.access_token,
            "title": title,
            "content": content_nodes(&page.content_html),
            "return_content": false,
        });
        if let Some(author) = &page.author_name {
            params["author_name"] = json!(truncate(author, MAX_AUTHOR_CHARS));
        }
        if let Some(url) = &page.author_url {
            params["author_url"] = json!(url);
        }
        params
    }
}

#[async_trait]
impl PublishClient for TelegraphClient {
    async fn create_page(&self, page: &PageRequest) -> std::result::Result<String, PublishError> {
        let created: PageResult =
            call(&self.http, &self.base_url, "createPage", &self.page_params(page)).await?;
        Ok(created.url)
    }

    fn access_token(&self) -> &str {
        &self.access_token
    }
}
