// Shared fakes for the integration tests
#![allow(dead_code)]

pub use rss_broadcaster::types::*;
pub use rss_broadcaster::{
    dedup_key, hand_off_queue, Distributor, ItemReceiver, MemoryStore, Scheduler,
    StaticSubscriptions, TemplateRenderer,
};

use async_trait::async_trait;
use rss_broadcaster::traits::{
    AccountProfile, FeedFetcher, Notifier, PageRequest, PublishAccounts, PublishClient, Renderer,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Lets every spawned task run until it blocks again, advancing paused time by `secs`.
pub async fn settle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

pub fn feed_with(title: Option<&str>, guids: &[&str]) -> ParsedFeed {
    ParsedFeed {
        title: title.map(|t| t.to_string()),
        description: None,
        items: guids
            .iter()
            .map(|g| {
                let mut item = FeedItem::new(*g, format!("Item {}", g));
                item.link = Some(format!("https://example.com/{}", g));
                item.content = Some(format!("<p>Body of {}</p>", g));
                item
            })
            .collect(),
    }
}

pub fn feed(guids: &[&str]) -> ParsedFeed {
    feed_with(Some("Example Feed"), guids)
}

pub async fn drain(queue: &ItemReceiver) -> Vec<ItemEnvelope> {
    let mut items = Vec::new();
    while let Some(envelope) = queue.try_recv().await {
        items.push(envelope);
    }
    items
}

pub fn guids(envelopes: &[ItemEnvelope]) -> Vec<String> {
    envelopes.iter().map(|e| e.item.guid.clone()).collect()
}

#[derive(Clone)]
pub enum Step {
    Feed(ParsedFeed),
    Fail(String),
    Panic,
}

/// Per-URL scripted fetch results. Each fetch consumes one step; the last step
/// repeats once the script runs out.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    counts: Mutex<HashMap<String, usize>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into_iter().collect());
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.counts.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn next_step(&self, url: &str) -> Option<Step> {
        let mut scripts = self.scripts.lock().unwrap();
        let steps = scripts.get_mut(url)?;
        if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        }
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch_feed(&self, url: &str) -> Result<ParsedFeed> {
        *self.counts.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;

        match self.next_step(url) {
            Some(Step::Feed(feed)) => Ok(feed),
            Some(Step::Fail(reason)) => Err(RelayError::Fetch {
                url: url.to_string(),
                reason,
            }),
            Some(Step::Panic) => panic!("scripted fetch panic for {}", url),
            None => Err(RelayError::Fetch {
                url: url.to_string(),
                reason: "no script".to_string(),
            }),
        }
    }
}

/// Records every message and hands out ids 1001, 1002, ... Recipients listed in
/// `failing` get a notify error instead.
pub struct RecordingNotifier {
    next_id: AtomicU64,
    failing: HashSet<String>,
    pub sent: Mutex<Vec<(RecipientId, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::failing_for(&[])
    }

    pub fn failing_for(recipients: &[&str]) -> Self {
        Self {
            next_id: AtomicU64::new(1001),
            failing: recipients.iter().map(|r| r.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(RecipientId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &RecipientId, message: &str) -> Result<String> {
        if self.failing.contains(recipient) {
            return Err(RelayError::Notify(format!("chat {} not found", recipient)));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.clone(), message.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst).to_string())
    }
}

pub struct FailingRenderer;

impl Renderer for FailingRenderer {
    fn render(&self, _envelope: &ItemEnvelope) -> Result<String> {
        Err(RelayError::Render("template exploded".to_string()))
    }
}

/// A call made against a [`ScriptedClient`]: (client name, page title).
pub type CallLog = Arc<Mutex<Vec<(String, String)>>>;

/// Publishing account replaying scripted results. Once the script is
/// exhausted every call succeeds with `https://telegra.ph/<name>-<n>`.
pub struct ScriptedClient {
    name: String,
    results: Mutex<VecDeque<std::result::Result<String, PublishError>>>,
    calls: CallLog,
    served: AtomicUsize,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedClient {
    pub fn new(name: &str, results: Vec<std::result::Result<String, PublishError>>, calls: CallLog) -> Self {
        Self {
            name: name.to_string(),
            results: Mutex::new(results.into_iter().collect()),
            calls,
            served: AtomicUsize::new(0),
            delay: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Each call takes `delay`, tracking concurrent calls into the shared counters.
    pub fn slow(
        mut self,
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    ) -> Self {
        self.delay = Some(delay);
        self.in_flight = in_flight;
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn boxed(self) -> Box<dyn PublishClient> {
        Box::new(self)
    }
}

#[async_trait]
impl PublishClient for ScriptedClient {
    async fn create_page(&self, page: &PageRequest) -> std::result::Result<String, PublishError> {
        self.calls
            .lock()
            .unwrap()
            .push((self.name.clone(), page.title.clone()));

        if let Some(delay) = self.delay {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        let scripted = self.results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            let n = self.served.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("https://telegra.ph/{}-{}", self.name, n))
        })
    }

    fn access_token(&self) -> &str {
        &self.name
    }
}

/// Account factory handing out [`ScriptedClient`]s named `token-<n>`.
pub struct ScriptedAccounts {
    pub created: AtomicUsize,
    pub connected: Mutex<Vec<String>>,
    fail_on_creation: Option<usize>,
    calls: CallLog,
}

impl ScriptedAccounts {
    pub fn new(calls: CallLog) -> Self {
        Self {
            created: AtomicUsize::new(0),
            connected: Mutex::new(Vec::new()),
            fail_on_creation: None,
            calls,
        }
    }

    /// The `n`-th creation attempt (1-based) fails.
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on_creation = Some(n);
        self
    }
}

#[async_trait]
impl PublishAccounts for ScriptedAccounts {
    async fn create_account(
        &self,
        _profile: &AccountProfile,
    ) -> std::result::Result<Box<dyn PublishClient>, PublishError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_creation == Some(n) {
            return Err(PublishError::Other("SHORT_NAME_REQUIRED".to_string()));
        }
        Ok(ScriptedClient::new(&format!("token-{}", n), Vec::new(), self.calls.clone()).boxed())
    }

    async fn connect(&self, access_token: &str) -> std::result::Result<Box<dyn PublishClient>, PublishError> {
        self.connected.lock().unwrap().push(access_token.to_string());
        Ok(ScriptedClient::new(access_token, Vec::new(), self.calls.clone()).boxed())
    }
}

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn rate_limited() -> std::result::Result<String, PublishError> {
    Err(PublishError::RateLimited {
        retry_after_seconds: Some(7),
    })
}
