use crate::queue::ItemSender;
use crate::rss_utils;
use crate::store::dedup_key;
use crate::traits::{FeedFetcher, SeenStore};
use crate::types::{ItemEnvelope, RelayError, Result, Source};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runtime record for one registered source.
struct WorkerHandle {
    source: Arc<RwLock<Source>>,
    /// Lives as long as the source is registered; cancelling it discards
    /// anything still on its way to the queue.
    cancel: CancellationToken,
    /// Child of `cancel` that only stops this worker's ticker.
    retire: CancellationToken,
    interval_seconds: u64,
    task: JoinHandle<()>,
    /// Workers replaced by an interval change that may still be finishing a poll.
    retired: Vec<JoinHandle<()>>,
}

/// Owns one periodic polling task per source and feeds new items into the
/// hand-off queue.
pub struct Scheduler {
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<dyn SeenStore>,
    queue: Mutex<Option<ItemSender>>,
    workers: Mutex<HashMap<Uuid, WorkerHandle>>,
}

impl Scheduler {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, store: Arc<dyn SeenStore>, queue: ItemSender) -> Self {
        Self {
            fetcher,
            store,
            queue: Mutex::new(Some(queue)),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an initial set of sources. Sources that fail to register are
    /// logged and skipped; returns how many were started.
    pub async fn start(&self, sources: Vec<Source>) -> usize {
        let mut started = 0;
        for source in sources {
            let url = source.url.clone();
            match self.add_source(source).await {
                Ok(()) => started += 1,
                Err(e) => error!("Failed to start poller for {}: {}", url, e),
            }
        }
        info!("Scheduler started {} pollers", started);
        started
    }

    /// Starts polling `source`. The first fetch fires right away on the new task;
    /// this call does not wait for it.
    pub async fn add_source(&self, source: Source) -> Result<()> {
        if source.poll_interval_seconds == 0 {
            return Err(RelayError::InvalidInterval { id: source.id });
        }

        let mut workers = self.workers.lock().await;
        if workers.contains_key(&source.id) {
            return Err(RelayError::DuplicateSource { id: source.id });
        }
        let sender = self.sender().await?;

        let id = source.id;
        let interval_seconds = source.poll_interval_seconds;
        info!("Started poller for {} every {}s", source.display_name(), interval_seconds);

        let handle = self.spawn_worker(
            Arc::new(RwLock::new(source)),
            interval_seconds,
            sender,
            CancellationToken::new(),
            Vec::new(),
        );
        workers.insert(id, handle);
        Ok(())
    }

    /// Cancels the source's polling task. A fetch already in flight runs to
    /// completion but nothing from it reaches the queue.
    pub async fn remove_source(&self, id: Uuid) -> Result<()> {
        let handle = self
            .workers
            .lock()
            .await
            .remove(&id)
            .ok_or(RelayError::UnknownSource { id })?;

        handle.cancel.cancel();
        let name = handle.source.read().await.display_name().to_string();
        info!("Stopped poller for {}", name);
        Ok(())
    }

    /// Shortens a source's poll interval by restarting its worker. Requests that
    /// would keep or widen the interval are ignored so the existing cadence is
    /// preserved. Returns whether the worker was restarted.
    ///
    /// Only the old ticker stops; a poll it has in flight still emits its items.
    pub async fn update_interval(&self, id: Uuid, new_interval_seconds: u64) -> Result<bool> {
        let mut workers = self.workers.lock().await;
        let current = workers
            .get(&id)
            .map(|h| h.interval_seconds)
            .ok_or(RelayError::UnknownSource { id })?;

        if new_interval_seconds >= current {
            debug!(
                "Ignoring interval change for {} ({}s -> {}s)",
                id, current, new_interval_seconds
            );
            return Ok(false);
        }
        if new_interval_seconds == 0 {
            return Err(RelayError::InvalidInterval { id });
        }
        let sender = self.sender().await?;

        let old = workers.remove(&id).ok_or(RelayError::UnknownSource { id })?;
        old.retire.cancel();
        old.source.write().await.poll_interval_seconds = new_interval_seconds;
        info!(
            "Restarting poller for {} ({}s -> {}s)",
            id, current, new_interval_seconds
        );

        let mut retired = old.retired;
        retired.retain(|task| !task.is_finished());
        retired.push(old.task);

        let handle = self.spawn_worker(old.source, new_interval_seconds, sender, old.cancel, retired);
        workers.insert(id, handle);
        Ok(true)
    }

    /// One-shot fetch returning the feed's human-readable title (or the URL when
    /// the feed has none). Touches neither the store nor the queue.
    pub async fn fetch_title_only(&self, url: &str) -> Result<String> {
        url::Url::parse(url)?;
        if !rss_utils::url::is_valid_feed_url(url) {
            return Err(RelayError::Fetch {
                url: url.to_string(),
                reason: "only http(s) feeds can be polled".to_string(),
            });
        }

        let feed = self.fetcher.fetch_feed(url).await?;
        Ok(feed.title.unwrap_or_else(|| url.to_string()))
    }

    /// Snapshot of a registered source, including its live error count.
    pub async fn source(&self, id: Uuid) -> Option<Source> {
        let shared = self.workers.lock().await.get(&id).map(|h| h.source.clone())?;
        let snapshot = shared.read().await.clone();
        Some(snapshot)
    }

    pub async fn source_ids(&self) -> Vec<Uuid> {
        self.workers.lock().await.keys().copied().collect()
    }

    pub async fn interval_seconds(&self, id: Uuid) -> Option<u64> {
        self.workers.lock().await.get(&id).map(|h| h.interval_seconds)
    }

    /// Cancels every worker, waits for them to exit, then releases the
    /// scheduler's queue sender. Distributor workers see the queue close once
    /// they have drained what is buffered.
    pub async fn stop(&self) {
        let handles: Vec<WorkerHandle> = self
            .workers
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            for task in handle.retired.into_iter().chain(std::iter::once(handle.task)) {
                if let Err(e) = task.await {
                    error!("Poller task ended abnormally: {}", e);
                }
            }
        }

        self.queue.lock().await.take();
        info!("Scheduler stopped");
    }

    async fn sender(&self) -> Result<ItemSender> {
        self.queue
            .lock()
            .await
            .clone()
            .ok_or(RelayError::SchedulerStopped)
    }

    fn spawn_worker(
        &self,
        source: Arc<RwLock<Source>>,
        interval_seconds: u64,
        queue: ItemSender,
        cancel: CancellationToken,
        retired: Vec<JoinHandle<()>>,
    ) -> WorkerHandle {
        let retire = cancel.child_token();
        let worker = SourceWorker {
            source: source.clone(),
            fetcher: self.fetcher.clone(),
            store: self.store.clone(),
            queue,
            cancel: cancel.clone(),
            retire: retire.clone(),
        };
        let task = tokio::spawn(worker.run(Duration::from_secs(interval_seconds)));

        WorkerHandle {
            source,
            cancel,
            retire,
            interval_seconds,
            task,
            retired,
        }
    }
}

/// The periodic loop of a single source.
struct SourceWorker {
    source: Arc<RwLock<Source>>,
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<dyn SeenStore>,
    queue: ItemSender,
    cancel: CancellationToken,
    retire: CancellationToken,
}

impl SourceWorker {
    async fn run(self, period: Duration) {
        let mut ticker = interval(period);
        // A slow poll pushes later ticks back instead of firing a burst.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.retire.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match AssertUnwindSafe(self.poll_once()).catch_unwind().await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    let name = self.display_name().await;
                    error!("Polling {} failed: {}", name, e);
                }
                Err(_) => {
                    let name = self.display_name().await;
                    error!("Polling {} panicked; waiting for next tick", name);
                }
            }
        }

        let name = self.display_name().await;
        debug!("Poller for {} exited", name);
    }

    /// One tick: fetch, then emit new items in feed order until the first item
    /// that was already seen.
    async fn poll_once(&self) -> Result<usize> {
        let (source_id, url, name) = {
            let source = self.source.read().await;
            (source.id, source.url.clone(), source.display_name().to_string())
        };
        info!("Polling source {}", name);

        let feed = match self.fetcher.fetch_feed(&url).await {
            Ok(feed) => feed,
            Err(e) => {
                let mut source = self.source.write().await;
                source.error_count = source.error_count.saturating_add(1);
                warn!(
                    "Polling feed {} error ({} failures): {}",
                    name, source.error_count, e
                );
                return Ok(0);
            }
        };

        let source_title = self.adopt_title(feed.title.as_deref()).await;
        let mut emitted = 0;

        for item in feed.items {
            if self.cancel.is_cancelled() {
                debug!("Source {} removed mid-poll, discarding remaining items", name);
                break;
            }

            let key = dedup_key(&url, &item.guid);
            if !self.store.mark_seen(&key).await? {
                // Feeds list newest first, so everything after this was seen too
                debug!("Reached already-seen item {} in {}", item.guid, name);
                break;
            }

            let envelope = ItemEnvelope {
                source_id,
                source_title: source_title.clone(),
                dedup_key: key,
                item,
                page_url: None,
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Source {} removed while waiting on the queue", name);
                    break;
                }
                sent = self.queue.send(envelope) => {
                    if sent.is_err() {
                        warn!("Hand-off queue closed, dropping items from {}", name);
                        break;
                    }
                    emitted += 1;
                }
            }
        }

        if emitted > 0 {
            info!("Sent {} new items from {} to distributor", emitted, name);
        }
        Ok(emitted)
    }

    async fn adopt_title(&self, feed_title: Option<&str>) -> String {
        let mut source = self.source.write().await;
        if source.title.is_empty() {
            if let Some(title) = feed_title {
                source.title = title.to_string();
            }
        }
        source.display_name().to_string()
    }

    async fn display_name(&self) -> String {
        self.source.read().await.display_name().to_string()
    }
}
