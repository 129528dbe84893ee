use crate::publish::PublishHandle;
use crate::queue::ItemReceiver;
use crate::traits::{CorrelationStore, Notifier, Renderer, SubscriberDirectory};
use crate::types::ItemEnvelope;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const DEFAULT_DISTRIBUTOR_WORKERS: usize = 1;

/// Why an item was dropped before reaching any recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Publish,
    Subscribers,
    Render,
}

/// Outcome of delivering one envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub page_url: Option<String>,
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: Option<SkipReason>,
}

impl DeliveryReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Pulls envelopes off the hand-off queue and fans each one out to its
/// source's subscribers.
#[derive(Clone)]
pub struct Distributor {
    worker_count: usize,
    publisher: Option<PublishHandle>,
    directory: Arc<dyn SubscriberDirectory>,
    renderer: Arc<dyn Renderer>,
    notifier: Arc<dyn Notifier>,
    correlations: Arc<dyn CorrelationStore>,
}

impl Distributor {
    pub fn new(
        directory: Arc<dyn SubscriberDirectory>,
        renderer: Arc<dyn Renderer>,
        notifier: Arc<dyn Notifier>,
        correlations: Arc<dyn CorrelationStore>,
    ) -> Self {
        Self {
            worker_count: DEFAULT_DISTRIBUTOR_WORKERS,
            publisher: None,
            directory,
            renderer,
            notifier,
            correlations,
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// Host every item through `publisher` before it is sent.
    pub fn with_publisher(mut self, publisher: PublishHandle) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Spawns the worker pool. Workers exit once `queue` is closed and drained.
    pub fn start(&self, queue: ItemReceiver) -> DistributorHandle {
        let workers = (0..self.worker_count)
            .map(|worker_id| {
                let distributor = self.clone();
                let queue = queue.clone();
                tokio::spawn(distributor.run_worker(worker_id, queue))
            })
            .collect();

        info!("Started {} distributor workers", self.worker_count);
        DistributorHandle { workers }
    }

    async fn run_worker(self, worker_id: usize, queue: ItemReceiver) {
        while let Some(envelope) = queue.recv().await {
            debug!("Worker {} broadcasting {:?}", worker_id, envelope.item.title);
            let key = envelope.dedup_key.clone();

            if AssertUnwindSafe(self.deliver(envelope)).catch_unwind().await.is_err() {
                error!("Worker {} panicked delivering {}; continuing", worker_id, key);
            }
        }
        debug!("Distributor worker {} exiting, queue closed", worker_id);
    }

    /// Publish (when enabled), resolve subscribers, render, then notify each
    /// recipient in turn. A failure before notifying drops the item; a failed
    /// recipient does not stop the others.
    pub async fn deliver(&self, mut envelope: ItemEnvelope) -> DeliveryReport {
        if let Some(publisher) = &self.publisher {
            match publisher.publish(&envelope).await {
                Ok(url) => envelope.page_url = Some(url),
                Err(e) => {
                    error!("Skipping {:?}, publish failed: {}", envelope.item.title, e);
                    return DeliveryReport::skipped(SkipReason::Publish);
                }
            }
        }

        let recipients = match self.directory.subscribers(envelope.source_id).await {
            Ok(recipients) => recipients,
            Err(e) => {
                error!(
                    "Skipping {:?}, could not resolve subscribers of {}: {}",
                    envelope.item.title, envelope.source_id, e
                );
                return DeliveryReport::skipped(SkipReason::Subscribers);
            }
        };

        let message = match self.renderer.render(&envelope) {
            Ok(message) => message,
            Err(e) => {
                error!("Error rendering message for {:?}: {}", envelope.item.title, e);
                return DeliveryReport::skipped(SkipReason::Render);
            }
        };

        let mut report = DeliveryReport {
            page_url: envelope.page_url.clone(),
            recipients: recipients.len(),
            ..DeliveryReport::default()
        };

        for recipient in &recipients {
            match self.notifier.notify(recipient, &message).await {
                Ok(message_id) => {
                    report.delivered += 1;
                    if let Err(e) = self
                        .correlations
                        .record_delivery(&message_id, envelope.source_id)
                        .await
                    {
                        error!("Failed to record delivery {}: {}", message_id, e);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Error sending message to {}: {}\n Message is: {}", recipient, e, message);
                }
            }
        }

        debug!(
            "Delivered {:?} to {}/{} recipients",
            envelope.item.title, report.delivered, report.recipients
        );
        report
    }
}

/// Join handle for a running distributor pool.
pub struct DistributorHandle {
    workers: Vec<JoinHandle<()>>,
}

impl DistributorHandle {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to drain the queue and exit.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("Distributor worker ended abnormally: {}", e);
            }
        }
    }
}
