//! Bounded hand-off between scheduler workers and distributor workers.
//!
//! Every scheduler worker owns a clone of the [`ItemSender`]; the channel closes
//! once the scheduler has stopped and the last worker holding a clone has exited.
//! Distributor workers share one [`ItemReceiver`] and drain whatever is buffered
//! before they observe the closure.

use crate::types::ItemEnvelope;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Buffered envelopes before producers start waiting.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

pub type ItemSender = mpsc::Sender<ItemEnvelope>;

/// Multi-consumer end of the hand-off queue.
#[derive(Clone)]
pub struct ItemReceiver {
    inner: Arc<Mutex<mpsc::Receiver<ItemEnvelope>>>,
    // Reads queue depth without contending with a worker parked in `recv`
    probe: mpsc::WeakSender<ItemEnvelope>,
}

impl ItemReceiver {
    /// Waits for the next envelope. `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<ItemEnvelope> {
        let mut rx = self.inner.lock().await;
        rx.recv().await
    }

    /// Non-blocking variant, `None` when nothing is buffered right now.
    pub async fn try_recv(&self) -> Option<ItemEnvelope> {
        let mut rx = self.inner.lock().await;
        rx.try_recv().ok()
    }

    /// Buffered envelopes right now.
    pub fn len(&self) -> usize {
        if let Some(sender) = self.probe.upgrade() {
            return sender.max_capacity() - sender.capacity();
        }
        // Every producer is gone; only the receiver knows what is left
        self.inner.try_lock().map(|rx| rx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn hand_off_queue(capacity: usize) -> (ItemSender, ItemReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let probe = tx.downgrade();
    (
        tx,
        ItemReceiver {
            inner: Arc::new(Mutex::new(rx)),
            probe,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeedItem;
    use uuid::Uuid;

    fn envelope(guid: &str) -> ItemEnvelope {
        ItemEnvelope {
            source_id: Uuid::new_v4(),
            source_title: "t".into(),
            dedup_key: guid.into(),
            item: FeedItem::new(guid, guid),
            page_url: None,
        }
    }

    #[tokio::test]
    async fn drains_buffered_items_after_close() {
        let (tx, rx) = hand_off_queue(DEFAULT_QUEUE_CAPACITY);
        tx.send(envelope("a")).await.unwrap();
        tx.send(envelope("b")).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().dedup_key, "a");
        assert_eq!(rx.recv().await.unwrap().dedup_key, "b");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_queue_rejects_try_send() {
        let (tx, rx) = hand_off_queue(1);
        tx.send(envelope("a")).await.unwrap();
        assert!(tx.try_send(envelope("b")).is_err());
        assert_eq!(rx.len(), 1);

        drop(tx);
        assert_eq!(rx.len(), 1);
    }

    #[tokio::test]
    async fn send_waits_until_a_slot_frees() {
        let (tx, rx) = hand_off_queue(1);
        tx.send(envelope("a")).await.unwrap();

        let mut blocked = tokio_test::task::spawn(tx.send(envelope("b")));
        tokio_test::assert_pending!(blocked.poll());

        assert_eq!(rx.recv().await.unwrap().dedup_key, "a");
        assert!(blocked.is_woken());
        tokio_test::assert_ready_ok!(blocked.poll());
    }
}
