use crate::traits::Notifier;
use crate::types::{RecipientId, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Notifier that writes each message to the log instead of a chat transport.
/// Message ids count up from `first_id`.
pub struct LogNotifier {
    next_id: AtomicU64,
}

impl LogNotifier {
    pub fn new(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
        }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &RecipientId, message: &str) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!("Message {} to {}:\n{}", id, recipient, message);
        Ok(id.to_string())
    }
}
