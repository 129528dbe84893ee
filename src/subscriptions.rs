use crate::traits::SubscriberDirectory;
use crate::types::{RecipientId, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory `source -> recipients` directory.
///
/// Lookups return the recipients at the moment of the call, so a subscription
/// added while an item is queued still receives it.
#[derive(Default)]
pub struct StaticSubscriptions {
    recipients: RwLock<HashMap<Uuid, Vec<RecipientId>>>,
}

impl StaticSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the recipient was already subscribed.
    pub async fn subscribe(&self, source_id: Uuid, recipient: impl Into<RecipientId>) -> bool {
        let recipient = recipient.into();
        let mut map = self.recipients.write().await;
        let list = map.entry(source_id).or_default();
        if list.contains(&recipient) {
            return false;
        }
        list.push(recipient);
        true
    }

    pub async fn unsubscribe(&self, source_id: Uuid, recipient: &str) -> bool {
        let mut map = self.recipients.write().await;
        let Some(list) = map.get_mut(&source_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r != recipient);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(&source_id);
        }
        removed
    }
}

#[async_trait]
impl SubscriberDirectory for StaticSubscriptions {
    async fn subscribers(&self, source_id: Uuid) -> Result<Vec<RecipientId>> {
        Ok(self
            .recipients
            .read()
            .await
            .get(&source_id)
            .cloned()
            .unwrap_or_default())
    }
}
