//! Message store
//!
//! Persistence for chat messages. The hub saves every message here
//! before routing it and serves conversation history from it.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::message::ChatMessage;
use crate::types::UserId;

/// Messages per history page
pub const HISTORY_PAGE_SIZE: usize = 10;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message
    async fn save(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Load messages exchanged between `a` and `b`, in either direction
    ///
    /// Skips the `offset` most recent messages, takes up to `limit` of the
    /// ones before them, and returns that page oldest first.
    async fn load(
        &self,
        a: &UserId,
        b: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

/// In-memory message store, kept in receipt order
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn save(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn load(
        &self,
        a: &UserId,
        b: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.read().await;
        let mut page: Vec<ChatMessage> = messages
            .iter()
            .rev()
            .filter(|m| m.is_between(a, b))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }
}

/// Load one history page of the conversation between `me` and `other`
pub async fn history_page(
    store: &dyn MessageStore,
    me: &UserId,
    other: &UserId,
    offset: usize,
) -> Result<Vec<ChatMessage>, StoreError> {
    store.load(me, other, HISTORY_PAGE_SIZE, offset).await
}
