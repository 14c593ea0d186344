//! Queue store trait and types.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kusto_core::ResourceDescriptor;

use crate::error::QueueError;

/// A raw message read from a storage queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Message text (base64 JSON for ingestion and status queues).
    pub text: String,
    /// Handle required to delete a received message. Empty for peeked messages.
    pub pop_receipt: String,
    /// When the message was inserted into the queue.
    pub inserted_on: DateTime<Utc>,
    /// Number of times this message has been received.
    pub dequeue_count: u32,
}

/// Trait for storage queue backends.
///
/// Every operation addresses a queue by its [`ResourceDescriptor`], so one
/// store serves all queues handed out by the ingestion service.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append a message. `text` is sent as-is.
    async fn enqueue(&self, queue: &ResourceDescriptor, text: &str) -> Result<(), QueueError>;

    /// Read up to `max_messages` without hiding or removing them.
    async fn peek_messages(
        &self,
        queue: &ResourceDescriptor,
        max_messages: u32,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Receive up to `max_messages`, hiding them from other readers until
    /// deleted or until their visibility timeout lapses.
    async fn receive_messages(
        &self,
        queue: &ResourceDescriptor,
        max_messages: u32,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Permanently remove a received message.
    async fn delete_message(
        &self,
        queue: &ResourceDescriptor,
        message_id: &str,
        pop_receipt: &str,
    ) -> Result<(), QueueError>;
}

/// Blanket implementation so `Arc<dyn QueueStore>` can be used directly.
#[async_trait]
impl<T: QueueStore + ?Sized> QueueStore for Arc<T> {
    async fn enqueue(&self, queue: &ResourceDescriptor, text: &str) -> Result<(), QueueError> {
        (**self).enqueue(queue, text).await
    }

    async fn peek_messages(
        &self,
        queue: &ResourceDescriptor,
        max_messages: u32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        (**self).peek_messages(queue, max_messages).await
    }

    async fn receive_messages(
        &self,
        queue: &ResourceDescriptor,
        max_messages: u32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        (**self).receive_messages(queue, max_messages).await
    }

    async fn delete_message(
        &self,
        queue: &ResourceDescriptor,
        message_id: &str,
        pop_receipt: &str,
    ) -> Result<(), QueueError> {
        (**self).delete_message(queue, message_id, pop_receipt).await
    }
}
