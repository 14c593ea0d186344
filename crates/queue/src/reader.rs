//! One logical status feed over several physical queues.
//!
//! The service shards status notifications across queues. A read asks each
//! queue (in shuffled order) for its even share of `n`, then tops up the
//! shortfall from the queues that returned a full share and so may hold
//! more. Peek leaves queues untouched; pop deletes messages only after the
//! whole read has succeeded.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use kusto_core::ResourceDescriptor;

use crate::error::QueueError;
use crate::status::{StatusMessage, StatusQueueKind};
use crate::store::{QueueMessage, QueueStore};

/// Storage queues return at most 32 messages per read.
const MAX_MESSAGES_PER_READ: u32 = 32;

pub struct StatusQueueReader {
    kind: StatusQueueKind,
    queues: Vec<ResourceDescriptor>,
    store: Arc<dyn QueueStore>,
}

impl StatusQueueReader {
    pub fn new(
        kind: StatusQueueKind,
        queues: Vec<ResourceDescriptor>,
        store: Arc<dyn QueueStore>,
    ) -> Self {
        Self { kind, queues, store }
    }

    pub fn kind(&self) -> StatusQueueKind {
        self.kind
    }

    pub fn queues(&self) -> &[ResourceDescriptor] {
        &self.queues
    }

    /// `true` when a one-message peek on every queue comes back empty.
    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        for queue in &self.queues {
            if !self.store.peek_messages(queue, 1).await?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Up to `n` messages, leaving them in their queues.
    pub async fn peek(&self, n: usize) -> Result<Vec<StatusMessage>, QueueError> {
        self.read(n, false).await
    }

    /// Up to `n` messages, removing them from their queues once the whole
    /// read has succeeded.
    ///
    /// A storage error anywhere in the read deletes nothing; received
    /// messages reappear once their visibility timeout lapses. Messages that
    /// fail to decode are skipped and left in place.
    pub async fn pop(&self, n: usize) -> Result<Vec<StatusMessage>, QueueError> {
        self.read(n, true).await
    }

    async fn read(&self, n: usize, destructive: bool) -> Result<Vec<StatusMessage>, QueueError> {
        if n == 0 || self.queues.is_empty() {
            return Ok(Vec::new());
        }

        let mut queues: Vec<&ResourceDescriptor> = self.queues.iter().collect();
        queues.shuffle(&mut rand::thread_rng());

        // A zero share would skip the first pass entirely when n < queue count.
        let share = (n / queues.len()).max(1);
        let mut result = Vec::with_capacity(n);
        let mut received = Vec::new();
        let mut may_have_more = Vec::new();

        for queue in &queues {
            let remaining = n - result.len();
            if remaining == 0 {
                break;
            }
            let want = share.min(remaining);
            let read = self
                .read_queue(*queue, 0, want, destructive, &mut result, &mut received)
                .await?;
            if !read.exhausted {
                may_have_more.push((*queue, read.consumed));
            }
        }

        for (queue, consumed) in may_have_more {
            let remaining = n - result.len();
            if remaining == 0 {
                break;
            }
            self.read_queue(queue, consumed, remaining, destructive, &mut result, &mut received)
                .await?;
        }

        if destructive {
            self.delete_received(received).await;
        }

        debug!(
            kind = ?self.kind,
            requested = n,
            returned = result.len(),
            destructive,
            "Read status messages"
        );
        Ok(result)
    }

    /// Read up to `want` decodable messages from one queue into `out`.
    ///
    /// `skip` is the number of raw messages this call already stepped over
    /// in the queue. Received messages are hidden, so pops ignore it; peeks
    /// always start at the head of the queue and must step over them.
    async fn read_queue<'q>(
        &self,
        queue: &'q ResourceDescriptor,
        skip: usize,
        want: usize,
        destructive: bool,
        out: &mut Vec<StatusMessage>,
        received: &mut Vec<(&'q ResourceDescriptor, QueueMessage)>,
    ) -> Result<QueueRead, QueueError> {
        if !destructive {
            let batch = ((skip + want) as u32).min(MAX_MESSAGES_PER_READ);
            let messages = self.store.peek_messages(queue, batch).await?;
            let fetched = messages.len();
            let mut added = 0;
            let mut consumed = skip;
            for message in messages.into_iter().skip(skip) {
                if added == want {
                    break;
                }
                consumed += 1;
                if let Some(status) = self.decode(queue, &message) {
                    out.push(status);
                    added += 1;
                }
            }
            return Ok(QueueRead {
                consumed,
                exhausted: fetched < batch as usize,
            });
        }

        let mut added = 0;
        let mut consumed = 0;
        while added < want {
            let batch = ((want - added) as u32).min(MAX_MESSAGES_PER_READ);
            let messages = self.store.receive_messages(queue, batch).await?;
            let fetched = messages.len();
            for message in messages {
                consumed += 1;
                if let Some(status) = self.decode(queue, &message) {
                    out.push(status);
                    received.push((queue, message));
                    added += 1;
                }
            }
            if fetched < batch as usize {
                return Ok(QueueRead {
                    consumed,
                    exhausted: true,
                });
            }
        }
        Ok(QueueRead {
            consumed,
            exhausted: false,
        })
    }

    fn decode(&self, queue: &ResourceDescriptor, message: &QueueMessage) -> Option<StatusMessage> {
        match StatusMessage::decode(self.kind, &message.text) {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(
                    queue = %queue,
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    error = %err,
                    "Skipping undecodable status message"
                );
                None
            }
        }
    }

    /// Delete popped messages. Each one is already in the caller's result,
    /// so a failed delete only means the message is delivered again later.
    async fn delete_received(&self, received: Vec<(&ResourceDescriptor, QueueMessage)>) {
        for (queue, message) in received {
            if let Err(err) = self
                .store
                .delete_message(queue, &message.id, &message.pop_receipt)
                .await
            {
                warn!(
                    queue = %queue,
                    message_id = %message.id,
                    error = %err,
                    "Failed to delete popped status message"
                );
            }
        }
    }
}

struct QueueRead {
    /// Raw messages stepped over, decodable or not.
    consumed: usize,
    /// The queue returned fewer messages than asked for.
    exhausted: bool,
}
