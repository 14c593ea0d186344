//! In-process queue store.
//!
//! Mirrors storage-queue semantics closely enough for local runs and tests:
//! received messages stay hidden until deleted or until the visibility
//! timeout lapses, and individual queues can be switched into a failing
//! state to exercise error paths.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use kusto_core::ResourceDescriptor;

use crate::error::QueueError;
use crate::store::{QueueMessage, QueueStore};

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

struct StoredMessage {
    id: String,
    text: String,
    inserted_on: DateTime<Utc>,
    dequeue_count: u32,
    pop_receipt: Option<String>,
    hidden_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.hidden_until.map_or(true, |until| until <= now)
    }

    fn to_message(&self) -> QueueMessage {
        QueueMessage {
            id: self.id.clone(),
            text: self.text.clone(),
            pop_receipt: self.pop_receipt.clone().unwrap_or_default(),
            inserted_on: self.inserted_on,
            dequeue_count: self.dequeue_count,
        }
    }
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Vec<StoredMessage>>,
    failing: HashSet<String>,
}

pub struct MemoryQueueStore {
    state: Mutex<State>,
    visibility_timeout: Duration,
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            visibility_timeout,
        }
    }

    fn key(queue: &ResourceDescriptor) -> String {
        queue.base_uri().to_string()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Provider("queue state poisoned".into()))
    }

    fn check_available(state: &State, queue: &ResourceDescriptor) -> Result<(), QueueError> {
        if state.failing.contains(&Self::key(queue)) {
            return Err(QueueError::Connection(format!("queue {queue} unavailable")));
        }
        Ok(())
    }

    /// Make every operation on `queue` fail until [`restore`](Self::restore) is called.
    pub fn fail_queue(&self, queue: &ResourceDescriptor) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(Self::key(queue));
        }
    }

    pub fn restore(&self, queue: &ResourceDescriptor) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.remove(&Self::key(queue));
        }
    }

    /// Texts of every message currently stored in `queue`, hidden ones included.
    pub fn message_texts(&self, queue: &ResourceDescriptor) -> Vec<String> {
        self.state
            .lock()
            .map(|state| {
                state
                    .queues
                    .get(&Self::key(queue))
                    .map(|msgs| msgs.iter().map(|m| m.text.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, queue: &ResourceDescriptor) -> usize {
        self.message_texts(queue).len()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, queue: &ResourceDescriptor, text: &str) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        Self::check_available(&state, queue)?;
        state
            .queues
            .entry(Self::key(queue))
            .or_default()
            .push(StoredMessage {
                id: Uuid::new_v4().to_string(),
                text: text.to_string(),
                inserted_on: Utc::now(),
                dequeue_count: 0,
                pop_receipt: None,
                hidden_until: None,
            });
        debug!(queue = %queue, "Enqueued message");
        Ok(())
    }

    async fn peek_messages(
        &self,
        queue: &ResourceDescriptor,
        max_messages: u32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let state = self.lock()?;
        Self::check_available(&state, queue)?;
        let now = Instant::now();
        Ok(state
            .queues
            .get(&Self::key(queue))
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.is_visible(now))
                    .take(max_messages as usize)
                    .map(|m| QueueMessage {
                        pop_receipt: String::new(),
                        ..m.to_message()
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn receive_messages(
        &self,
        queue: &ResourceDescriptor,
        max_messages: u32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.lock()?;
        Self::check_available(&state, queue)?;
        let now = Instant::now();
        let hidden_until = now + self.visibility_timeout;

        let Some(msgs) = state.queues.get_mut(&Self::key(queue)) else {
            return Ok(Vec::new());
        };
        Ok(msgs
            .iter_mut()
            .filter(|m| m.is_visible(now))
            .take(max_messages as usize)
            .map(|m| {
                m.dequeue_count += 1;
                m.pop_receipt = Some(Uuid::new_v4().to_string());
                m.hidden_until = Some(hidden_until);
                m.to_message()
            })
            .collect())
    }

    async fn delete_message(
        &self,
        queue: &ResourceDescriptor,
        message_id: &str,
        pop_receipt: &str,
    ) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        Self::check_available(&state, queue)?;
        let msgs = state
            .queues
            .get_mut(&Self::key(queue))
            .ok_or_else(|| QueueError::NotFound(queue.to_string()))?;

        let pos = msgs
            .iter()
            .position(|m| m.id == message_id && m.pop_receipt.as_deref() == Some(pop_receipt))
            .ok_or_else(|| {
                QueueError::Delete(format!("message {message_id} not found or receipt stale"))
            })?;
        msgs.remove(pos);
        Ok(())
    }
}
