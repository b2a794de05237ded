//! Per-task event queue registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{DEFAULT_MAX_QUEUE_SIZE, EventQueue};
use crate::error::{A2AError, Result};

/// Owns the live [`EventQueue`] of every running task.
///
/// The request handler is the only writer. `tap` may be called concurrently
/// by a streaming caller and a resubscribing caller.
#[async_trait]
pub trait QueueManager: Send + Sync {
    /// Registers an existing queue. Fails if the task already has a live one.
    async fn add(&self, task_id: &str, queue: Arc<EventQueue>) -> Result<()>;

    /// Returns the queue registered for the task.
    async fn get(&self, task_id: &str) -> Option<Arc<EventQueue>>;

    /// Returns the task's live queue, creating it if there is none.
    async fn create(&self, task_id: &str) -> Arc<EventQueue>;

    /// Taps the task's live queue. `None` if the task has no live queue.
    async fn tap(&self, task_id: &str) -> Option<Arc<EventQueue>>;

    /// Closes and forgets the task's queue. Unknown tasks are ignored.
    async fn close(&self, task_id: &str);
}

/// Process-local [`QueueManager`].
#[derive(Debug)]
pub struct InMemoryQueueManager {
    queues: RwLock<HashMap<String, Arc<EventQueue>>>,
    max_size: usize,
}

impl Default for InMemoryQueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueManager {
    /// Creates a manager whose queues hold [`DEFAULT_MAX_QUEUE_SIZE`] events.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_QUEUE_SIZE)
    }

    /// Creates a manager whose queues hold `max_size` events.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            max_size,
        }
    }

    /// Number of registered queues.
    pub async fn len(&self) -> usize {
        self.queues.read().await.len()
    }

    /// Returns true if no queue is registered.
    pub async fn is_empty(&self) -> bool {
        self.queues.read().await.is_empty()
    }
}

#[async_trait]
impl QueueManager for InMemoryQueueManager {
    async fn add(&self, task_id: &str, queue: Arc<EventQueue>) -> Result<()> {
        let mut queues = self.queues.write().await;
        if queues.get(task_id).is_some_and(|q| !q.is_closed()) {
            return Err(A2AError::InternalError(format!(
                "Event queue already exists for task {task_id}"
            )));
        }
        queues.insert(task_id.to_string(), queue);
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Option<Arc<EventQueue>> {
        self.queues.read().await.get(task_id).cloned()
    }

    async fn create(&self, task_id: &str) -> Arc<EventQueue> {
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get(task_id)
            && !queue.is_closed()
        {
            return Arc::clone(queue);
        }
        debug!(task_id = %task_id, "Creating event queue");
        let queue = Arc::new(EventQueue::with_max_size(self.max_size));
        queues.insert(task_id.to_string(), Arc::clone(&queue));
        queue
    }

    async fn tap(&self, task_id: &str) -> Option<Arc<EventQueue>> {
        let queues = self.queues.read().await;
        queues
            .get(task_id)
            .filter(|q| !q.is_closed())
            .map(|q| q.tap())
    }

    async fn close(&self, task_id: &str) {
        let removed = self.queues.write().await.remove(task_id);
        match removed {
            Some(queue) => queue.close().await,
            None => debug!(task_id = %task_id, "No event queue to close"),
        }
    }
}
