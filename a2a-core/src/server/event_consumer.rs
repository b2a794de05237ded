//! Drains an [`EventQueue`] into a stream of events.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, error};

use super::{Event, EventQueue, EventStream};
use crate::error::{A2AError, QueueError, Result};

/// How long a single dequeue waits before the consumer re-checks the queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Slot where the background agent execution records its failure.
///
/// The consumer surfaces a recorded failure as an error item at the next
/// point it would otherwise keep consuming.
#[derive(Debug, Clone, Default)]
pub struct AgentTaskCallback {
    failure: Arc<Mutex<Option<A2AError>>>,
}

impl AgentTaskCallback {
    /// Records a failure. Only the first one is kept.
    pub fn record(&self, error: A2AError) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Takes the recorded failure, if any.
    pub fn take(&self) -> Option<A2AError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Reads events from one queue until the execution is over.
#[derive(Debug)]
pub struct EventConsumer {
    queue: Arc<EventQueue>,
    poll_interval: Duration,
    callback: AgentTaskCallback,
    attached: bool,
}

impl EventConsumer {
    /// Creates a consumer and registers it with the queue.
    pub fn new(queue: Arc<EventQueue>) -> Self {
        queue.attach_consumer();
        Self {
            queue,
            poll_interval: DEFAULT_POLL_INTERVAL,
            callback: AgentTaskCallback::default(),
            attached: true,
        }
    }

    /// Sets the re-poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Handle the producer uses to report a failed execution.
    #[must_use]
    pub fn agent_task_callback(&self) -> AgentTaskCallback {
        self.callback.clone()
    }

    /// The queue being consumed.
    #[must_use]
    pub const fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Dequeues a single event, waiting at most one poll interval.
    ///
    /// Returns [`QueueError::Empty`] when nothing arrived in time and
    /// [`QueueError::Closed`] when the queue is closed and drained.
    pub async fn consume_one(&self) -> Result<Event> {
        match timeout(self.poll_interval, self.queue.dequeue(true)).await {
            Ok(Ok(event)) => {
                self.queue.task_done();
                Ok(event)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(QueueError::Empty.into()),
        }
    }

    /// Turns the consumer into a stream of events.
    ///
    /// The stream ends after a final event (see [`Event::is_final`]), or once
    /// the queue is closed and drained. A failure recorded through
    /// [`agent_task_callback`](Self::agent_task_callback) is yielded as an
    /// error once the buffered events are drained, and ends the stream.
    /// Events that fail validation are logged and skipped.
    pub fn consume_all(self) -> EventStream {
        futures::stream::unfold(Some(self), |state| async move {
            let mut consumer = state?;
            loop {
                let dequeued = timeout(consumer.poll_interval, consumer.queue.dequeue(true)).await;
                let event = match dequeued {
                    Ok(Ok(event)) => event,
                    Ok(Err(QueueError::Closed)) => {
                        debug!("Event queue closed, ending consumption");
                        return consumer.callback.take().map(|err| (Err(err), None));
                    }
                    Ok(Err(QueueError::Empty)) | Err(_) => match consumer.callback.take() {
                        Some(err) => return Some((Err(err), None)),
                        None => continue,
                    },
                };
                consumer.queue.task_done();

                if let Err(e) = event.validate() {
                    error!(error = %e, "Invalid event format received");
                    continue;
                }

                if event.is_final() {
                    consumer.finish().await;
                    return Some((Ok(event), None));
                }
                return Some((Ok(event), Some(consumer)));
            }
        })
        .boxed()
    }

    async fn finish(&mut self) {
        self.detach();
        self.queue.close().await;
    }

    fn detach(&mut self) {
        if self.attached {
            self.attached = false;
            self.queue.detach_consumer();
        }
    }
}

impl Drop for EventConsumer {
    fn drop(&mut self) {
        self.detach();
    }
}
