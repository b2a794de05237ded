//! Bounded, closable, multicast event queue.
//!
//! One [`EventQueue`] carries the events of one task execution. The agent
//! enqueues, an [`EventConsumer`](super::EventConsumer) dequeues, and any
//! number of taps receive a live copy of everything enqueued after they were
//! created.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::Event;
use crate::error::QueueError;

/// Default number of buffered events before `enqueue` applies backpressure.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1024;

#[derive(Debug, Default)]
struct QueueState {
    buffer: VecDeque<Event>,
    children: Vec<Arc<EventQueue>>,
    closed: bool,
    /// Dequeued or buffered events not yet acknowledged with `task_done`.
    unfinished: usize,
    consumers: usize,
}

/// A bounded FIFO of [`Event`]s with tap-based fan-out.
#[derive(Debug)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    max_size: usize,
    readable: Notify,
    writable: Notify,
    drained: Notify,
    enqueue_lock: tokio::sync::Mutex<()>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    /// Creates a queue holding up to [`DEFAULT_MAX_QUEUE_SIZE`] events.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_QUEUE_SIZE)
    }

    /// Creates a queue holding up to `max_size` events. Zero is treated as one.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_size: max_size.max(1),
            readable: Notify::new(),
            writable: Notify::new(),
            drained: Notify::new(),
            enqueue_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event and forwards a copy to every current tap.
    ///
    /// Waits while the buffer is full. On a closed queue the event is dropped
    /// with a warning.
    pub async fn enqueue(&self, event: Event) {
        self.enqueue_boxed(event).await;
    }

    fn enqueue_boxed(&self, event: Event) -> BoxFuture<'_, ()> {
        async move {
            // Serializes producers so a full buffer cannot reorder them.
            let _order = self.enqueue_lock.lock().await;

            let children = loop {
                let mut writable = pin!(self.writable.notified());
                writable.as_mut().enable();
                {
                    let mut state = self.lock();
                    if state.closed {
                        warn!("Queue is closed. Event will not be enqueued.");
                        return;
                    }
                    if state.buffer.len() < self.max_size {
                        state.buffer.push_back(event.clone());
                        state.unfinished += 1;
                        break state.children.clone();
                    }
                }
                writable.await;
            };
            self.readable.notify_waiters();

            for child in children {
                child.enqueue_boxed(event.clone()).await;
            }
        }
        .boxed()
    }

    /// Removes and returns the oldest event.
    ///
    /// With `wait`, suspends until an event arrives or the queue is closed.
    /// Returns [`QueueError::Closed`] once the queue is closed and empty, and
    /// [`QueueError::Empty`] when `wait` is false and nothing is buffered.
    pub async fn dequeue(&self, wait: bool) -> Result<Event, QueueError> {
        loop {
            let mut readable = pin!(self.readable.notified());
            readable.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(event) = state.buffer.pop_front() {
                    drop(state);
                    self.writable.notify_waiters();
                    return Ok(event);
                }
                if state.closed {
                    return Err(QueueError::Closed);
                }
                if !wait {
                    return Err(QueueError::Empty);
                }
            }
            readable.await;
        }
    }

    /// Acknowledges one dequeued event.
    pub fn task_done(&self) {
        let mut state = self.lock();
        state.unfinished = state.unfinished.saturating_sub(1);
        if state.unfinished == 0 {
            drop(state);
            self.drained.notify_waiters();
        }
    }

    /// Creates a child queue that receives every event enqueued from now on.
    ///
    /// Tapping a closed queue returns a child that is already closed.
    #[must_use]
    pub fn tap(&self) -> Arc<Self> {
        let child = Arc::new(Self::with_max_size(self.max_size));
        let mut state = self.lock();
        if state.closed {
            child.lock().closed = true;
        } else {
            state.children.push(Arc::clone(&child));
        }
        child
    }

    /// Closes the queue and every tap.
    ///
    /// Waiting dequeuers and producers are woken. Every event accepted by
    /// this queue before the close reaches the taps. While a consumer is
    /// attached, this waits for every buffered event to be acknowledged
    /// before closing the taps. Closing twice is a no-op.
    pub async fn close(&self) {
        self.close_boxed().await;
    }

    fn close_boxed(&self) -> BoxFuture<'_, ()> {
        async move {
            let children = {
                let mut state = self.lock();
                if state.closed {
                    return;
                }
                state.closed = true;
                std::mem::take(&mut state.children)
            };
            debug!(taps = children.len(), "Closing event queue");
            self.readable.notify_waiters();
            self.writable.notify_waiters();

            // An enqueue that got in before the close finishes forwarding to
            // the taps before they are closed.
            drop(self.enqueue_lock.lock().await);

            loop {
                let mut drained = pin!(self.drained.notified());
                drained.as_mut().enable();
                {
                    let state = self.lock();
                    if state.unfinished == 0 || state.consumers == 0 {
                        break;
                    }
                }
                drained.await;
            }

            join_all(children.iter().map(|child| child.close_boxed())).await;
        }
        .boxed()
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub(crate) fn attach_consumer(&self) {
        self.lock().consumers += 1;
    }

    pub(crate) fn detach_consumer(&self) {
        let mut state = self.lock();
        state.consumers = state.consumers.saturating_sub(1);
        drop(state);
        self.drained.notify_waiters();
    }
}
