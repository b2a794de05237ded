//! The task execution core.
//!
//! A transport decodes a request and calls a [`RequestHandler`]. The default
//! handler runs the [`AgentExecutor`] in the background, feeds the events it
//! publishes through a per-task [`EventQueue`] and folds them into the stored
//! [`Task`](crate::types::Task) with a [`ResultAggregator`].
//!
//! # Components
//!
//! - **Event queue**: bounded multicast FIFO with taps for resubscription
//! - **Event consumer**: drains a queue until the execution is over
//! - **Task manager**: folds events into one canonical task
//! - **Result aggregator**: streaming, blocking and interrupted result modes
//! - **Default request handler**: lifecycle rules and one execution per task

mod context;
mod context_builder;
mod default_handler;
mod event_consumer;
mod event_queue;
mod events;
mod handler;
mod push;
mod queue_manager;
mod result_aggregator;
mod task_manager;
mod task_store;
mod task_updater;

use std::time::Duration;

use async_trait::async_trait;
pub use context::*;
pub use context_builder::*;
pub use default_handler::*;
pub use event_consumer::*;
pub use event_queue::*;
pub use events::*;
pub use handler::*;
pub use push::*;
pub use queue_manager::*;
pub use result_aggregator::*;
pub use task_manager::*;
pub use task_store::*;
pub use task_updater::*;

use crate::error::Result;

/// The agent logic.
///
/// The agent translates its work into events and writes them to the queue it
/// is given. The server stops reading an execution after:
/// - a [`Message`](crate::types::Message)
/// - a [`TaskStatusUpdateEvent`](crate::types::TaskStatusUpdateEvent) with `final = true`
/// - a [`Task`](crate::types::Task) in a terminal, `input-required` or `unknown` state
///
/// # Example
/// ```ignore
/// async fn execute(&self, ctx: &RequestContext, queue: &EventQueue) -> Result<()> {
///     let updater = TaskUpdater::new(queue, &ctx.task_id, &ctx.context_id);
///     updater.start_work(None).await?;
///     // ... do work, publish artifacts ...
///     updater.complete(Some(updater.new_agent_message(parts, None))).await
/// }
/// ```
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Runs the agent for the message in `ctx`.
    ///
    /// Returning an error fails the request with that error. Events
    /// published before the failure are kept.
    async fn execute(&self, ctx: &RequestContext, queue: &EventQueue) -> Result<()>;

    /// Asks the agent to stop working on `ctx.task_id`.
    ///
    /// Publish the cancellation to `queue`, usually as a final status update
    /// in the `canceled` state.
    async fn cancel(&self, ctx: &RequestContext, queue: &EventQueue) -> Result<()>;
}

/// Tuning knobs for [`DefaultRequestHandler`].
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Capacity of each per-task event queue.
    pub queue_max_size: usize,
    /// How often a waiting consumer re-checks its queue.
    pub poll_interval: Duration,
    /// Events buffered between the background pump and a streaming caller.
    pub stream_buffer: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            queue_max_size: DEFAULT_MAX_QUEUE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stream_buffer: 64,
        }
    }
}
