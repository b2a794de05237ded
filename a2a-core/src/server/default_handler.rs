//! Default implementation of the [`RequestHandler`] trait.
//!
//! [`DefaultRequestHandler`] coordinates the [`AgentExecutor`], the
//! [`TaskStore`], the [`QueueManager`] and the optional push notification
//! components. It enforces the task lifecycle rules and runs at most one
//! execution per task.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::{FutureExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::{
    AgentExecutor, AgentTaskCallback, Event, EventConsumer, EventQueue, EventStream,
    HandlerConfig, InMemoryQueueManager, InMemoryTaskStore, PushNotificationConfigStore,
    PushNotificationSender, QueueManager, RequestContext, RequestContextBuilder, RequestHandler,
    ResultAggregator, SendMessageResponse, ServerCallContext, SimpleRequestContextBuilder,
    TaskManager, TaskStore,
};
use crate::error::{A2AError, Result};
use crate::types::{
    DeleteTaskPushNotificationConfigParams, GetTaskPushNotificationConfigParams,
    ListTaskPushNotificationConfigParams, Message, MessageSendParams, Task, TaskIdParams,
    TaskPushNotificationConfig, TaskQueryParams, TaskState,
};

/// A registered execution. `abort` is `None` while the execution is being set up.
///
/// Every fold for the task while it runs goes through `task_manager`, so a
/// cancel and the running send see the same task.
#[derive(Debug)]
struct RunningAgent {
    generation: u64,
    abort: Option<AbortHandle>,
    task_manager: Arc<Mutex<TaskManager>>,
}

/// Everything a send needs once the producer is running.
struct Execution {
    task_id: String,
    generation: u64,
    producer: JoinHandle<()>,
    events: EventStream,
    aggregator: ResultAggregator,
}

/// Default request handler for all incoming A2A requests.
///
/// Background work (interrupted sends, stream pumps and cleanups) is owned
/// by the handler. [`wait_for_background_tasks`](Self::wait_for_background_tasks)
/// waits for it; dropping the handler aborts it.
pub struct DefaultRequestHandler<E: AgentExecutor> {
    executor: Arc<E>,
    task_store: Arc<dyn TaskStore>,
    queue_manager: Arc<dyn QueueManager>,
    custom_queue_manager: bool,
    push_config_store: Option<Arc<dyn PushNotificationConfigStore>>,
    push_sender: Option<Arc<dyn PushNotificationSender>>,
    context_builder: Arc<dyn RequestContextBuilder>,
    config: HandlerConfig,
    running_agents: Arc<Mutex<HashMap<String, RunningAgent>>>,
    generation: AtomicU64,
    background: StdMutex<JoinSet<()>>,
}

impl<E: AgentExecutor> std::fmt::Debug for DefaultRequestHandler<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultRequestHandler")
            .field("config", &self.config)
            .field("push_notifications", &self.push_config_store.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: AgentExecutor + 'static> DefaultRequestHandler<E> {
    /// Creates a handler with an in-memory queue manager and no push support.
    pub fn new(executor: E, task_store: Arc<dyn TaskStore>) -> Self {
        let config = HandlerConfig::default();
        Self {
            executor: Arc::new(executor),
            context_builder: Arc::new(
                SimpleRequestContextBuilder::new().with_referred_tasks(Arc::clone(&task_store)),
            ),
            task_store,
            queue_manager: Arc::new(InMemoryQueueManager::with_max_size(config.queue_max_size)),
            custom_queue_manager: false,
            push_config_store: None,
            push_sender: None,
            config,
            running_agents: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            background: StdMutex::new(JoinSet::new()),
        }
    }

    /// Uses a custom queue manager.
    #[must_use]
    pub fn with_queue_manager(mut self, queue_manager: Arc<dyn QueueManager>) -> Self {
        self.queue_manager = queue_manager;
        self.custom_queue_manager = true;
        self
    }

    /// Enables push notifications.
    #[must_use]
    pub fn with_push_notifications(
        mut self,
        store: Arc<dyn PushNotificationConfigStore>,
        sender: Arc<dyn PushNotificationSender>,
    ) -> Self {
        self.push_config_store = Some(store);
        self.push_sender = Some(sender);
        self
    }

    /// Enables the push notification config methods without sending anything.
    #[must_use]
    pub fn with_push_config_store(mut self, store: Arc<dyn PushNotificationConfigStore>) -> Self {
        self.push_config_store = Some(store);
        self
    }

    /// Uses a custom request context builder.
    #[must_use]
    pub fn with_request_context_builder(mut self, builder: Arc<dyn RequestContextBuilder>) -> Self {
        self.context_builder = builder;
        self
    }

    /// Applies a configuration. The default queue manager is rebuilt with the
    /// new queue size; a custom one is left alone.
    #[must_use]
    pub fn with_config(mut self, config: HandlerConfig) -> Self {
        if !self.custom_queue_manager {
            self.queue_manager =
                Arc::new(InMemoryQueueManager::with_max_size(config.queue_max_size));
        }
        self.config = config;
        self
    }

    /// The task store.
    #[must_use]
    pub const fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.task_store
    }

    /// Returns whether an execution is registered for the task.
    pub async fn is_running(&self, task_id: &str) -> bool {
        self.running_agents.lock().await.contains_key(task_id)
    }

    /// Number of registered executions.
    pub async fn running_count(&self) -> usize {
        self.running_agents.lock().await.len()
    }

    /// Waits until every background continuation, stream pump and cleanup
    /// has finished.
    pub async fn wait_for_background_tasks(&self) {
        loop {
            let mut tasks = std::mem::take(
                &mut *self.background.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if tasks.is_empty() {
                return;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result
                    && e.is_panic()
                {
                    error!(error = %e, "Background task panicked");
                }
            }
        }
    }

    fn track<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        while background.try_join_next().is_some() {}
        background.spawn(task);
    }

    async fn reserve(&self, task_id: &str, task_manager: Arc<Mutex<TaskManager>>) -> Result<u64> {
        let mut running = self.running_agents.lock().await;
        if running.contains_key(task_id) {
            warn!(task_id = %task_id, "Task already has an execution in progress");
            return Err(A2AError::InvalidParams(format!(
                "Task {task_id} already has an execution in progress"
            )));
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        running.insert(
            task_id.to_string(),
            RunningAgent {
                generation,
                abort: None,
                task_manager,
            },
        );
        Ok(generation)
    }

    async fn release(&self, task_id: &str, generation: u64) {
        release(&self.running_agents, task_id, generation).await;
    }

    async fn attach_producer(&self, task_id: &str, generation: u64, abort: AbortHandle) {
        let mut running = self.running_agents.lock().await;
        match running.get_mut(task_id) {
            Some(agent) if agent.generation == generation => agent.abort = Some(abort),
            _ => debug!(task_id = %task_id, "Execution released before its producer started"),
        }
    }

    async fn running_task_manager(&self, task_id: &str) -> Option<Arc<Mutex<TaskManager>>> {
        let running = self.running_agents.lock().await;
        running.get(task_id).map(|agent| Arc::clone(&agent.task_manager))
    }

    async fn abort_running(&self, task_id: &str) {
        let running = self.running_agents.lock().await;
        if let Some(abort) = running.get(task_id).and_then(|a| a.abort.as_ref()) {
            debug!(task_id = %task_id, "Aborting running execution");
            abort.abort();
        }
    }

    /// Waits for the producer, closes the task's queue and releases the
    /// running-agent entry.
    fn cleanup(
        &self,
        task_id: String,
        generation: u64,
        producer: JoinHandle<()>,
    ) -> BoxFuture<'static, ()> {
        finish_execution(
            Arc::clone(&self.queue_manager),
            Arc::clone(&self.running_agents),
            task_id,
            generation,
            producer,
        )
        .boxed()
    }

    fn spawn_producer(
        &self,
        ctx: RequestContext,
        queue: Arc<EventQueue>,
        callback: AgentTaskCallback,
    ) -> JoinHandle<()> {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(executor.execute(&ctx, &queue))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(_) => Some(A2AError::InternalError("agent execution panicked".into())),
            };
            if let Some(e) = failure {
                error!(task_id = %ctx.task_id, error = %e, "Agent execution failed");
                callback.record(e);
            }
            queue.close().await;
            debug!(task_id = %ctx.task_id, "Agent execution finished");
        })
    }

    /// Validates a send, registers it and starts the agent.
    async fn start_execution(
        &self,
        params: &MessageSendParams,
        call_context: Option<&ServerCallContext>,
    ) -> Result<Execution> {
        let message = &params.message;
        validate_message(message)?;

        let stored = match message.task_id.as_deref() {
            Some(task_id) => self.task_store.get(task_id).await?,
            None => None,
        };
        if let Some(task) = &stored
            && task.is_terminal()
        {
            return Err(A2AError::InvalidParams(format!(
                "Task {} is in terminal state: {:?}",
                task.id,
                task.state()
            )));
        }

        let mut ctx = self
            .context_builder
            .build(
                Some(params),
                stored.as_ref().map(|t| t.id.as_str()),
                message.context_id.as_deref(),
                stored.clone(),
                call_context,
            )
            .await?;
        let task_id = ctx.task_id.clone();

        let mut task_manager = TaskManager::new(
            Some(task_id.clone()),
            Some(ctx.context_id.clone()),
            Arc::clone(&self.task_store),
            Some(message.clone()),
        )?;
        let task = stored.map(|task| task_manager.update_with_message(message.clone(), task));
        ctx.current_task.clone_from(&task);
        let task_manager = Arc::new(Mutex::new(task_manager));

        let generation = self.reserve(&task_id, Arc::clone(&task_manager)).await?;
        if let Err(e) = self.persist_request(params, &task_manager, task, &task_id).await {
            self.release(&task_id, generation).await;
            return Err(e);
        }

        let queue = self.queue_manager.create(&task_id).await;
        let consumer =
            EventConsumer::new(Arc::clone(&queue)).with_poll_interval(self.config.poll_interval);
        let producer = self.spawn_producer(ctx, queue, consumer.agent_task_callback());
        self.attach_producer(&task_id, generation, producer.abort_handle())
            .await;
        let events = reject_foreign_tasks(consumer.consume_all(), task_id.clone());

        let mut aggregator = ResultAggregator::from_shared(task_manager);
        if let Some(sender) = &self.push_sender {
            aggregator = aggregator.with_push_sender(Arc::clone(sender));
        }

        info!(task_id = %task_id, "Agent execution started");
        Ok(Execution {
            task_id,
            generation,
            producer,
            events,
            aggregator,
        })
    }

    async fn persist_request(
        &self,
        params: &MessageSendParams,
        task_manager: &Mutex<TaskManager>,
        task: Option<Task>,
        task_id: &str,
    ) -> Result<()> {
        if let Some(task) = task {
            task_manager.lock().await.save(task).await?;
        }
        let push_config = params
            .configuration
            .as_ref()
            .and_then(|c| c.push_notification_config.clone());
        if let (Some(store), Some(config)) = (&self.push_config_store, push_config) {
            store.set_info(task_id, config).await?;
        }
        Ok(())
    }

    /// Streams `events` to a channel from a tracked background task.
    fn spawn_pump(
        &self,
        events: EventStream,
        task_id: String,
        after: Option<(AbortHandle, BoxFuture<'static, ()>)>,
    ) -> EventStream {
        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        self.track(async move {
            let clean = pump(events, tx, &task_id).await;
            if let Some((abort, cleanup)) = after {
                if !clean {
                    abort.abort();
                }
                cleanup.await;
            }
        });
        Box::pin(ReceiverStream::new(rx))
    }

    fn push_store(&self) -> Result<&Arc<dyn PushNotificationConfigStore>> {
        self.push_config_store.as_ref().ok_or_else(|| {
            A2AError::UnsupportedOperation("push notifications are not configured".into())
        })
    }

    async fn require_task(&self, task_id: &str) -> Result<Task> {
        self.task_store
            .get(task_id)
            .await?
            .ok_or_else(|| A2AError::task_not_found(task_id))
    }
}

async fn finish_execution(
    queue_manager: Arc<dyn QueueManager>,
    running_agents: Arc<Mutex<HashMap<String, RunningAgent>>>,
    task_id: String,
    generation: u64,
    producer: JoinHandle<()>,
) {
    if let Err(e) = producer.await {
        debug!(task_id = %task_id, error = %e, "Producer did not run to completion");
    }
    queue_manager.close(&task_id).await;
    release(&running_agents, &task_id, generation).await;
    debug!(task_id = %task_id, "Execution cleaned up");
}

async fn release(
    running_agents: &Mutex<HashMap<String, RunningAgent>>,
    task_id: &str,
    generation: u64,
) {
    let mut running = running_agents.lock().await;
    if running.get(task_id).is_some_and(|a| a.generation == generation) {
        running.remove(task_id);
    }
}

fn validate_message(message: &Message) -> Result<()> {
    if message.message_id.is_empty() {
        return Err(A2AError::InvalidParams("message ID is required".into()));
    }
    if message.parts.is_empty() {
        return Err(A2AError::InvalidParams("message parts is required".into()));
    }
    Ok(())
}

/// Turns any task event for another task into an error before it is folded.
fn reject_foreign_tasks(events: EventStream, task_id: String) -> EventStream {
    events
        .map(move |item| match item {
            Ok(event)
                if !matches!(event, Event::Message(_))
                    && event.task_id().is_some_and(|id| id != task_id.as_str()) =>
            {
                error!(
                    expected = %task_id,
                    actual = ?event.task_id(),
                    "Task ID mismatch in agent response"
                );
                Err(A2AError::InternalError(
                    "Task ID mismatch in agent response".into(),
                ))
            }
            item => item,
        })
        .boxed()
}

/// Keeps the events that decide a cancel: replies and terminal states.
///
/// A tap on a running execution also carries the send's own events, which
/// the send folds itself.
fn cancel_outcomes(events: EventStream) -> EventStream {
    events
        .filter(|item| {
            future::ready(match item {
                Ok(Event::Message(_)) | Err(_) => true,
                Ok(event) => event.state().is_some_and(|state| state.is_terminal()),
            })
        })
        .boxed()
}

/// Forwards every event to `tx`. Keeps draining after the receiver is gone.
/// Returns false if the stream ended on an error.
async fn pump(mut events: EventStream, tx: mpsc::Sender<Result<Event>>, task_id: &str) -> bool {
    let mut receiver_gone = false;
    while let Some(item) = events.next().await {
        let failed = item.is_err();
        if !receiver_gone && tx.send(item).await.is_err() {
            debug!(task_id = %task_id, "Stream receiver dropped, draining remaining events");
            receiver_gone = true;
        }
        if failed {
            return false;
        }
    }
    true
}

#[async_trait]
impl<E: AgentExecutor + 'static> RequestHandler for DefaultRequestHandler<E> {
    async fn on_message_send(
        &self,
        params: MessageSendParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<SendMessageResponse> {
        let Execution {
            task_id,
            generation,
            producer,
            events,
            mut aggregator,
        } = self.start_execution(&params, ctx).await?;

        let outcome = aggregator
            .consume_and_break_on_interrupt(events, params.is_blocking())
            .await;
        let (result, interrupted) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                producer.abort();
                self.cleanup(task_id, generation, producer).await;
                return Err(e);
            }
        };

        match aggregator.take_continuation() {
            Some(continuation) if interrupted => {
                debug!(task_id = %task_id, "Send interrupted, finishing in background");
                let cleanup = self.cleanup(task_id.clone(), generation, producer);
                self.track(async move {
                    if let Err(e) = continuation.await {
                        warn!(error = %e, "Background continuation did not complete");
                    }
                    cleanup.await;
                });
            }
            _ => self.cleanup(task_id.clone(), generation, producer).await,
        }

        let mut result = result.ok_or_else(|| {
            A2AError::InternalError("Agent did not produce a result".into())
        })?;
        if let SendMessageResponse::Task(task) = &mut result {
            task.truncate_history(params.history_length());
        }

        info!(task_id = %task_id, interrupted, "Message send completed");
        Ok(result)
    }

    async fn on_message_send_stream(
        &self,
        params: MessageSendParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<EventStream> {
        let Execution {
            task_id,
            generation,
            producer,
            events,
            aggregator,
        } = self.start_execution(&params, ctx).await?;

        let events = aggregator.consume_and_emit(events);
        let abort = producer.abort_handle();
        let cleanup = self.cleanup(task_id.clone(), generation, producer);

        info!(task_id = %task_id, "Started streaming message");
        Ok(self.spawn_pump(events, task_id, Some((abort, cleanup))))
    }

    async fn on_get_task(
        &self,
        params: TaskQueryParams,
        _ctx: Option<&ServerCallContext>,
    ) -> Result<Task> {
        let mut task = self.require_task(&params.id).await?;
        task.truncate_history(params.history_length);
        Ok(task)
    }

    async fn on_cancel_task(
        &self,
        params: TaskIdParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<Task> {
        let task = self.require_task(&params.id).await?;
        if task.is_terminal() {
            return Err(A2AError::TaskNotCancelable(format!(
                "Task cannot be canceled - current state: {:?}",
                task.state()
            )));
        }

        let running = self.running_task_manager(&task.id).await;
        let queue = match self.queue_manager.tap(&task.id).await {
            Some(queue) => queue,
            None => Arc::new(EventQueue::with_max_size(self.config.queue_max_size)),
        };
        let consumer =
            EventConsumer::new(Arc::clone(&queue)).with_poll_interval(self.config.poll_interval);
        let (mut aggregator, events) = match running {
            Some(task_manager) => (
                ResultAggregator::from_shared(task_manager),
                cancel_outcomes(consumer.consume_all()),
            ),
            None => {
                let task_manager = TaskManager::new(
                    Some(task.id.clone()),
                    Some(task.context_id.clone()),
                    Arc::clone(&self.task_store),
                    None,
                )?;
                (ResultAggregator::new(task_manager), consumer.consume_all())
            }
        };

        let mut request = self
            .context_builder
            .build(None, Some(&task.id), Some(&task.context_id), Some(task.clone()), ctx)
            .await?;
        request.metadata = params.metadata.clone();

        let (canceled, result) = tokio::join!(
            async {
                let canceled = self.executor.cancel(&request, &queue).await;
                self.abort_running(&task.id).await;
                self.queue_manager.close(&task.id).await;
                queue.close().await;
                canceled
            },
            aggregator.consume_all(events),
        );
        canceled?;

        match result? {
            Some(SendMessageResponse::Task(task)) if task.state() == TaskState::Canceled => {
                info!(task_id = %task.id, "Task canceled");
                Ok(task)
            }
            Some(SendMessageResponse::Task(task)) => Err(A2AError::TaskNotCancelable(format!(
                "Task cannot be canceled - current state: {:?}",
                task.state()
            ))),
            _ => Err(A2AError::InternalError(
                "Agent did not return valid response for cancel".into(),
            )),
        }
    }

    async fn on_resubscribe_to_task(
        &self,
        params: TaskIdParams,
        _ctx: Option<&ServerCallContext>,
    ) -> Result<EventStream> {
        let task = self.require_task(&params.id).await?;
        if task.is_terminal() {
            return Err(A2AError::InvalidParams(format!(
                "Task {} is in terminal state: {:?}",
                task.id,
                task.state()
            )));
        }
        let queue = self
            .queue_manager
            .tap(&task.id)
            .await
            .ok_or_else(|| A2AError::task_not_found(&task.id))?;

        // The primary send owns the stored task; fold into a private copy.
        let scratch: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        scratch.save(&task).await?;
        let task_manager = TaskManager::new(
            Some(task.id.clone()),
            Some(task.context_id.clone()),
            scratch,
            None,
        )?;
        let aggregator = ResultAggregator::new(task_manager);
        let consumer = EventConsumer::new(queue).with_poll_interval(self.config.poll_interval);
        let events = reject_foreign_tasks(consumer.consume_all(), task.id.clone());
        let events = aggregator.consume_and_emit(events);

        info!(task_id = %task.id, "Resubscribed to task");
        Ok(self.spawn_pump(events, task.id, None))
    }

    async fn on_set_task_push_notification_config(
        &self,
        params: TaskPushNotificationConfig,
        _ctx: Option<&ServerCallContext>,
    ) -> Result<TaskPushNotificationConfig> {
        let store = self.push_store()?;
        self.require_task(&params.task_id).await?;
        store
            .set_info(&params.task_id, params.push_notification_config.clone())
            .await?;
        Ok(params)
    }

    async fn on_get_task_push_notification_config(
        &self,
        params: GetTaskPushNotificationConfigParams,
        _ctx: Option<&ServerCallContext>,
    ) -> Result<TaskPushNotificationConfig> {
        let store = self.push_store()?;
        self.require_task(&params.id).await?;

        let configs = store.get_info(&params.id).await?;
        let config = match params.push_notification_config_id.as_deref() {
            Some(config_id) => configs
                .into_iter()
                .find(|c| c.id.as_deref() == Some(config_id)),
            None => configs.into_iter().next(),
        };
        config
            .map(|c| TaskPushNotificationConfig::new(&params.id, c))
            .ok_or_else(|| A2AError::InternalError("Push notification config not found".into()))
    }

    async fn on_list_task_push_notification_config(
        &self,
        params: ListTaskPushNotificationConfigParams,
        _ctx: Option<&ServerCallContext>,
    ) -> Result<Vec<TaskPushNotificationConfig>> {
        let store = self.push_store()?;
        self.require_task(&params.id).await?;

        let configs = store.get_info(&params.id).await?;
        Ok(configs
            .into_iter()
            .map(|c| TaskPushNotificationConfig::new(&params.id, c))
            .collect())
    }

    async fn on_delete_task_push_notification_config(
        &self,
        params: DeleteTaskPushNotificationConfigParams,
        _ctx: Option<&ServerCallContext>,
    ) -> Result<()> {
        let store = self.push_store()?;
        self.require_task(&params.id).await?;
        store
            .delete_info(&params.id, Some(&params.push_notification_config_id))
            .await
    }
}
