//! Turns an event stream into the result a caller asked for.
//!
//! The aggregator feeds every event to a [`TaskManager`] and implements the
//! three ways a caller can wait: stream everything, wait for the final
//! result, or return early on an interruption while the rest of the stream is
//! folded in the background.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{Event, EventStream, PushNotificationSender, SendMessageResponse, TaskManager};
use crate::error::Result;
use crate::types::{Message, TaskState};

/// Aggregates streaming events into a task or message result.
pub struct ResultAggregator {
    task_manager: Arc<Mutex<TaskManager>>,
    message: Option<Message>,
    push_sender: Option<Arc<dyn PushNotificationSender>>,
    continuation: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ResultAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultAggregator")
            .field("message", &self.message)
            .field("has_continuation", &self.continuation.is_some())
            .finish_non_exhaustive()
    }
}

impl ResultAggregator {
    /// Creates an aggregator around a task manager.
    pub fn new(task_manager: TaskManager) -> Self {
        Self::from_shared(Arc::new(Mutex::new(task_manager)))
    }

    /// Creates an aggregator that folds into a task manager shared with
    /// other aggregators of the same task.
    pub fn from_shared(task_manager: Arc<Mutex<TaskManager>>) -> Self {
        Self {
            task_manager,
            message: None,
            push_sender: None,
            continuation: None,
        }
    }

    /// Sends the latest task snapshot to this sender after every processed event.
    #[must_use]
    pub fn with_push_sender(mut self, sender: Arc<dyn PushNotificationSender>) -> Self {
        self.push_sender = Some(sender);
        self
    }

    /// The shared task manager.
    #[must_use]
    pub const fn task_manager(&self) -> &Arc<Mutex<TaskManager>> {
        &self.task_manager
    }

    /// Takes the handle of the background continuation started by an
    /// interrupted [`consume_and_break_on_interrupt`](Self::consume_and_break_on_interrupt).
    pub fn take_continuation(&mut self) -> Option<JoinHandle<()>> {
        self.continuation.take()
    }

    /// The captured message if there is one, else the current task.
    pub async fn current_result(&self) -> Result<Option<SendMessageResponse>> {
        if let Some(message) = &self.message {
            return Ok(Some(message.clone().into()));
        }
        let task = self.task_manager.lock().await.get_task().await?;
        Ok(task.map(Into::into))
    }

    /// Processes every event and re-yields it unchanged.
    ///
    /// The stream ends after the first error.
    pub fn consume_and_emit<S>(&self, events: S) -> EventStream
    where
        S: Stream<Item = Result<Event>> + Send + 'static,
    {
        let state = (
            events.boxed(),
            Arc::clone(&self.task_manager),
            self.push_sender.clone(),
        );
        futures::stream::unfold(Some(state), |state| async move {
            let (mut events, tm, push) = state?;
            let result = match events.next().await? {
                Ok(event) => process_event(&tm, push.as_deref(), &event)
                    .await
                    .map(|()| event),
                Err(e) => Err(e),
            };
            match result {
                Ok(event) => Some((Ok(event), Some((events, tm, push)))),
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    /// Drains every event and returns the final result.
    ///
    /// A message returns immediately without draining the rest.
    pub async fn consume_all<S>(&mut self, events: S) -> Result<Option<SendMessageResponse>>
    where
        S: Stream<Item = Result<Event>> + Send,
    {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            match event? {
                Event::Message(message) => {
                    self.message = Some(message.clone());
                    return Ok(Some(message.into()));
                }
                event => {
                    process_event(&self.task_manager, self.push_sender.as_deref(), &event).await?;
                }
            }
        }
        self.current_result().await
    }

    /// Drains events until the stream ends or the caller should be answered
    /// early.
    ///
    /// Returns `(result, interrupted)`. A message ends consumption with
    /// `interrupted = false`. An `auth-required` task or status, or any event
    /// when `blocking` is false, returns `interrupted = true` and keeps
    /// folding the remaining events in a background task (see
    /// [`take_continuation`](Self::take_continuation)). Errors propagate
    /// after everything processed so far has been kept.
    pub async fn consume_and_break_on_interrupt<S>(
        &mut self,
        events: S,
        blocking: bool,
    ) -> Result<(Option<SendMessageResponse>, bool)>
    where
        S: Stream<Item = Result<Event>> + Send + 'static,
    {
        let mut events = events.boxed();
        while let Some(event) = events.next().await {
            let event = event?;
            if let Event::Message(message) = event {
                self.message = Some(message.clone());
                return Ok((Some(message.into()), false));
            }
            process_event(&self.task_manager, self.push_sender.as_deref(), &event).await?;

            let auth_required = event.state() == Some(TaskState::AuthRequired);
            if auth_required || !blocking {
                debug!(
                    auth_required,
                    blocking, "Returning early, consuming the rest in background"
                );
                let result = self.current_result().await?;
                self.continuation = Some(tokio::spawn(continue_consuming(
                    Arc::clone(&self.task_manager),
                    self.push_sender.clone(),
                    events,
                )));
                return Ok((result, true));
            }
        }
        Ok((self.current_result().await?, false))
    }
}

async fn process_event(
    task_manager: &Mutex<TaskManager>,
    push: Option<&dyn PushNotificationSender>,
    event: &Event,
) -> Result<()> {
    let snapshot = {
        let mut tm = task_manager.lock().await;
        tm.process(event).await?;
        match (push, event) {
            (None, _) | (_, Event::Message(_)) => None,
            _ => tm.current_task().cloned(),
        }
    };
    if let (Some(sender), Some(task)) = (push, snapshot) {
        sender.send_notification(&task).await;
    }
    Ok(())
}

async fn fold_message(task_manager: &Mutex<TaskManager>, message: Message) -> Result<()> {
    let mut tm = task_manager.lock().await;
    if let Some(task) = tm.get_task().await? {
        let task = tm.update_with_message(message, task);
        tm.save(task).await?;
    }
    Ok(())
}

async fn continue_consuming(
    task_manager: Arc<Mutex<TaskManager>>,
    push: Option<Arc<dyn PushNotificationSender>>,
    mut events: EventStream,
) {
    while let Some(event) = events.next().await {
        let result = match event {
            Ok(Event::Message(message)) => fold_message(&task_manager, message).await,
            Ok(event) => process_event(&task_manager, push.as_deref(), &event).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(error = %e, "Background event consumption failed");
            return;
        }
    }
    debug!("Background event consumption finished");
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use futures::stream;

    use super::*;
    use crate::error::A2AError;
    use crate::server::{InMemoryTaskStore, TaskStore};
    use crate::types::{Task, TaskStatus, TaskStatusUpdateEvent};

    fn aggregator(store: &Arc<InMemoryTaskStore>) -> ResultAggregator {
        let store = Arc::clone(store) as Arc<dyn TaskStore>;
        ResultAggregator::new(TaskManager::new(Some("t1".into()), None, store, None).unwrap())
    }

    fn task(state: TaskState) -> Event {
        Task::new("t1", "c1").with_status(TaskStatus::new(state)).into()
    }

    fn status(state: TaskState, r#final: bool) -> Event {
        TaskStatusUpdateEvent::new("t1", "c1", TaskStatus::new(state), r#final).into()
    }

    #[tokio::test]
    async fn test_consume_and_emit_passes_events_through() {
        let store = Arc::new(InMemoryTaskStore::new());
        let agg = aggregator(&store);
        let events = vec![task(TaskState::Submitted), status(TaskState::Completed, true)];

        let emitted: Vec<Event> = agg
            .consume_and_emit(stream::iter(events.clone().into_iter().map(Ok)))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(emitted, events);
        assert_eq!(
            store.get("t1").await.unwrap().unwrap().state(),
            TaskState::Completed
        );
    }

    #[tokio::test]
    async fn test_consume_all_returns_final_task() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut agg = aggregator(&store);
        let events = [
            task(TaskState::Submitted),
            status(TaskState::Working, false),
            status(TaskState::Completed, true),
        ];

        let result = agg
            .consume_all(stream::iter(events.into_iter().map(Ok)))
            .await
            .unwrap();
        assert_eq!(result.unwrap().as_task().unwrap().state(), TaskState::Completed);
    }

    #[tokio::test]
    async fn test_consume_all_on_empty_stream() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut agg = aggregator(&store);
        let result = agg.consume_all(stream::empty()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_message_short_circuits() {
        let m1 = Message::agent_text("m1");
        let events = || {
            stream::iter(vec![
                Ok(Event::from(m1.clone())),
                Ok(task(TaskState::Working)),
            ])
        };

        let store = Arc::new(InMemoryTaskStore::new());
        let mut agg = aggregator(&store);
        let result = agg.consume_all(events()).await.unwrap();
        assert_eq!(result, Some(SendMessageResponse::Message(m1.clone())));

        let mut agg = aggregator(&store);
        let (result, interrupted) = agg
            .consume_and_break_on_interrupt(events(), true)
            .await
            .unwrap();
        assert_eq!(result, Some(SendMessageResponse::Message(m1.clone())));
        assert!(!interrupted);
        assert!(agg.take_continuation().is_none());

        assert!(store.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auth_required_interrupts_and_continues_in_background() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut agg = aggregator(&store);
        let events = stream::iter(vec![
            Ok(task(TaskState::AuthRequired)),
            Ok(Event::from(Message::agent_text("followup"))),
        ]);

        let (result, interrupted) = agg.consume_and_break_on_interrupt(events, true).await.unwrap();
        assert!(interrupted);
        assert_eq!(result.unwrap().as_task().unwrap().state(), TaskState::AuthRequired);

        agg.take_continuation().unwrap().await.unwrap();
        let task = agg.task_manager().lock().await.get_task().await.unwrap().unwrap();
        assert_eq!(task.history.last().unwrap().text_content(), "followup");
        assert_eq!(store.get("t1").await.unwrap().unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn test_non_blocking_returns_after_first_event() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut agg = aggregator(&store);
        let events = stream::iter(vec![
            Ok(task(TaskState::Submitted)),
            Ok(status(TaskState::Completed, true)),
        ]);

        let (result, interrupted) = agg
            .consume_and_break_on_interrupt(events, false)
            .await
            .unwrap();
        assert!(interrupted);
        assert_eq!(result.unwrap().as_task().unwrap().state(), TaskState::Submitted);

        agg.take_continuation().unwrap().await.unwrap();
        assert_eq!(
            store.get("t1").await.unwrap().unwrap().state(),
            TaskState::Completed
        );
    }

    #[tokio::test]
    async fn test_blocking_drains_to_the_end() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut agg = aggregator(&store);
        let events = stream::iter(vec![
            Ok(status(TaskState::Working, false)),
            Ok(status(TaskState::InputRequired, true)),
        ]);

        let (result, interrupted) = agg.consume_and_break_on_interrupt(events, true).await.unwrap();
        assert!(!interrupted);
        assert_eq!(result.unwrap().as_task().unwrap().state(), TaskState::InputRequired);
    }

    #[tokio::test]
    async fn test_error_keeps_partial_progress() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut agg = aggregator(&store);
        let events = stream::iter(vec![
            Ok(status(TaskState::Working, false)),
            Err(A2AError::Other("boom".into())),
            Ok(status(TaskState::Completed, true)),
        ]);

        let err = agg.consume_and_break_on_interrupt(events, true).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(store.get("t1").await.unwrap().unwrap().state(), TaskState::Working);
    }
}
