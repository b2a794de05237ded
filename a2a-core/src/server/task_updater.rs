//! Agent-side helper for publishing task events.
//!
//! [`TaskUpdater`] wraps the queue handed to
//! [`AgentExecutor::execute`](super::AgentExecutor::execute) and builds the
//! status and artifact events for one task, so agents never assemble
//! [`TaskStatusUpdateEvent`]s by hand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::EventQueue;
use crate::error::{A2AError, Result};
use crate::types::{
    Artifact, Message, Part, Role, TaskArtifactUpdateEvent, TaskState, TaskStatus,
    TaskStatusUpdateEvent,
};

/// Publishes status and artifact updates for a single task.
#[derive(Debug)]
pub struct TaskUpdater<'a> {
    queue: &'a EventQueue,
    task_id: String,
    context_id: String,
    finished: AtomicBool,
}

impl<'a> TaskUpdater<'a> {
    /// Creates an updater for the given task.
    pub fn new(
        queue: &'a EventQueue,
        task_id: impl Into<String>,
        context_id: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            task_id: task_id.into(),
            context_id: context_id.into(),
            finished: AtomicBool::new(false),
        }
    }

    /// The task being updated.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The context of the task being updated.
    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Publishes a status update.
    ///
    /// Once a final update has been published, every further update is
    /// rejected with [`A2AError::InvalidRequest`].
    pub async fn update_status(
        &self,
        state: TaskState,
        message: Option<Message>,
        r#final: bool,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<()> {
        if r#final {
            if self.finished.swap(true, Ordering::SeqCst) {
                return Err(self.already_finished());
            }
        } else if self.finished.load(Ordering::SeqCst) {
            return Err(self.already_finished());
        }

        let status = match message {
            Some(message) => TaskStatus::with_message(state, message),
            None => TaskStatus::new(state),
        };
        let mut event =
            TaskStatusUpdateEvent::new(&self.task_id, &self.context_id, status, r#final);
        event.metadata = metadata;

        debug!(task_id = %self.task_id, ?state, r#final, "Publishing status update");
        self.queue.enqueue(event.into()).await;
        Ok(())
    }

    /// Publishes an artifact. A missing `artifact_id` is generated.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_artifact(
        &self,
        parts: Vec<Part>,
        artifact_id: Option<String>,
        name: Option<String>,
        metadata: Option<HashMap<String, serde_json::Value>>,
        append: Option<bool>,
        last_chunk: Option<bool>,
    ) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(self.already_finished());
        }

        let artifact_id = artifact_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut artifact = Artifact::new(artifact_id, parts);
        artifact.name = name;
        artifact.metadata = metadata;

        let mut event = TaskArtifactUpdateEvent::new(&self.task_id, &self.context_id, artifact);
        event.append = append;
        event.last_chunk = last_chunk;

        self.queue.enqueue(event.into()).await;
        Ok(())
    }

    /// Marks the task as submitted.
    pub async fn submit(&self, message: Option<Message>) -> Result<()> {
        self.update_status(TaskState::Submitted, message, false, None).await
    }

    /// Marks the task as being worked on.
    pub async fn start_work(&self, message: Option<Message>) -> Result<()> {
        self.update_status(TaskState::Working, message, false, None).await
    }

    /// Completes the task.
    pub async fn complete(&self, message: Option<Message>) -> Result<()> {
        self.update_status(TaskState::Completed, message, true, None).await
    }

    /// Fails the task.
    pub async fn failed(&self, message: Option<Message>) -> Result<()> {
        self.update_status(TaskState::Failed, message, true, None).await
    }

    /// Rejects the task.
    pub async fn reject(&self, message: Option<Message>) -> Result<()> {
        self.update_status(TaskState::Rejected, message, true, None).await
    }

    /// Cancels the task.
    pub async fn cancel(&self, message: Option<Message>) -> Result<()> {
        self.update_status(TaskState::Canceled, message, true, None).await
    }

    /// Asks the client for more input.
    pub async fn requires_input(&self, message: Option<Message>, r#final: bool) -> Result<()> {
        self.update_status(TaskState::InputRequired, message, r#final, None)
            .await
    }

    /// Asks the client to authenticate.
    pub async fn requires_auth(&self, message: Option<Message>, r#final: bool) -> Result<()> {
        self.update_status(TaskState::AuthRequired, message, r#final, None)
            .await
    }

    /// Builds an agent message bound to this task. Nothing is published.
    #[must_use]
    pub fn new_agent_message(
        &self,
        parts: Vec<Part>,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Message {
        let mut message = Message::new(uuid::Uuid::new_v4().to_string(), Role::Agent, parts)
            .with_task_id(&self.task_id)
            .with_context_id(&self.context_id);
        message.metadata = metadata;
        message
    }

    fn already_finished(&self) -> A2AError {
        A2AError::InvalidRequest(format!(
            "Task {} is already in a terminal state",
            self.task_id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Event;

    async fn next(queue: &EventQueue) -> Event {
        queue.dequeue(false).await.unwrap()
    }

    fn parts() -> Vec<Part> {
        vec![Part::text("Test message")]
    }

    #[tokio::test]
    async fn test_update_status_with_message() {
        let queue = EventQueue::new();
        let updater = TaskUpdater::new(&queue, "test-task-id", "test-context-id");
        let message = Message::agent_text("progress");

        updater
            .update_status(TaskState::Working, Some(message.clone()), false, None)
            .await
            .unwrap();

        let Event::StatusUpdate(event) = next(&queue).await else {
            panic!("expected a status update");
        };
        assert_eq!(event.task_id, "test-task-id");
        assert_eq!(event.context_id, "test-context-id");
        assert_eq!(event.status.state, TaskState::Working);
        assert_eq!(event.status.message, Some(message));
        assert!(!event.r#final);
        assert!(event.status.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_add_artifact_generates_id() {
        let queue = EventQueue::new();
        let updater = TaskUpdater::new(&queue, "t1", "c1");

        updater
            .add_artifact(parts(), None, None, None, None, None)
            .await
            .unwrap();
        updater
            .add_artifact(
                parts(),
                Some("id1".into()),
                Some("Custom Artifact".into()),
                None,
                Some(true),
                Some(false),
            )
            .await
            .unwrap();

        let Event::ArtifactUpdate(generated) = next(&queue).await else {
            panic!("expected an artifact update");
        };
        assert!(uuid::Uuid::parse_str(&generated.artifact.artifact_id).is_ok());
        assert_eq!(generated.append, None);
        assert_eq!(generated.last_chunk, None);

        let Event::ArtifactUpdate(named) = next(&queue).await else {
            panic!("expected an artifact update");
        };
        assert_eq!(named.artifact.artifact_id, "id1");
        assert_eq!(named.artifact.name.as_deref(), Some("Custom Artifact"));
        assert_eq!(named.artifact.parts, parts());
        assert_eq!(named.append, Some(true));
        assert_eq!(named.last_chunk, Some(false));
    }

    #[tokio::test]
    async fn test_shortcuts_set_state_and_finality() {
        let cases = [
            (TaskState::Submitted, false),
            (TaskState::Working, false),
            (TaskState::InputRequired, true),
            (TaskState::AuthRequired, false),
            (TaskState::Completed, true),
            (TaskState::Failed, true),
            (TaskState::Rejected, true),
            (TaskState::Canceled, true),
        ];
        for (state, r#final) in cases {
            let queue = EventQueue::new();
            let updater = TaskUpdater::new(&queue, "t1", "c1");
            match state {
                TaskState::Submitted => updater.submit(None).await,
                TaskState::Working => updater.start_work(None).await,
                TaskState::InputRequired => updater.requires_input(None, true).await,
                TaskState::AuthRequired => updater.requires_auth(None, false).await,
                TaskState::Completed => updater.complete(None).await,
                TaskState::Failed => updater.failed(None).await,
                TaskState::Rejected => updater.reject(None).await,
                _ => updater.cancel(None).await,
            }
            .unwrap();

            let Event::StatusUpdate(event) = next(&queue).await else {
                panic!("expected a status update");
            };
            assert_eq!(event.status.state, state);
            assert_eq!(event.r#final, r#final, "{state:?}");
            assert!(event.status.message.is_none());
        }
    }

    #[tokio::test]
    async fn test_updates_after_final_are_rejected() {
        let queue = EventQueue::new();
        let updater = TaskUpdater::new(&queue, "t1", "c1");

        updater.complete(None).await.unwrap();
        let err = updater.start_work(None).await.unwrap_err();
        assert!(matches!(err, A2AError::InvalidRequest(_)));
        assert!(updater.failed(None).await.is_err());
        assert!(
            updater
                .add_artifact(parts(), None, None, None, None, None)
                .await
                .is_err()
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_new_agent_message() {
        let queue = EventQueue::new();
        let updater = TaskUpdater::new(&queue, "test-task-id", "test-context-id");
        let metadata = HashMap::from([("key".to_string(), serde_json::json!("value"))]);

        let message = updater.new_agent_message(parts(), Some(metadata.clone()));
        assert_eq!(message.role, Role::Agent);
        assert_eq!(message.task_id.as_deref(), Some("test-task-id"));
        assert_eq!(message.context_id.as_deref(), Some("test-context-id"));
        assert_eq!(message.parts, parts());
        assert_eq!(message.metadata, Some(metadata));
        assert!(queue.is_empty());
    }
}
