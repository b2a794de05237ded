//! Folds agent events into one canonical task.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Event, TaskStore};
use crate::error::{A2AError, Result};
use crate::types::{Message, Task, TaskArtifactUpdateEvent, TaskStatusUpdateEvent};

/// Tracks the state of a single task while its events are processed.
///
/// One manager serves one task. Every change is written through to the
/// [`TaskStore`].
pub struct TaskManager {
    task_id: Option<String>,
    context_id: Option<String>,
    store: Arc<dyn TaskStore>,
    initial_message: Option<Message>,
    current_task: Option<Task>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("task_id", &self.task_id)
            .field("context_id", &self.context_id)
            .field("current_task", &self.current_task.as_ref().map(|t| &t.id))
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Creates a manager for the given task.
    ///
    /// `task_id` may be absent for a brand new task; it is then adopted from
    /// the first event. `initial_message` seeds the history of a task
    /// synthesized from an update event.
    pub fn new(
        task_id: Option<String>,
        context_id: Option<String>,
        store: Arc<dyn TaskStore>,
        initial_message: Option<Message>,
    ) -> Result<Self> {
        if task_id.as_deref().is_some_and(str::is_empty) {
            return Err(A2AError::InvalidParams(
                "Task ID must be a non-empty string".into(),
            ));
        }
        Ok(Self {
            task_id,
            context_id,
            store,
            initial_message,
            current_task: None,
        })
    }

    /// The task ID, once known.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// The context ID, once known.
    #[must_use]
    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    /// The in-memory task, without consulting the store.
    #[must_use]
    pub const fn current_task(&self) -> Option<&Task> {
        self.current_task.as_ref()
    }

    /// Returns the task, loading it from the store on first access.
    pub async fn get_task(&mut self) -> Result<Option<Task>> {
        let Some(task_id) = self.task_id.as_deref() else {
            return Ok(None);
        };
        if self.current_task.is_none() {
            self.current_task = self.store.get(task_id).await?;
        }
        Ok(self.current_task.clone())
    }

    /// Applies one event to the task and persists the result.
    ///
    /// Messages are not folded. An event naming another task or context is
    /// rejected with [`A2AError::InvalidParams`], and so is a task snapshot
    /// once a task is set, including one loaded from the store. Status and
    /// artifact updates for a task in a terminal state are ignored.
    pub async fn process(&mut self, event: &Event) -> Result<()> {
        self.check_ids(event)?;
        match event {
            Event::Task(task) => {
                if self.get_task().await?.is_some() {
                    return Err(A2AError::InvalidParams(
                        "Task is already set, create new manager for new tasks.".into(),
                    ));
                }
                debug!(task_id = %task.id, state = ?task.state(), "Adopting task snapshot");
                self.save(task.clone()).await
            }
            Event::StatusUpdate(update) => self.apply_status(update).await,
            Event::ArtifactUpdate(update) => self.apply_artifact(update).await,
            Event::Message(_) => Ok(()),
        }
    }

    /// Appends `message` to the history, moving any status message ahead of it.
    pub fn update_with_message(&mut self, message: Message, mut task: Task) -> Task {
        if let Some(status_message) = task.status.message.take() {
            task.history.push(status_message);
        }
        task.history.push(message);
        self.current_task = Some(task.clone());
        task
    }

    /// Persists `task` and makes it the current task.
    pub async fn save(&mut self, task: Task) -> Result<()> {
        self.store.save(&task).await?;
        if self.task_id.is_none() {
            info!(task_id = %task.id, "New task created");
            self.task_id = Some(task.id.clone());
        }
        if self.context_id.is_none() {
            self.context_id = Some(task.context_id.clone());
        }
        self.current_task = Some(task);
        Ok(())
    }

    fn check_ids(&self, event: &Event) -> Result<()> {
        if let (Some(expected), Some(actual)) = (self.task_id.as_deref(), event.task_id())
            && expected != actual
        {
            return Err(A2AError::InvalidParams(format!(
                "Task in event doesn't match TaskManager {expected} : {actual}"
            )));
        }
        if let (Some(expected), Some(actual)) = (self.context_id.as_deref(), event.context_id())
            && expected != actual
        {
            return Err(A2AError::InvalidParams(format!(
                "Context in event doesn't match TaskManager {expected} : {actual}"
            )));
        }
        Ok(())
    }

    async fn apply_status(&mut self, update: &TaskStatusUpdateEvent) -> Result<()> {
        let mut task = self.ensure_task(&update.task_id, &update.context_id).await?;
        if task.is_terminal() {
            warn!(
                task_id = %task.id,
                state = ?task.state(),
                ignored = ?update.status.state,
                "Task is in a terminal state, ignoring status update"
            );
            return Ok(());
        }
        debug!(task_id = %task.id, state = ?update.status.state, "Updating task status");

        let mut status = update.status.clone();
        if let Some(message) = status.message.take() {
            task.history.push(message);
        }
        task.status = status;
        if let Some(metadata) = &update.metadata {
            task.metadata
                .get_or_insert_with(HashMap::new)
                .extend(metadata.clone());
        }
        self.save(task).await
    }

    async fn apply_artifact(&mut self, update: &TaskArtifactUpdateEvent) -> Result<()> {
        let mut task = self.ensure_task(&update.task_id, &update.context_id).await?;
        if task.is_terminal() {
            warn!(
                task_id = %task.id,
                state = ?task.state(),
                "Task is in a terminal state, ignoring artifact update"
            );
            return Ok(());
        }
        debug!(
            task_id = %task.id,
            artifact_id = %update.artifact.artifact_id,
            "Updating task artifact"
        );
        task.apply_artifact_update(update);
        self.save(task).await
    }

    async fn ensure_task(&mut self, task_id: &str, context_id: &str) -> Result<Task> {
        if let Some(task) = self.get_task().await? {
            return Ok(task);
        }
        info!(task_id = %task_id, "Task not found, creating it from the event");
        let history = self.initial_message.iter().cloned().collect();
        let task = Task::new(task_id, context_id).with_history(history);
        self.save(task.clone()).await?;
        Ok(task)
    }
}
