//! Events flowing from an agent through an [`EventQueue`](super::EventQueue).

use serde::{Deserialize, Serialize};

use crate::error::{A2AError, Result};
use crate::types::{Message, Task, TaskArtifactUpdateEvent, TaskState, TaskStatusUpdateEvent};

/// An item published by an agent, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    /// A complete task snapshot.
    #[serde(rename = "task")]
    Task(Task),
    /// A direct reply with no task behind it.
    #[serde(rename = "message")]
    Message(Message),
    /// A status change.
    #[serde(rename = "status-update")]
    StatusUpdate(TaskStatusUpdateEvent),
    /// A new or extended artifact.
    #[serde(rename = "artifact-update")]
    ArtifactUpdate(TaskArtifactUpdateEvent),
}

impl Event {
    /// Returns the task ID carried by the event, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Task(t) => Some(&t.id),
            Self::Message(m) => m.task_id.as_deref(),
            Self::StatusUpdate(e) => Some(&e.task_id),
            Self::ArtifactUpdate(e) => Some(&e.task_id),
        }
    }

    /// Returns the context ID carried by the event, if any.
    #[must_use]
    pub fn context_id(&self) -> Option<&str> {
        match self {
            Self::Task(t) => Some(&t.context_id),
            Self::Message(m) => m.context_id.as_deref(),
            Self::StatusUpdate(e) => Some(&e.context_id),
            Self::ArtifactUpdate(e) => Some(&e.context_id),
        }
    }

    /// Returns true if no further events are expected after this one.
    ///
    /// A message, a status update marked `final`, and a task snapshot whose
    /// state is terminal, `input-required` or `unknown` all end an execution.
    #[must_use]
    pub fn is_final(&self) -> bool {
        match self {
            Self::Message(_) => true,
            Self::StatusUpdate(e) => e.r#final,
            Self::Task(t) => {
                t.is_terminal()
                    || matches!(t.state(), TaskState::InputRequired | TaskState::Unknown)
            }
            Self::ArtifactUpdate(_) => false,
        }
    }

    /// The task state this event reports, for task snapshots and status updates.
    #[must_use]
    pub const fn state(&self) -> Option<TaskState> {
        match self {
            Self::Task(t) => Some(t.status.state),
            Self::StatusUpdate(e) => Some(e.status.state),
            Self::Message(_) | Self::ArtifactUpdate(_) => None,
        }
    }

    /// Checks that the identifiers an event must carry are present.
    pub fn validate(&self) -> Result<()> {
        let missing = match self {
            Self::Task(t) if t.id.is_empty() => Some("task id"),
            Self::Task(t) if t.context_id.is_empty() => Some("context id"),
            Self::Message(m) if m.message_id.is_empty() => Some("message id"),
            Self::StatusUpdate(e) if e.task_id.is_empty() => Some("task id"),
            Self::ArtifactUpdate(e) if e.task_id.is_empty() => Some("task id"),
            Self::ArtifactUpdate(e) if e.artifact.artifact_id.is_empty() => Some("artifact id"),
            _ => None,
        };
        match missing {
            Some(field) => Err(A2AError::InvalidAgentResponse(format!(
                "event is missing its {field}"
            ))),
            None => Ok(()),
        }
    }
}

impl From<Task> for Event {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

impl From<Message> for Event {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<TaskStatusUpdateEvent> for Event {
    fn from(event: TaskStatusUpdateEvent) -> Self {
        Self::StatusUpdate(event)
    }
}

impl From<TaskArtifactUpdateEvent> for Event {
    fn from(event: TaskArtifactUpdateEvent) -> Self {
        Self::ArtifactUpdate(event)
    }
}
