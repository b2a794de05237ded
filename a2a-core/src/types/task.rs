//! Tasks and the update events that mutate them.
//!
//! A [`Task`] is the long-running unit of work the server tracks. Agents never
//! mutate tasks directly; they publish [`TaskStatusUpdateEvent`]s and
//! [`TaskArtifactUpdateEvent`]s which the server folds into the stored task.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Message, Part};

/// Lifecycle states of a task.
///
/// `Completed`, `Canceled`, `Failed` and `Rejected` are terminal: once reached,
/// no event may transition the task and no execution may start against it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Accepted, not yet started.
    #[default]
    Submitted,
    /// Being processed.
    Working,
    /// Paused until the user provides more input.
    InputRequired,
    /// Paused until the caller authorizes something out of band.
    AuthRequired,
    /// Finished successfully.
    Completed,
    /// Canceled by the client.
    Canceled,
    /// Finished with an error.
    Failed,
    /// Refused by the agent.
    Rejected,
    /// State could not be determined.
    Unknown,
}

impl TaskState {
    /// Returns true if no further transition is permitted.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Canceled | Self::Failed | Self::Rejected
        )
    }

    /// Returns true if the task is paused waiting on the client.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::InputRequired | Self::AuthRequired)
    }
}

/// The status of a task at a point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskStatus {
    /// Current lifecycle state.
    pub state: TaskState,
    /// The message that accompanied this status, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// RFC 3339 timestamp of when the status was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl TaskStatus {
    /// Creates a status stamped with the current time.
    #[must_use]
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Creates a status carrying a message.
    #[must_use]
    pub fn with_message(state: TaskState, message: Message) -> Self {
        Self {
            message: Some(message),
            ..Self::new(state)
        }
    }
}

/// A single, stateful operation between a client and an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique identifier of the task.
    pub id: String,
    /// Groups related tasks into one conversation.
    pub context_id: String,
    /// Current status.
    pub status: TaskStatus,
    /// Messages exchanged so far.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Message>,
    /// Outputs produced so far.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    /// Optional metadata for extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Task {
    /// Creates a submitted task with the given IDs.
    pub fn new(id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context_id: context_id.into(),
            status: TaskStatus::new(TaskState::Submitted),
            history: Vec::new(),
            artifacts: Vec::new(),
            metadata: None,
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the history.
    #[must_use]
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.status.state
    }

    /// Returns true if the task is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.state.is_terminal()
    }

    /// Finds an artifact by its ID.
    #[must_use]
    pub fn artifact(&self, artifact_id: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.artifact_id == artifact_id)
    }

    /// Keeps only the last `len` messages of the history.
    ///
    /// `None` and `Some(0)` leave the history untouched.
    pub fn truncate_history(&mut self, len: Option<u32>) {
        let Some(max) = len.filter(|n| *n > 0).map(|n| n as usize) else {
            return;
        };
        if self.history.len() > max {
            self.history.drain(..self.history.len() - max);
        }
    }

    /// Applies an artifact update.
    ///
    /// With `append` set, the event's parts extend the artifact with the same
    /// ID; an append for an unknown artifact is dropped. Otherwise the artifact
    /// replaces the one with the same ID, or is added at the end.
    pub fn apply_artifact_update(&mut self, event: &TaskArtifactUpdateEvent) {
        let incoming = &event.artifact;
        let existing = self
            .artifacts
            .iter_mut()
            .find(|a| a.artifact_id == incoming.artifact_id);

        match (event.append.unwrap_or(false), existing) {
            (true, Some(artifact)) => artifact.parts.extend(incoming.parts.iter().cloned()),
            (true, None) => {
                warn!(
                    task_id = %self.id,
                    artifact_id = %incoming.artifact_id,
                    "Received append=true for nonexistent artifact; ignoring chunk"
                );
            }
            (false, Some(artifact)) => *artifact = incoming.clone(),
            (false, None) => self.artifacts.push(incoming.clone()),
        }
    }
}

/// A file, data structure, or other output produced by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Identifier of the artifact within its task.
    pub artifact_id: String,
    /// The content.
    pub parts: Vec<Part>,
    /// Human-readable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional metadata for extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Artifact {
    /// Creates an artifact with the given ID and parts.
    pub fn new(artifact_id: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            parts,
            name: None,
            description: None,
            metadata: None,
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Published by an agent when a task's status changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    /// The task that changed.
    pub task_id: String,
    /// Its context.
    pub context_id: String,
    /// The new status.
    pub status: TaskStatus,
    /// True for the last event of an execution.
    #[serde(default)]
    pub r#final: bool,
    /// Optional metadata for extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl TaskStatusUpdateEvent {
    /// Creates a status update event.
    pub fn new(
        task_id: impl Into<String>,
        context_id: impl Into<String>,
        status: TaskStatus,
        r#final: bool,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            status,
            r#final,
            metadata: None,
        }
    }
}

/// Published by an agent when it produces or extends an artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskArtifactUpdateEvent {
    /// The task the artifact belongs to.
    pub task_id: String,
    /// Its context.
    pub context_id: String,
    /// The artifact, or the chunk of it being appended.
    pub artifact: Artifact,
    /// Extend the existing artifact instead of replacing it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,
    /// Marks the last chunk of a streamed artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_chunk: Option<bool>,
    /// Optional metadata for extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl TaskArtifactUpdateEvent {
    /// Creates an artifact update event that replaces or adds the artifact.
    pub fn new(
        task_id: impl Into<String>,
        context_id: impl Into<String>,
        artifact: Artifact,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            artifact,
            append: None,
            last_chunk: None,
            metadata: None,
        }
    }

    /// Sets the append flag.
    #[must_use]
    pub const fn with_append(mut self, append: bool) -> Self {
        self.append = Some(append);
        self
    }
}
