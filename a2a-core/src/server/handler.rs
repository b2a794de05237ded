//! The request handler interface transports call into.
//!
//! A JSON-RPC, REST or gRPC adapter decodes its payload into the parameter
//! types from [`crate::types`], calls the matching [`RequestHandler`] method
//! and encodes the result (or [`A2AError::to_jsonrpc_error`](crate::A2AError::to_jsonrpc_error))
//! back onto the wire.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::{Event, ServerCallContext};
use crate::error::Result;
use crate::types::{
    DeleteTaskPushNotificationConfigParams, GetTaskPushNotificationConfigParams,
    ListTaskPushNotificationConfigParams, Message, MessageSendParams, Task, TaskIdParams,
    TaskPushNotificationConfig, TaskQueryParams,
};

/// A boxed stream of events for streaming responses.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Server-side interface for every A2A operation.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Sends a message and waits for a final or interrupted result.
    async fn on_message_send(
        &self,
        params: MessageSendParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<SendMessageResponse>;

    /// Sends a message and streams every event the agent produces.
    async fn on_message_send_stream(
        &self,
        params: MessageSendParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<EventStream>;

    /// Fetches a task.
    async fn on_get_task(
        &self,
        params: TaskQueryParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<Task>;

    /// Cancels a task.
    async fn on_cancel_task(
        &self,
        params: TaskIdParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<Task>;

    /// Attaches to the event stream of a task that is still running.
    async fn on_resubscribe_to_task(
        &self,
        params: TaskIdParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<EventStream>;

    /// Stores a push notification config for a task.
    async fn on_set_task_push_notification_config(
        &self,
        params: TaskPushNotificationConfig,
        ctx: Option<&ServerCallContext>,
    ) -> Result<TaskPushNotificationConfig>;

    /// Fetches one push notification config of a task.
    async fn on_get_task_push_notification_config(
        &self,
        params: GetTaskPushNotificationConfigParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<TaskPushNotificationConfig>;

    /// Lists the push notification configs of a task.
    async fn on_list_task_push_notification_config(
        &self,
        params: ListTaskPushNotificationConfigParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<Vec<TaskPushNotificationConfig>>;

    /// Deletes a push notification config.
    async fn on_delete_task_push_notification_config(
        &self,
        params: DeleteTaskPushNotificationConfigParams,
        ctx: Option<&ServerCallContext>,
    ) -> Result<()>;
}

/// Result of a send: the task the message created or advanced, or a direct reply.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum SendMessageResponse {
    /// A task was created or updated.
    Task(Task),
    /// A direct message response (no task created).
    Message(Message),
}

impl SendMessageResponse {
    /// Returns the task, if this is one.
    #[must_use]
    pub const fn as_task(&self) -> Option<&Task> {
        match self {
            Self::Task(t) => Some(t),
            Self::Message(_) => None,
        }
    }
}

impl From<Task> for SendMessageResponse {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

impl From<Message> for SendMessageResponse {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}
