//! Request parameters accepted by the request handler.
//!
//! These are the transport-neutral payloads a JSON-RPC, REST or gRPC adapter
//! decodes before calling into [`RequestHandler`](crate::server::RequestHandler).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Message;

/// Parameters for sending a message to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendParams {
    /// The message being sent to the agent.
    pub message: Message,
    /// Optional configuration for the send request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<MessageSendConfiguration>,
    /// Optional metadata for extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl MessageSendParams {
    /// Creates send parameters with a message.
    pub fn new(message: Message) -> Self {
        Self {
            message,
            configuration: None,
            metadata: None,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_configuration(mut self, config: MessageSendConfiguration) -> Self {
        self.configuration = Some(config);
        self
    }

    /// Whether the caller wants to wait for a final or interrupted result.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.configuration
            .as_ref()
            .and_then(|c| c.blocking)
            .unwrap_or(true)
    }

    /// The requested history length, if any.
    #[must_use]
    pub fn history_length(&self) -> Option<u32> {
        self.configuration.as_ref().and_then(|c| c.history_length)
    }
}

/// Options for a send or stream request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendConfiguration {
    /// Output MIME types the client accepts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_output_modes: Option<Vec<String>>,
    /// Wait for a final or interrupted result. Defaults to true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
    /// Number of recent messages to include in the returned task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_length: Option<u32>,
    /// Where to deliver task updates out of band.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_notification_config: Option<PushNotificationConfig>,
}

impl MessageSendConfiguration {
    /// Sets the blocking flag.
    #[must_use]
    pub const fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = Some(blocking);
        self
    }

    /// Sets the push notification config.
    #[must_use]
    pub fn with_push_notification_config(mut self, config: PushNotificationConfig) -> Self {
        self.push_notification_config = Some(config);
        self
    }
}

/// Parameters for fetching a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueryParams {
    /// The task ID.
    pub id: String,
    /// Number of recent messages to include.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_length: Option<u32>,
    /// Optional metadata associated with the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl TaskQueryParams {
    /// Creates query parameters.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history_length: None,
            metadata: None,
        }
    }

    /// Sets the history length.
    #[must_use]
    pub const fn with_history_length(mut self, len: u32) -> Self {
        self.history_length = Some(len);
        self
    }
}

/// Parameters naming a single task, used by cancel and resubscribe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    /// The task ID.
    pub id: String,
    /// Optional metadata associated with the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl TaskIdParams {
    /// Creates task ID parameters.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: None,
        }
    }
}

/// Where and how to deliver push notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushNotificationConfig {
    /// The callback URL.
    pub url: String,
    /// Identifies this config among the task's configs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Sent back in `X-A2A-Notification-Token` so the receiver can validate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Authentication details for the callback endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<PushNotificationAuthenticationInfo>,
}

impl PushNotificationConfig {
    /// Creates a config for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: None,
            token: None,
            authentication: None,
        }
    }

    /// Sets the config ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the validation token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the authentication details.
    #[must_use]
    pub fn with_authentication(mut self, auth: PushNotificationAuthenticationInfo) -> Self {
        self.authentication = Some(auth);
        self
    }
}

/// Authentication details for a push endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushNotificationAuthenticationInfo {
    /// Supported schemes, e.g. `Bearer` or `Basic`.
    pub schemes: Vec<String>,
    /// Credentials for the first usable scheme.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

/// A push notification config bound to a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPushNotificationConfig {
    /// The task ID.
    pub task_id: String,
    /// The config.
    pub push_notification_config: PushNotificationConfig,
}

impl TaskPushNotificationConfig {
    /// Binds a config to a task.
    pub fn new(task_id: impl Into<String>, config: PushNotificationConfig) -> Self {
        Self {
            task_id: task_id.into(),
            push_notification_config: config,
        }
    }
}

/// Parameters for fetching one push notification config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTaskPushNotificationConfigParams {
    /// The task ID.
    pub id: String,
    /// The config to fetch. The first stored config when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_notification_config_id: Option<String>,
    /// Optional metadata associated with the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl GetTaskPushNotificationConfigParams {
    /// Creates get parameters.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            push_notification_config_id: None,
            metadata: None,
        }
    }

    /// Sets the config ID.
    #[must_use]
    pub fn with_config_id(mut self, config_id: impl Into<String>) -> Self {
        self.push_notification_config_id = Some(config_id.into());
        self
    }
}

/// Parameters for listing a task's push notification configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTaskPushNotificationConfigParams {
    /// The task ID.
    pub id: String,
    /// Optional metadata associated with the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl ListTaskPushNotificationConfigParams {
    /// Creates list parameters.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: None,
        }
    }
}

/// Parameters for deleting a push notification config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTaskPushNotificationConfigParams {
    /// The task ID.
    pub id: String,
    /// The config to delete.
    pub push_notification_config_id: String,
    /// Optional metadata associated with the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl DeleteTaskPushNotificationConfigParams {
    /// Creates delete parameters.
    pub fn new(id: impl Into<String>, config_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            push_notification_config_id: config_id.into(),
            metadata: None,
        }
    }
}
