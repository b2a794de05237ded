//! Error types for the task execution core.
//!
//! Every failure surfaced to a transport adapter is an [`A2AError`]. Protocol
//! kinds map to stable JSON-RPC codes through [`A2AError::to_jsonrpc_error`],
//! so adapters never have to invent their own mapping.
//!
//! # Error Categories
//!
//! - **Protocol errors**: task not found, invalid params, unsupported operation
//! - **Queue errors**: an event queue reported empty or closed
//! - **Infrastructure errors**: HTTP delivery and JSON serialization

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A specialized Result type for A2A operations.
pub type Result<T> = std::result::Result<T, A2AError>;

/// Signal raised by an [`EventQueue`](crate::server::EventQueue) when no event
/// can be handed out.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Nothing is buffered right now and the caller asked not to wait.
    #[error("queue is empty")]
    Empty,
    /// The queue is closed and every buffered event has been handed out.
    #[error("queue is closed")]
    Closed,
}

/// The main error type of the crate.
#[derive(Error, Debug)]
pub enum A2AError {
    /// The request payload was well-formed but not a valid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Parameters were malformed, or referenced a task in the wrong state.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The server could not produce a coherent result.
    #[error("internal error: {0}")]
    InternalError(String),

    /// A task with the provided ID was not found.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The task was in a state where it could not be canceled.
    #[error("task cannot be canceled: {0}")]
    TaskNotCancelable(String),

    /// The agent does not support push notifications.
    #[error("push notification not supported")]
    PushNotificationNotSupported,

    /// The requested operation is not supported by this server.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The agent produced something the operation cannot use.
    #[error("invalid agent response: {0}")]
    InvalidAgentResponse(String),

    /// An event queue refused to hand out an event.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// HTTP transport error (push delivery).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl A2AError {
    /// Creates an [`A2AError::TaskNotFound`] naming the task.
    pub fn task_not_found(task_id: impl fmt::Display) -> Self {
        Self::TaskNotFound(format!("Task {task_id} was not found"))
    }

    /// Returns `true` if this is one of the protocol-level kinds.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        !matches!(
            self,
            Self::Queue(_) | Self::Http(_) | Self::Json(_) | Self::Other(_)
        )
    }

    /// Converts this error to a [`JsonRpcError`] for transport serialization.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code() as i32,
            message: self.to_string(),
            data: None,
        }
    }

    /// The stable wire-level code for this error kind.
    #[must_use]
    pub const fn code(&self) -> JsonRpcErrorCode {
        match self {
            Self::InvalidRequest(_) => JsonRpcErrorCode::InvalidRequest,
            Self::InvalidParams(_) => JsonRpcErrorCode::InvalidParams,
            Self::TaskNotFound(_) => JsonRpcErrorCode::TaskNotFound,
            Self::TaskNotCancelable(_) => JsonRpcErrorCode::TaskNotCancelable,
            Self::PushNotificationNotSupported => JsonRpcErrorCode::PushNotificationNotSupported,
            Self::UnsupportedOperation(_) => JsonRpcErrorCode::UnsupportedOperation,
            Self::InvalidAgentResponse(_) => JsonRpcErrorCode::InvalidAgentResponse,
            Self::InternalError(_)
            | Self::Queue(_)
            | Self::Http(_)
            | Self::Json(_)
            | Self::Other(_) => JsonRpcErrorCode::InternalError,
        }
    }
}

/// JSON-RPC 2.0 and A2A error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum JsonRpcErrorCode {
    /// The JSON sent is not a valid Request object.
    InvalidRequest = -32600,
    /// Invalid method parameter(s).
    InvalidParams = -32602,
    /// Internal JSON-RPC error.
    InternalError = -32603,
    /// Task not found.
    TaskNotFound = -32001,
    /// Task cannot be canceled.
    TaskNotCancelable = -32002,
    /// Push notification not supported.
    PushNotificationNotSupported = -32003,
    /// Operation not supported.
    UnsupportedOperation = -32004,
    /// Content type not supported.
    ContentTypeNotSupported = -32005,
    /// Invalid agent response.
    InvalidAgentResponse = -32006,
}

impl JsonRpcErrorCode {
    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Request payload validation error",
            Self::InvalidParams => "Invalid parameters",
            Self::InternalError => "Internal error",
            Self::TaskNotFound => "Task not found",
            Self::TaskNotCancelable => "Task cannot be canceled",
            Self::PushNotificationNotSupported => "Push Notification is not supported",
            Self::UnsupportedOperation => "This operation is not supported",
            Self::ContentTypeNotSupported => "Incompatible content types",
            Self::InvalidAgentResponse => "Invalid agent response",
        }
    }
}

impl From<i32> for JsonRpcErrorCode {
    fn from(code: i32) -> Self {
        match code {
            -32600 => Self::InvalidRequest,
            -32602 => Self::InvalidParams,
            -32001 => Self::TaskNotFound,
            -32002 => Self::TaskNotCancelable,
            -32003 => Self::PushNotificationNotSupported,
            -32004 => Self::UnsupportedOperation,
            -32005 => Self::ContentTypeNotSupported,
            -32006 => Self::InvalidAgentResponse,
            _ => Self::InternalError,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
pub struct JsonRpcError {
    /// A number indicating the error type.
    pub code: i32,
    /// A short description of the error.
    pub message: String,
    /// Additional information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl JsonRpcError {
    /// Returns the error code as an enum variant.
    #[must_use]
    pub fn error_code(&self) -> JsonRpcErrorCode {
        JsonRpcErrorCode::from(self.code)
    }
}
