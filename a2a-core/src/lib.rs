//! # A2A task execution core
//!
//! The server-side engine of an `Agent2Agent` (A2A) Protocol SDK: it runs an
//! agent in the background, carries the events it publishes through a
//! per-task queue, folds them into a persistent task and answers the caller
//! in the mode it asked for.
//!
//! Transports (JSON-RPC, REST, gRPC) sit on top and call a
//! [`RequestHandler`]; this crate implements none of them.
//!
//! ## Features
//!
//! - **Event queues**: bounded, closable, with taps for resubscription
//! - **Result modes**: streaming, blocking, and early return on interruption
//! - **One execution per task**: concurrent sends for a task are rejected
//! - **Push notifications**: per-task webhook configs and an HTTP sender
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use a2a_core::server::{DefaultRequestHandler, InMemoryTaskStore, RequestHandler};
//! use a2a_core::types::{Message, MessageSendParams};
//!
//! let handler = DefaultRequestHandler::new(MyAgent, Arc::new(InMemoryTaskStore::new()));
//! let params = MessageSendParams::new(Message::user_text("hello"));
//! let response = handler.on_message_send(params, None).await?;
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod error;
pub mod server;
pub mod types;

pub use error::{A2AError, QueueError, Result};
pub use server::{
    AgentExecutor, DefaultRequestHandler, Event, EventConsumer, EventQueue, EventStream,
    HandlerConfig, QueueManager, RequestContext, RequestHandler, ResultAggregator,
    SendMessageResponse, TaskManager, TaskStore, TaskUpdater,
};
pub use types::{
    Artifact, Message, MessageSendParams, Part, Role, Task, TaskArtifactUpdateEvent,
    TaskIdParams, TaskQueryParams, TaskState, TaskStatus, TaskStatusUpdateEvent,
};

/// Protocol version supported by this crate.
pub const PROTOCOL_VERSION: &str = "0.3.0";

/// Crate version.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
