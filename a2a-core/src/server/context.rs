//! Per-request context handed to the agent, and per-call caller identity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{A2AError, Result};
use crate::types::{Message, MessageSendConfiguration, MessageSendParams, Task};

/// The caller of a request.
pub trait User: Send + Sync {
    /// Returns whether the user is authenticated.
    fn is_authenticated(&self) -> bool;

    /// Returns the user's display name.
    fn user_name(&self) -> &str;
}

/// A caller with no identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnauthenticatedUser;

impl User for UnauthenticatedUser {
    fn is_authenticated(&self) -> bool {
        false
    }

    fn user_name(&self) -> &str {
        ""
    }
}

/// A caller authenticated by the transport.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    name: String,
}

impl AuthenticatedUser {
    /// Creates an authenticated user with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl User for AuthenticatedUser {
    fn is_authenticated(&self) -> bool {
        true
    }

    fn user_name(&self) -> &str {
        &self.name
    }
}

/// Request-scoped information supplied by the transport adapter.
#[derive(Clone)]
pub struct ServerCallContext {
    user: Arc<dyn User>,
    /// Extensions the client asked for.
    pub requested_extensions: HashSet<String>,
    /// Extensions the agent activated for the response.
    pub activated_extensions: HashSet<String>,
    /// Arbitrary data for adapters and agents.
    pub state: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for ServerCallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCallContext")
            .field("user_name", &self.user.user_name())
            .field("is_authenticated", &self.user.is_authenticated())
            .field("requested_extensions", &self.requested_extensions)
            .field("activated_extensions", &self.activated_extensions)
            .finish_non_exhaustive()
    }
}

impl Default for ServerCallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCallContext {
    /// Creates a context for an unauthenticated caller.
    #[must_use]
    pub fn new() -> Self {
        Self::with_user(UnauthenticatedUser)
    }

    /// Creates a context for the given caller.
    pub fn with_user(user: impl User + 'static) -> Self {
        Self {
            user: Arc::new(user),
            requested_extensions: HashSet::new(),
            activated_extensions: HashSet::new(),
            state: HashMap::new(),
        }
    }

    /// Sets the requested extensions.
    #[must_use]
    pub fn with_requested_extensions(
        mut self,
        extensions: impl IntoIterator<Item = String>,
    ) -> Self {
        self.requested_extensions = extensions.into_iter().collect();
        self
    }

    /// Returns the caller.
    #[must_use]
    pub fn user(&self) -> &dyn User {
        self.user.as_ref()
    }

    /// Gets a value from the state.
    #[must_use]
    pub fn get_state(&self, key: &str) -> Option<&serde_json::Value> {
        self.state.get(key)
    }

    /// Sets a value in the state.
    pub fn set_state(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.state.insert(key.into(), value);
    }
}

/// Everything an [`AgentExecutor`](super::AgentExecutor) knows about the
/// request it is serving.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The task being worked on.
    pub task_id: String,
    /// The conversation the task belongs to.
    pub context_id: String,
    /// The triggering message, with its task and context IDs filled in.
    /// `None` for cancel requests.
    pub message: Option<Message>,
    /// The send options.
    pub configuration: Option<MessageSendConfiguration>,
    /// The stored task, when the message continues one.
    pub current_task: Option<Task>,
    /// Tasks the message refers to.
    pub related_tasks: Vec<Task>,
    /// Request metadata.
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    /// The transport's call context.
    pub call_context: Option<ServerCallContext>,
}

impl RequestContext {
    /// Creates a bare context for a known task.
    pub fn new(task_id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            message: None,
            configuration: None,
            current_task: None,
            related_tasks: Vec::new(),
            metadata: None,
            call_context: None,
        }
    }

    /// Resolves the task and context IDs of a send request.
    ///
    /// Explicit IDs win, then the message's, then the stored task's, then
    /// fresh UUIDs. The resolved IDs are written back into the message. A
    /// message or task that names different IDs is rejected with
    /// `bad task id` or `bad context id`.
    pub fn from_params(
        params: Option<&MessageSendParams>,
        task_id: Option<&str>,
        context_id: Option<&str>,
        task: Option<Task>,
    ) -> Result<Self> {
        let mut message = params.map(|p| p.message.clone());
        let message_task_id = message.as_ref().and_then(|m| m.task_id.clone());
        let message_context_id = message.as_ref().and_then(|m| m.context_id.clone());

        let task_id = task_id
            .map(String::from)
            .or_else(|| message_task_id.clone())
            .or_else(|| task.as_ref().map(|t| t.id.clone()))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let context_id = context_id
            .map(String::from)
            .or_else(|| message_context_id.clone())
            .or_else(|| task.as_ref().map(|t| t.context_id.clone()))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut known_task_ids = message_task_id.iter().chain(task.as_ref().map(|t| &t.id));
        if known_task_ids.any(|id| *id != task_id) {
            return Err(A2AError::InvalidParams("bad task id".into()));
        }
        let mut known_context_ids = message_context_id
            .iter()
            .chain(task.as_ref().map(|t| &t.context_id));
        if known_context_ids.any(|id| *id != context_id) {
            return Err(A2AError::InvalidParams("bad context id".into()));
        }

        if let Some(message) = message.as_mut() {
            message.task_id = Some(task_id.clone());
            message.context_id = Some(context_id.clone());
        }

        Ok(Self {
            task_id,
            context_id,
            message,
            configuration: params.and_then(|p| p.configuration.clone()),
            current_task: task,
            related_tasks: Vec::new(),
            metadata: params.and_then(|p| p.metadata.clone()),
            call_context: None,
        })
    }

    /// Sets the stored task.
    #[must_use]
    pub fn with_task(mut self, task: Task) -> Self {
        self.current_task = Some(task);
        self
    }

    /// Sets the call context.
    #[must_use]
    pub fn with_call_context(mut self, call_context: ServerCallContext) -> Self {
        self.call_context = Some(call_context);
        self
    }

    /// Text of the triggering message, parts joined with newlines.
    #[must_use]
    pub fn user_input(&self) -> String {
        self.message
            .as_ref()
            .map(Message::text_content)
            .unwrap_or_default()
    }

    /// Adds a task the request refers to.
    pub fn attach_related_task(&mut self, task: Task) {
        self.related_tasks.push(task);
    }

    /// Extensions the client asked for.
    #[must_use]
    pub fn requested_extensions(&self) -> HashSet<String> {
        self.call_context
            .as_ref()
            .map(|c| c.requested_extensions.clone())
            .unwrap_or_default()
    }

    /// Marks an extension as active for the response.
    pub fn add_activated_extension(&mut self, uri: impl Into<String>) {
        if let Some(call_context) = self.call_context.as_mut() {
            call_context.activated_extensions.insert(uri.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(message: Message) -> MessageSendParams {
        MessageSendParams::new(message)
    }

    #[test]
    fn test_generates_ids_and_writes_them_back() {
        let p = params(Message::user_text("hi"));
        let ctx = RequestContext::from_params(Some(&p), None, None, None).unwrap();

        assert!(!ctx.task_id.is_empty());
        assert_ne!(ctx.task_id, ctx.context_id);
        let message = ctx.message.as_ref().unwrap();
        assert_eq!(message.task_id.as_deref(), Some(ctx.task_id.as_str()));
        assert_eq!(message.context_id.as_deref(), Some(ctx.context_id.as_str()));
        assert_eq!(ctx.user_input(), "hi");
    }

    #[test]
    fn test_ids_follow_stored_task() {
        let p = params(Message::user_text("again"));
        let ctx =
            RequestContext::from_params(Some(&p), None, None, Some(Task::new("t1", "c1"))).unwrap();
        assert_eq!(ctx.task_id, "t1");
        assert_eq!(ctx.context_id, "c1");
        assert!(ctx.current_task.is_some());
    }

    #[test]
    fn test_rejects_mismatched_ids() {
        let task = Task::new("t1", "c1");
        let p = params(Message::user_text("x").with_task_id("t1"));

        let err = RequestContext::from_params(Some(&p), Some("t2"), None, Some(task.clone()))
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid params: bad task id");

        let err = RequestContext::from_params(Some(&p), Some("t1"), Some("other"), Some(task))
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid params: bad context id");
    }

    #[test]
    fn test_without_params() {
        let ctx = RequestContext::from_params(None, None, None, None).unwrap();
        assert!(ctx.message.is_none());
        assert_eq!(ctx.user_input(), "");
        assert!(ctx.related_tasks.is_empty());
    }

    #[test]
    fn test_extensions_follow_call_context() {
        let call = ServerCallContext::with_user(AuthenticatedUser::new("alice"))
            .with_requested_extensions(["foo".to_string(), "bar".to_string()]);
        let mut ctx = RequestContext::new("t1", "c1").with_call_context(call);

        assert_eq!(ctx.requested_extensions().len(), 2);
        ctx.add_activated_extension("foo");
        let call = ctx.call_context.as_ref().unwrap();
        assert!(call.activated_extensions.contains("foo"));
        assert!(call.user().is_authenticated());
        assert_eq!(call.user().user_name(), "alice");
    }
}
