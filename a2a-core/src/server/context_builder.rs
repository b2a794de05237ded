//! Builds the [`RequestContext`] handed to the agent.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{RequestContext, ServerCallContext, TaskStore};
use crate::error::Result;
use crate::types::{MessageSendParams, Task};

/// Assembles a [`RequestContext`] for an incoming request.
#[async_trait]
pub trait RequestContextBuilder: Send + Sync {
    /// Builds the context. `task` is the stored task the request continues.
    async fn build(
        &self,
        params: Option<&MessageSendParams>,
        task_id: Option<&str>,
        context_id: Option<&str>,
        task: Option<Task>,
        call_context: Option<&ServerCallContext>,
    ) -> Result<RequestContext>;
}

/// Default builder: resolves IDs and optionally loads referenced tasks.
pub struct SimpleRequestContextBuilder {
    task_store: Option<Arc<dyn TaskStore>>,
    populate_referred_tasks: bool,
}

impl std::fmt::Debug for SimpleRequestContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleRequestContextBuilder")
            .field("has_task_store", &self.task_store.is_some())
            .field("populate_referred_tasks", &self.populate_referred_tasks)
            .finish()
    }
}

impl Default for SimpleRequestContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleRequestContextBuilder {
    /// Creates a builder that does not load referenced tasks.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            task_store: None,
            populate_referred_tasks: false,
        }
    }

    /// Loads the tasks named in `reference_task_ids` from `store` into
    /// [`RequestContext::related_tasks`].
    #[must_use]
    pub fn with_referred_tasks(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.task_store = Some(store);
        self.populate_referred_tasks = true;
        self
    }

    async fn load_related(&self, params: Option<&MessageSendParams>) -> Vec<Task> {
        let Some(store) = self.task_store.as_ref().filter(|_| self.populate_referred_tasks) else {
            return Vec::new();
        };
        let Some(ids) = params.and_then(|p| p.message.reference_task_ids.as_ref()) else {
            return Vec::new();
        };

        let mut tasks = Vec::with_capacity(ids.len());
        for task_id in ids {
            match store.get(task_id).await {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => debug!(referenced_task_id = %task_id, "Referenced task not found"),
                Err(e) => {
                    warn!(
                        error = %e,
                        referenced_task_id = %task_id,
                        "Failed to load referenced task"
                    );
                }
            }
        }
        tasks
    }
}

#[async_trait]
impl RequestContextBuilder for SimpleRequestContextBuilder {
    async fn build(
        &self,
        params: Option<&MessageSendParams>,
        task_id: Option<&str>,
        context_id: Option<&str>,
        task: Option<Task>,
        call_context: Option<&ServerCallContext>,
    ) -> Result<RequestContext> {
        let mut ctx = RequestContext::from_params(params, task_id, context_id, task)?;
        for related in self.load_related(params).await {
            ctx.attach_related_task(related);
        }
        ctx.call_context = call_context.cloned();
        Ok(ctx)
    }
}
