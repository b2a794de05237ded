//! Task persistence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::Task;

/// Storage backend for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Saves or replaces a task.
    async fn save(&self, task: &Task) -> Result<()>;

    /// Retrieves a task by ID.
    async fn get(&self, task_id: &str) -> Result<Option<Task>>;

    /// Deletes a task by ID. Deleting an unknown task is not an error.
    async fn delete(&self, task_id: &str) -> Result<()>;
}

/// Process-local task store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(task_id).cloned())
    }

    async fn delete(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        tasks.remove(task_id);
        Ok(())
    }
}
