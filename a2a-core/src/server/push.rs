//! Push notification infrastructure: config storage and HTTP sender.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::error::{A2AError, Result};
use crate::types::{PushNotificationConfig, Task};

/// Header carrying the config's validation token.
pub const NOTIFICATION_TOKEN_HEADER: &str = "X-A2A-Notification-Token";

/// Stores push notification configurations per task.
#[async_trait]
pub trait PushNotificationConfigStore: Send + Sync {
    /// Adds or replaces a config for a task.
    async fn set_info(&self, task_id: &str, config: PushNotificationConfig) -> Result<()>;

    /// Returns every config of a task, in insertion order.
    async fn get_info(&self, task_id: &str) -> Result<Vec<PushNotificationConfig>>;

    /// Deletes one config, or every config of the task when `config_id` is `None`.
    async fn delete_info(&self, task_id: &str, config_id: Option<&str>) -> Result<()>;
}

/// In-memory [`PushNotificationConfigStore`].
///
/// A config without an ID is stored under the task ID, so a task has at most
/// one anonymous config.
#[derive(Debug, Default)]
pub struct InMemoryPushNotificationConfigStore {
    configs: RwLock<HashMap<String, Vec<PushNotificationConfig>>>,
}

impl InMemoryPushNotificationConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PushNotificationConfigStore for InMemoryPushNotificationConfigStore {
    async fn set_info(&self, task_id: &str, mut config: PushNotificationConfig) -> Result<()> {
        validate_push_url(&config.url)?;
        if config.id.as_deref().is_none_or(str::is_empty) {
            config.id = Some(task_id.to_string());
        }

        let mut store = self.configs.write().await;
        let configs = store.entry(task_id.to_string()).or_default();
        match configs.iter_mut().find(|c| c.id == config.id) {
            Some(existing) => *existing = config,
            None => configs.push(config),
        }
        Ok(())
    }

    async fn get_info(&self, task_id: &str) -> Result<Vec<PushNotificationConfig>> {
        let store = self.configs.read().await;
        Ok(store.get(task_id).cloned().unwrap_or_default())
    }

    async fn delete_info(&self, task_id: &str, config_id: Option<&str>) -> Result<()> {
        let config_id = config_id.unwrap_or(task_id);
        let mut store = self.configs.write().await;
        if let Some(configs) = store.get_mut(task_id) {
            configs.retain(|c| c.id.as_deref() != Some(config_id));
            if configs.is_empty() {
                store.remove(task_id);
            }
        }
        Ok(())
    }
}

fn validate_push_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| A2AError::InvalidParams(format!("invalid push notification URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(A2AError::InvalidParams(format!(
            "push notification URL must be http or https, got {other}"
        ))),
    }
}

/// Delivers task snapshots to the endpoints configured for the task.
#[async_trait]
pub trait PushNotificationSender: Send + Sync {
    /// Notifies every endpoint registered for `task`. Delivery failures are
    /// logged, never returned.
    async fn send_notification(&self, task: &Task);
}

/// Configuration for [`HttpPushNotificationSender`].
#[derive(Debug, Clone)]
pub struct HttpPushSenderConfig {
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpPushSenderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// POSTs the task JSON to every configured endpoint in parallel.
pub struct HttpPushNotificationSender {
    client: reqwest::Client,
    store: Arc<dyn PushNotificationConfigStore>,
}

impl std::fmt::Debug for HttpPushNotificationSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPushNotificationSender").finish_non_exhaustive()
    }
}

impl HttpPushNotificationSender {
    /// Creates a sender with the default configuration.
    pub fn new(store: Arc<dyn PushNotificationConfigStore>) -> Self {
        Self::with_config(store, HttpPushSenderConfig::default())
    }

    /// Creates a sender with a custom configuration.
    pub fn with_config(
        store: Arc<dyn PushNotificationConfigStore>,
        config: HttpPushSenderConfig,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build push HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self::with_client(store, client)
    }

    /// Creates a sender around an existing HTTP client.
    pub fn with_client(
        store: Arc<dyn PushNotificationConfigStore>,
        client: reqwest::Client,
    ) -> Self {
        Self { client, store }
    }

    async fn dispatch(&self, task: &Task, config: &PushNotificationConfig) -> bool {
        let mut req = self.client.post(&config.url).json(task);

        if let Some(token) = &config.token {
            req = req.header(NOTIFICATION_TOKEN_HEADER, token);
        }
        if let Some(auth) = &config.authentication
            && let Some(credentials) = &auth.credentials
        {
            let scheme = auth.schemes.iter().find_map(|s| match s.to_lowercase().as_str() {
                "bearer" => Some("Bearer"),
                "basic" => Some("Basic"),
                _ => None,
            });
            if let Some(scheme) = scheme {
                req = req.header(reqwest::header::AUTHORIZATION, format!("{scheme} {credentials}"));
            }
        }

        match req.send().await.and_then(reqwest::Response::error_for_status) {
            Ok(_) => {
                debug!(task_id = %task.id, url = %config.url, "Push notification sent");
                true
            }
            Err(e) => {
                error!(
                    task_id = %task.id,
                    url = %config.url,
                    error = %e,
                    "Error sending push notification"
                );
                false
            }
        }
    }
}

#[async_trait]
impl PushNotificationSender for HttpPushNotificationSender {
    async fn send_notification(&self, task: &Task) {
        let configs = match self.store.get_info(&task.id).await {
            Ok(configs) => configs,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Failed to load push notification configs");
                return;
            }
        };
        if configs.is_empty() {
            return;
        }

        let results = join_all(configs.iter().map(|c| self.dispatch(task, c))).await;
        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            warn!(
                task_id = %task.id,
                failed,
                total = results.len(),
                "Some push notifications failed to send"
            );
        }
    }
}
