//! Example: drive the request handler in-process with an echo agent.
//!
//! Sends a blocking message, a streaming message and a non-blocking message
//! that is cancelled while the agent is still working.

use std::sync::Arc;
use std::time::Duration;

use a2a_core::error::Result;
use a2a_core::server::{
    AgentExecutor, DefaultRequestHandler, EventQueue, InMemoryTaskStore, RequestContext,
    RequestHandler, TaskUpdater,
};
use a2a_core::types::{Message, MessageSendConfiguration, MessageSendParams, Part, TaskIdParams};
use futures::StreamExt;

/// Echoes the user's text back as an artifact, slowly for "slow" requests.
struct EchoAgent;

#[async_trait::async_trait]
impl AgentExecutor for EchoAgent {
    async fn execute(&self, ctx: &RequestContext, queue: &EventQueue) -> Result<()> {
        let input = ctx.user_input();
        let updater = TaskUpdater::new(queue, &ctx.task_id, &ctx.context_id);
        updater.start_work(None).await?;

        if input.contains("slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }

        updater
            .add_artifact(
                vec![Part::text(format!("echo: {input}"))],
                None,
                Some("echo".into()),
                None,
                None,
                Some(true),
            )
            .await?;
        let reply = updater.new_agent_message(vec![Part::text("done")], None);
        updater.complete(Some(reply)).await
    }

    async fn cancel(&self, ctx: &RequestContext, queue: &EventQueue) -> Result<()> {
        TaskUpdater::new(queue, &ctx.task_id, &ctx.context_id)
            .cancel(None)
            .await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("a2a_core=info")
        .init();

    let handler = DefaultRequestHandler::new(EchoAgent, Arc::new(InMemoryTaskStore::new()));

    let response = handler
        .on_message_send(MessageSendParams::new(Message::user_text("hello")), None)
        .await?;
    if let Some(task) = response.as_task() {
        println!("blocking: task {} is {:?}", task.id, task.state());
    }

    let mut events = handler
        .on_message_send_stream(MessageSendParams::new(Message::user_text("stream me")), None)
        .await?;
    while let Some(event) = events.next().await {
        let event = event?;
        println!("streaming: {}", serde_json::to_string(&event)?);
    }

    let params = MessageSendParams::new(Message::user_text("slow please"))
        .with_configuration(MessageSendConfiguration::default().with_blocking(false));
    let response = handler.on_message_send(params, None).await?;
    if let Some(task) = response.as_task() {
        let canceled = handler
            .on_cancel_task(TaskIdParams::new(&task.id), None)
            .await?;
        println!("cancel: task {} is {:?}", canceled.id, canceled.state());
    }

    handler.wait_for_background_tasks().await;
    Ok(())
}
