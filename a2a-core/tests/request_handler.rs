//! End-to-end behavior of `DefaultRequestHandler` driven by scripted agents.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use a2a_core::error::{A2AError, Result};
use a2a_core::server::{
    AgentExecutor, DefaultRequestHandler, Event, EventQueue, HandlerConfig,
    InMemoryPushNotificationConfigStore, InMemoryTaskStore, RequestContext, RequestHandler,
    SendMessageResponse, TaskStore, TaskUpdater,
};
use a2a_core::types::{
    DeleteTaskPushNotificationConfigParams, GetTaskPushNotificationConfigParams,
    ListTaskPushNotificationConfigParams, Message, MessageSendConfiguration, MessageSendParams,
    Part, PushNotificationConfig, Task, TaskIdParams, TaskPushNotificationConfig, TaskState,
    TaskStatus,
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;

#[derive(Clone, Copy)]
enum Script {
    /// working, then completed.
    Complete,
    /// working, artifact chunks, completed.
    Artifacts,
    /// working, wait for the gate, completed.
    Gated,
    /// auth-required, wait for the gate, completed.
    AuthGated,
    /// working, then wait forever.
    Hang,
    /// A direct reply followed by a task that must be ignored.
    Reply,
    /// working, then an error.
    Fail,
    /// A completed task under a foreign id.
    WrongTask,
    /// working, then artifacts until aborted.
    Flood,
}

/// What the agent publishes when asked to cancel.
#[derive(Clone, Copy)]
enum CancelReply {
    Canceled,
    Completed,
    Message,
}

struct ScriptedAgent {
    script: Script,
    cancel_reply: CancelReply,
    executions: Arc<AtomicUsize>,
    gate: Arc<Notify>,
}

impl ScriptedAgent {
    fn new(script: Script, cancel_reply: CancelReply) -> Self {
        Self {
            script,
            cancel_reply,
            executions: Arc::new(AtomicUsize::new(0)),
            gate: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl AgentExecutor for ScriptedAgent {
    async fn execute(&self, ctx: &RequestContext, queue: &EventQueue) -> Result<()> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let updater = TaskUpdater::new(queue, &ctx.task_id, &ctx.context_id);
        match self.script {
            Script::Complete => {
                updater.start_work(None).await?;
                updater
                    .complete(Some(updater.new_agent_message(vec![Part::text("done")], None)))
                    .await
            }
            Script::Artifacts => {
                updater.start_work(None).await?;
                let id = Some("a1".to_string());
                updater
                    .add_artifact(
                        vec![Part::text("one"), Part::text("two")],
                        id.clone(),
                        None,
                        None,
                        Some(false),
                        None,
                    )
                    .await?;
                updater
                    .add_artifact(vec![Part::text("three")], id, None, None, Some(true), Some(true))
                    .await?;
                updater.complete(None).await
            }
            Script::Gated => {
                updater.start_work(None).await?;
                self.gate.notified().await;
                updater.complete(None).await
            }
            Script::AuthGated => {
                let login = updater.new_agent_message(vec![Part::text("login")], None);
                updater.requires_auth(Some(login), false).await?;
                self.gate.notified().await;
                updater.complete(None).await
            }
            Script::Hang => {
                updater.start_work(None).await?;
                std::future::pending::<()>().await;
                Ok(())
            }
            Script::Reply => {
                queue
                    .enqueue(updater.new_agent_message(vec![Part::text("hi there")], None).into())
                    .await;
                queue
                    .enqueue(Task::new(&ctx.task_id, &ctx.context_id).into())
                    .await;
                Ok(())
            }
            Script::Fail => {
                updater.start_work(None).await?;
                Err(A2AError::Other("boom".into()))
            }
            Script::WrongTask => {
                let task = Task::new("someone-else", &ctx.context_id)
                    .with_status(TaskStatus::new(TaskState::Completed));
                queue.enqueue(task.into()).await;
                Ok(())
            }
            Script::Flood => {
                updater.start_work(None).await?;
                loop {
                    updater
                        .add_artifact(vec![Part::text("tick")], None, None, None, None, None)
                        .await?;
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    async fn cancel(&self, ctx: &RequestContext, queue: &EventQueue) -> Result<()> {
        let updater = TaskUpdater::new(queue, &ctx.task_id, &ctx.context_id);
        match self.cancel_reply {
            CancelReply::Canceled => updater.cancel(None).await,
            CancelReply::Completed => updater.complete(None).await,
            CancelReply::Message => {
                let reply = updater.new_agent_message(vec![Part::text("cannot stop")], None);
                queue.enqueue(reply.into()).await;
                Ok(())
            }
        }
    }
}

struct Harness {
    handler: Arc<DefaultRequestHandler<ScriptedAgent>>,
    store: Arc<InMemoryTaskStore>,
    executions: Arc<AtomicUsize>,
    gate: Arc<Notify>,
}

fn harness(script: Script) -> Harness {
    harness_with_cancel(script, CancelReply::Canceled)
}

fn harness_with_cancel(script: Script, cancel_reply: CancelReply) -> Harness {
    init_tracing();
    let agent = ScriptedAgent::new(script, cancel_reply);
    let executions = Arc::clone(&agent.executions);
    let gate = Arc::clone(&agent.gate);
    let store = Arc::new(InMemoryTaskStore::new());
    let config = HandlerConfig {
        poll_interval: Duration::from_millis(20),
        ..HandlerConfig::default()
    };
    let handler = DefaultRequestHandler::new(agent, Arc::clone(&store) as Arc<dyn TaskStore>)
        .with_push_config_store(Arc::new(InMemoryPushNotificationConfigStore::new()))
        .with_config(config);
    Harness {
        handler: Arc::new(handler),
        store,
        executions,
        gate,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("a2a_core=debug")
        .try_init();
}

fn send(text: &str) -> MessageSendParams {
    MessageSendParams::new(Message::user_text(text))
}

fn send_to(task_id: &str, text: &str) -> MessageSendParams {
    MessageSendParams::new(Message::user_text(text).with_task_id(task_id))
}

fn non_blocking(params: MessageSendParams) -> MessageSendParams {
    params.with_configuration(MessageSendConfiguration::default().with_blocking(false))
}

async fn wait_until_running(handler: &DefaultRequestHandler<ScriptedAgent>, task_id: &str) {
    for _ in 0..200 {
        if handler.is_running(task_id).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("execution for {task_id} never started");
}

fn task_of(response: SendMessageResponse) -> Task {
    match response {
        SendMessageResponse::Task(task) => task,
        SendMessageResponse::Message(m) => panic!("expected a task, got message {m:?}"),
    }
}

#[tokio::test]
async fn test_blocking_send_returns_completed_task() {
    let h = harness(Script::Complete);
    let task = task_of(h.handler.on_message_send(send("hello"), None).await.unwrap());

    assert_eq!(task.state(), TaskState::Completed);
    let stored = h.store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(stored, task);
    assert_eq!(h.executions.load(Ordering::SeqCst), 1);
    assert_eq!(h.handler.running_count().await, 0);
}

#[tokio::test]
async fn test_terminal_task_is_rejected_without_executing() {
    let h = harness(Script::Complete);
    let done = Task::new("done-task", "c1").with_status(TaskStatus::new(TaskState::Completed));
    h.store.save(&done).await.unwrap();

    let err = h
        .handler
        .on_message_send(send_to("done-task", "again"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, A2AError::InvalidParams(_)), "{err}");

    let err = h
        .handler
        .on_message_send_stream(send_to("done-task", "again"), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, A2AError::InvalidParams(_)), "{err}");
    assert_eq!(h.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_client_chosen_task_id_is_adopted() {
    let h = harness(Script::Complete);
    let task = task_of(
        h.handler
            .on_message_send(send_to("my-task", "hello"), None)
            .await
            .unwrap(),
    );
    assert_eq!(task.id, "my-task");
}

#[tokio::test]
async fn test_single_flight_per_task() {
    let h = harness(Script::Gated);
    let first = {
        let handler = Arc::clone(&h.handler);
        tokio::spawn(async move { handler.on_message_send(send_to("t-1", "first"), None).await })
    };
    wait_until_running(&h.handler, "t-1").await;

    let err = h
        .handler
        .on_message_send(send_to("t-1", "second"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, A2AError::InvalidParams(_)), "{err}");
    assert_eq!(h.executions.load(Ordering::SeqCst), 1);
    assert_eq!(h.handler.running_count().await, 1);

    h.gate.notify_one();
    let task = task_of(first.await.unwrap().unwrap());
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(h.handler.running_count().await, 0);
}

#[tokio::test]
async fn test_non_blocking_send_returns_early_and_finishes_in_background() {
    let h = harness(Script::Gated);
    let task = task_of(
        h.handler
            .on_message_send(non_blocking(send("hello")), None)
            .await
            .unwrap(),
    );
    assert_eq!(task.state(), TaskState::Working);

    h.gate.notify_one();
    h.handler.wait_for_background_tasks().await;

    let stored = h.store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.state(), TaskState::Completed);
    assert_eq!(h.handler.running_count().await, 0);
}

#[tokio::test]
async fn test_auth_required_interrupts_blocking_send() {
    let h = harness(Script::AuthGated);
    let task = task_of(h.handler.on_message_send(send("hello"), None).await.unwrap());
    assert_eq!(task.state(), TaskState::AuthRequired);

    h.gate.notify_one();
    h.handler.wait_for_background_tasks().await;

    let stored = h.store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.state(), TaskState::Completed);
    let texts: Vec<_> = stored.history.iter().map(Message::text_content).collect();
    assert_eq!(texts, ["hello", "login"]);
}

#[tokio::test]
async fn test_message_reply_short_circuits() {
    let h = harness(Script::Reply);
    let response = h.handler.on_message_send(send("hello"), None).await.unwrap();

    let SendMessageResponse::Message(reply) = response else {
        panic!("expected a message");
    };
    assert_eq!(reply.text_content(), "hi there");
    let task_id = reply.task_id.unwrap();
    h.handler.wait_for_background_tasks().await;
    assert!(h.store.get(&task_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_streaming_merges_artifact_chunks() {
    let h = harness(Script::Artifacts);
    let events: Vec<Event> = h
        .handler
        .on_message_send_stream(send("build"), None)
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await;

    assert_eq!(events.len(), 4);
    assert!(events[3].is_final());
    let task_id = events[0].task_id().unwrap().to_string();

    h.handler.wait_for_background_tasks().await;
    let stored = h.store.get(&task_id).await.unwrap().unwrap();
    assert_eq!(stored.state(), TaskState::Completed);
    assert_eq!(stored.artifacts.len(), 1);
    let texts: Vec<_> = stored.artifacts[0]
        .parts
        .iter()
        .filter_map(Part::as_text)
        .collect();
    assert_eq!(texts, ["one", "two", "three"]);
    assert_eq!(h.handler.running_count().await, 0);
}

#[tokio::test]
async fn test_dropped_stream_keeps_folding_in_background() {
    let h = harness(Script::Gated);
    let mut stream = h
        .handler
        .on_message_send_stream(send("hello"), None)
        .await
        .unwrap();
    let first = stream.next().await.unwrap().unwrap();
    let task_id = first.task_id().unwrap().to_string();
    drop(stream);

    h.gate.notify_one();
    h.handler.wait_for_background_tasks().await;

    let stored = h.store.get(&task_id).await.unwrap().unwrap();
    assert_eq!(stored.state(), TaskState::Completed);
}

#[tokio::test]
async fn test_agent_failure_surfaces_and_keeps_progress() {
    let h = harness(Script::Fail);
    let err = h
        .handler
        .on_message_send(send_to("failing", "hello"), None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "boom");

    let stored = h.store.get("failing").await.unwrap().unwrap();
    assert_eq!(stored.state(), TaskState::Working);
    assert_eq!(h.handler.running_count().await, 0);
}

#[tokio::test]
async fn test_foreign_task_id_is_an_internal_error() {
    let h = harness(Script::WrongTask);
    let err = h.handler.on_message_send(send("hello"), None).await.unwrap_err();
    assert!(matches!(err, A2AError::InternalError(_)), "{err}");

    let mut stream = h
        .handler
        .on_message_send_stream(send("hello"), None)
        .await
        .unwrap();
    let item = stream.next().await.unwrap();
    assert!(matches!(item, Err(A2AError::InternalError(_))));
    assert!(stream.next().await.is_none());

    h.handler.wait_for_background_tasks().await;
    assert!(h.store.get("someone-else").await.unwrap().is_none());
    assert_eq!(h.handler.running_count().await, 0);
}

#[tokio::test]
async fn test_cancel_running_task() {
    let h = harness(Script::Hang);
    let task = task_of(
        h.handler
            .on_message_send(non_blocking(send("hello")), None)
            .await
            .unwrap(),
    );
    assert_eq!(task.state(), TaskState::Working);

    let canceled = h
        .handler
        .on_cancel_task(TaskIdParams::new(&task.id), None)
        .await
        .unwrap();
    assert_eq!(canceled.state(), TaskState::Canceled);

    h.handler.wait_for_background_tasks().await;
    assert_eq!(h.handler.running_count().await, 0);
    let stored = h.store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.state(), TaskState::Canceled);

    let err = h
        .handler
        .on_cancel_task(TaskIdParams::new(&task.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, A2AError::TaskNotCancelable(_)));
    let err = h
        .handler
        .on_cancel_task(TaskIdParams::new("missing"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, A2AError::TaskNotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_wins_over_events_still_in_flight() {
    let h = harness(Script::Flood);
    for i in 0..20 {
        let task_id = format!("flood-{i}");
        task_of(
            h.handler
                .on_message_send(non_blocking(send_to(&task_id, "go")), None)
                .await
                .unwrap(),
        );
        tokio::time::sleep(Duration::from_millis(5)).await;

        let canceled = h
            .handler
            .on_cancel_task(TaskIdParams::new(&task_id), None)
            .await
            .unwrap();
        assert_eq!(canceled.state(), TaskState::Canceled);

        h.handler.wait_for_background_tasks().await;
        let stored = h.store.get(&task_id).await.unwrap().unwrap();
        assert_eq!(stored.state(), TaskState::Canceled, "{task_id}");

        let err = h
            .handler
            .on_message_send(send_to(&task_id, "again"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, A2AError::InvalidParams(_)), "{err}");
    }
    assert_eq!(h.handler.running_count().await, 0);
}

#[tokio::test]
async fn test_cancel_answered_with_message_is_an_internal_error() {
    let h = harness_with_cancel(Script::Complete, CancelReply::Message);
    let idle = Task::new("idle", "c1").with_status(TaskStatus::new(TaskState::Working));
    h.store.save(&idle).await.unwrap();

    let err = h
        .handler
        .on_cancel_task(TaskIdParams::new("idle"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, A2AError::InternalError(_)), "{err}");
    assert_eq!(h.store.get("idle").await.unwrap().unwrap().state(), TaskState::Working);
}

#[tokio::test]
async fn test_cancel_ending_in_another_state_is_not_cancelable() {
    let h = harness_with_cancel(Script::Complete, CancelReply::Completed);
    let idle = Task::new("idle", "c1").with_status(TaskStatus::new(TaskState::Working));
    h.store.save(&idle).await.unwrap();

    let err = h
        .handler
        .on_cancel_task(TaskIdParams::new("idle"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, A2AError::TaskNotCancelable(_)), "{err}");
    assert_eq!(h.store.get("idle").await.unwrap().unwrap().state(), TaskState::Completed);
}

#[tokio::test]
async fn test_resubscribe_follows_running_task() {
    let h = harness(Script::Gated);
    let task = task_of(
        h.handler
            .on_message_send(non_blocking(send("hello")), None)
            .await
            .unwrap(),
    );

    let stream = h
        .handler
        .on_resubscribe_to_task(TaskIdParams::new(&task.id), None)
        .await
        .unwrap();
    h.gate.notify_one();

    let events: Vec<Event> = stream.map(|e| e.unwrap()).collect().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state(), Some(TaskState::Completed));

    h.handler.wait_for_background_tasks().await;
    let err = h
        .handler
        .on_resubscribe_to_task(TaskIdParams::new(&task.id), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, A2AError::InvalidParams(_)), "{err}");
}

#[tokio::test]
async fn test_resubscribe_requires_a_live_queue() {
    let h = harness(Script::Complete);
    let idle = Task::new("idle", "c1").with_status(TaskStatus::new(TaskState::Working));
    h.store.save(&idle).await.unwrap();

    for id in ["idle", "missing"] {
        let err = h
            .handler
            .on_resubscribe_to_task(TaskIdParams::new(id), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, A2AError::TaskNotFound(_)), "{id}: {err}");
    }
    assert_eq!(h.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_push_config_crud() {
    let h = harness(Script::Complete);
    h.store.save(&Task::new("t1", "c1")).await.unwrap();

    let config = PushNotificationConfig::new("https://hooks.test/a2a")
        .with_id("cfg-1")
        .with_token("secret");
    let set = h
        .handler
        .on_set_task_push_notification_config(
            TaskPushNotificationConfig::new("t1", config.clone()),
            None,
        )
        .await
        .unwrap();
    assert_eq!(set.push_notification_config, config);

    let got = h
        .handler
        .on_get_task_push_notification_config(
            GetTaskPushNotificationConfigParams::new("t1").with_config_id("cfg-1"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(got.push_notification_config, config);

    let listed = h
        .handler
        .on_list_task_push_notification_config(
            ListTaskPushNotificationConfigParams::new("t1"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    h.handler
        .on_delete_task_push_notification_config(
            DeleteTaskPushNotificationConfigParams::new("t1", "cfg-1"),
            None,
        )
        .await
        .unwrap();
    let err = h
        .handler
        .on_get_task_push_notification_config(GetTaskPushNotificationConfigParams::new("t1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, A2AError::InternalError(_)), "{err}");

    let err = h
        .handler
        .on_list_task_push_notification_config(
            ListTaskPushNotificationConfigParams::new("missing"),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, A2AError::TaskNotFound(_)));
}
