//! 收件事件管线示例
//! 任务服务与项目服务发布的事件经内存事件源进入管线，按用户累计统计；
//! 演示重复投递被跳过、非法信封被拒绝，以及瞬时失败在重试后成功。
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use event_inbox::config::InboxConfig;
use event_inbox::envelope::EventEnvelope;
use event_inbox::error::{HandlerError, ProcessingError};
use event_inbox::eventing::{
    DeliveryTracker, EventConsumer, EventSource, InMemoryEventSource, IncomingEventHandler,
    IncomingEventProcessor, ProcessOutcome,
};
use event_inbox::logging::init_logging;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

const CONFIG: &str = r#"
[retry]
max_attempts = 3

[retry.backoff]
kind = "exponential"
base = "200ms"
max = "2s"
multiplier = 2.0
jitter = 0.1

[consumer]
concurrency = 4

[logging]
level = "info,event_inbox=debug"
format = "compact"
"#;

// ============================================================================
// 用户统计
// ============================================================================

#[derive(Debug, Default, Clone)]
struct UserStats {
    tasks_created: u32,
    tasks_completed: u32,
    projects_joined: u32,
}

#[derive(Default)]
struct UserStatsStore {
    users: DashMap<u64, UserStats>,
}

impl UserStatsStore {
    fn update(&self, user_id: u64, f: impl FnOnce(&mut UserStats)) {
        f(&mut *self.users.entry(user_id).or_default());
    }
}

fn payload<D: serde::de::DeserializeOwned>(
    envelope: &EventEnvelope<Value>,
) -> Result<D, HandlerError> {
    envelope
        .data_as::<D>()
        .map_err(HandlerError::fatal)?
        .ok_or_else(|| HandlerError::fatal(anyhow::anyhow!("event data is missing")))
}

// ============================================================================
// 处理器
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskCreated {
    user_id: u64,
    title: String,
}

struct TaskCreatedHandler {
    stats: Arc<UserStatsStore>,
}

#[async_trait]
impl IncomingEventHandler for TaskCreatedHandler {
    fn event_type(&self) -> &str {
        "task.created"
    }
    fn source_service(&self) -> &str {
        "task-service"
    }
    async fn handle(&self, envelope: &EventEnvelope<Value>) -> Result<(), HandlerError> {
        let task: TaskCreated = payload(envelope)?;
        info!(user_id = task.user_id, title = %task.title, "task created");
        self.stats.update(task.user_id, |s| s.tasks_created += 1);
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskUpdated {
    user_id: u64,
    status: String,
}

struct TaskUpdatedHandler {
    stats: Arc<UserStatsStore>,
    // 第一次调用模拟存储抖动
    flaked: AtomicBool,
}

#[async_trait]
impl IncomingEventHandler for TaskUpdatedHandler {
    fn event_type(&self) -> &str {
        "task.updated"
    }
    fn source_service(&self) -> &str {
        "task-service"
    }
    async fn handle(&self, envelope: &EventEnvelope<Value>) -> Result<(), HandlerError> {
        if !self.flaked.swap(true, Ordering::SeqCst) {
            return Err(HandlerError::transient(anyhow::anyhow!(
                "statistics store temporarily unavailable"
            )));
        }
        let task: TaskUpdated = payload(envelope)?;
        if task.status == "DONE" {
            self.stats.update(task.user_id, |s| s.tasks_completed += 1);
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberAdded {
    user_id: u64,
    project_id: u64,
}

struct ProjectMemberAddedHandler {
    stats: Arc<UserStatsStore>,
}

#[async_trait]
impl IncomingEventHandler for ProjectMemberAddedHandler {
    fn event_type(&self) -> &str {
        "project.member.added"
    }
    fn source_service(&self) -> &str {
        "project-service"
    }
    async fn handle(&self, envelope: &EventEnvelope<Value>) -> Result<(), HandlerError> {
        let member: MemberAdded = payload(envelope)?;
        info!(user_id = member.user_id, project_id = member.project_id, "member added");
        self.stats.update(member.user_id, |s| s.projects_joined += 1);
        Ok(())
    }
}

// ============================================================================
// 投递回执
// ============================================================================

#[derive(Default)]
struct PrintingTracker {
    settled: AtomicUsize,
}

#[async_trait]
impl DeliveryTracker<Value> for PrintingTracker {
    async fn acknowledge(&self, envelope: &EventEnvelope<Value>, outcome: ProcessOutcome) {
        println!("ack    {} {:?}", envelope.route(), outcome);
        self.settled.fetch_add(1, Ordering::SeqCst);
    }

    async fn reject(&self, envelope: &EventEnvelope<Value>, error: &ProcessingError) {
        let action = if error.is_retryable() {
            "redeliver"
        } else {
            "dead-letter"
        };
        println!("reject {} ({action}): {error}", envelope.route());
        self.settled.fetch_add(1, Ordering::SeqCst);
    }
}

fn sample_events() -> Vec<EventEnvelope<Value>> {
    let created = EventEnvelope::builder()
        .event_type("task.created")
        .source_service("task-service")
        .data(json!({"userId": 1, "title": "Write release notes"}))
        .build();

    vec![
        created.clone(),
        // 重复投递
        created,
        EventEnvelope::builder()
            .event_type("task.updated")
            .source_service("task-service")
            .version("1.1")
            .data(json!({"userId": 1, "status": "DONE"}))
            .build(),
        EventEnvelope::builder()
            .event_type("project.member.added")
            .source_service("project-service")
            .version("2.0")
            .data(json!({"userId": 2, "projectId": 10}))
            .build(),
        // 过期且版本不受支持
        EventEnvelope::builder()
            .event_type("task.created")
            .source_service("task-service")
            .timestamp(Utc::now() - TimeDelta::days(2))
            .version("99.0")
            .data(json!({"userId": 3, "title": "stale"}))
            .build(),
    ]
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = InboxConfig::from_toml(CONFIG)?;
    init_logging(&config.logging)?;

    let stats = Arc::new(UserStatsStore::default());
    let handlers: Vec<Arc<dyn IncomingEventHandler>> = vec![
        Arc::new(TaskCreatedHandler {
            stats: stats.clone(),
        }),
        Arc::new(TaskUpdatedHandler {
            stats: stats.clone(),
            flaked: AtomicBool::new(false),
        }),
        Arc::new(ProjectMemberAddedHandler {
            stats: stats.clone(),
        }),
    ];

    let deduplicator = config.deduplicator();
    let eviction = deduplicator.spawn_eviction();
    let processor = IncomingEventProcessor::from_config(&config, handlers, deduplicator.clone())?;
    for route in processor.routes() {
        println!("route  {route}");
    }

    let source = InMemoryEventSource::new(64);
    let tracker = Arc::new(PrintingTracker::default());
    let consumer = Arc::new(
        EventConsumer::builder()
            .source(Arc::new(source.clone()) as Arc<dyn EventSource<Value>>)
            .processor(Arc::new(processor))
            .tracker(tracker.clone() as Arc<dyn DeliveryTracker<Value>>)
            .config(config.consumer)
            .build(),
    );
    let handle = consumer.start().await;

    let events = sample_events();
    let expected = events.len();
    for envelope in events {
        source.publish(envelope);
        // 逐条等待回执，保证重复投递在首次处理完成之后到达
        let settled = tracker.settled.load(Ordering::SeqCst);
        while tracker.settled.load(Ordering::SeqCst) == settled {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
    debug_assert_eq!(tracker.settled.load(Ordering::SeqCst), expected);

    handle.shutdown();
    handle.join().await;
    deduplicator.shutdown();
    eviction.join().await;

    println!("processed events: {}", deduplicator.size());
    let mut users: Vec<_> = stats
        .users
        .iter()
        .map(|entry| (*entry.key(), entry.value().clone()))
        .collect();
    users.sort_by_key(|(user_id, _)| *user_id);
    for (user_id, s) in users {
        println!(
            "user {user_id}: created={}, completed={}, projects={}",
            s.tasks_created, s.tasks_completed, s.projects_joined
        );
    }

    Ok(())
}
