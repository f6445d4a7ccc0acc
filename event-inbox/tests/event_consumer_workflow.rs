use event_inbox::config::ConsumerConfig;
use event_inbox::envelope::EventEnvelope;
use event_inbox::error::{HandlerError, ProcessingError};
use event_inbox::eventing::{
    DeliveryTracker, EventConsumer, EventDeduplicator, EventSource, InMemoryEventSource,
    IncomingEventHandler, IncomingEventProcessor, ProcessOutcome, RetryPolicy,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct SpyHandler {
    handled: AtomicUsize,
}

#[async_trait::async_trait]
impl IncomingEventHandler for SpyHandler {
    fn event_type(&self) -> &str {
        "task.created"
    }
    fn source_service(&self) -> &str {
        "task-service"
    }
    async fn handle(&self, envelope: &EventEnvelope<Value>) -> Result<(), HandlerError> {
        if envelope.data().and_then(|d| d.get("reject")).is_some() {
            return Err(HandlerError::fatal(anyhow::anyhow!("rejected by handler")));
        }
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct SpyTracker {
    acknowledged: Mutex<Vec<(Uuid, ProcessOutcome)>>,
    rejected: Mutex<Vec<(Uuid, bool)>>,
}

impl SpyTracker {
    fn total(&self) -> usize {
        self.acknowledged.lock().unwrap().len() + self.rejected.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl DeliveryTracker<Value> for SpyTracker {
    async fn acknowledge(&self, envelope: &EventEnvelope<Value>, outcome: ProcessOutcome) {
        self.acknowledged
            .lock()
            .unwrap()
            .push((envelope.event_id(), outcome));
    }
    async fn reject(&self, envelope: &EventEnvelope<Value>, error: &ProcessingError) {
        self.rejected
            .lock()
            .unwrap()
            .push((envelope.event_id(), error.is_retryable()));
    }
}

async fn wait_for(tracker: &SpyTracker, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while tracker.total() < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

fn task_created(data: Value) -> EventEnvelope<Value> {
    EventEnvelope::builder()
        .event_type("task.created")
        .source_service("task-service")
        .data(data)
        .build()
}

#[tokio::test]
async fn consumer_processes_source_events_and_reports_outcomes() {
    let source = InMemoryEventSource::<Value>::new(64);
    let handler = Arc::new(SpyHandler::default());
    let tracker = Arc::new(SpyTracker::default());

    let processor = IncomingEventProcessor::builder()
        .event_handlers(vec![handler.clone() as Arc<dyn IncomingEventHandler>])
        .unwrap()
        .deduplicator(Arc::new(EventDeduplicator::default()))
        .retry_policy(RetryPolicy::no_retry())
        .build();

    let consumer = Arc::new(
        EventConsumer::builder()
            .source(Arc::new(source.clone()) as Arc<dyn EventSource<Value>>)
            .processor(Arc::new(processor))
            .tracker(tracker.clone() as Arc<dyn DeliveryTracker<Value>>)
            .config(ConsumerConfig { concurrency: 4 })
            .build(),
    );
    let handle = consumer.start().await;

    let first = task_created(json!({"userId": 1, "title": "Test Task"}));
    let redelivered = first.clone();
    let rejected = task_created(json!({"userId": 2, "reject": true}));
    let unrouted = EventEnvelope::builder()
        .event_type("invalid.event")
        .source_service("task-service")
        .data(json!({}))
        .build();

    source.publish(first.clone());
    // 顺序消费以保证重复投递在首个投递完成后到达
    wait_for(&tracker, 1).await;
    source.publish(redelivered);
    source.publish(rejected.clone());
    source.publish(unrouted.clone());
    source.publish_json("{\"eventType\": 42}");
    wait_for(&tracker, 4).await;

    handle.shutdown();
    handle.join().await;

    assert_eq!(handler.handled.load(Ordering::SeqCst), 1);

    let acknowledged = tracker.acknowledged.lock().unwrap().clone();
    assert_eq!(
        acknowledged,
        vec![
            (first.event_id(), ProcessOutcome::Processed),
            (first.event_id(), ProcessOutcome::Duplicate),
        ]
    );

    let mut rejections = tracker.rejected.lock().unwrap().clone();
    rejections.sort();
    let mut expected = vec![(rejected.event_id(), false), (unrouted.event_id(), false)];
    expected.sort();
    assert_eq!(rejections, expected);
}

#[tokio::test]
async fn consumer_stops_on_shutdown() {
    let source = InMemoryEventSource::<Value>::new(8);
    let handler = Arc::new(SpyHandler::default());

    let processor = IncomingEventProcessor::builder()
        .event_handlers(vec![handler.clone() as Arc<dyn IncomingEventHandler>])
        .unwrap()
        .deduplicator(Arc::new(EventDeduplicator::default()))
        .build();

    let consumer = Arc::new(
        EventConsumer::builder()
            .source(Arc::new(source.clone()) as Arc<dyn EventSource<Value>>)
            .processor(Arc::new(processor))
            .build(),
    );
    let handle = consumer.start().await;
    assert_eq!(source.subscriber_count(), 1);

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .unwrap();

    assert_eq!(source.subscriber_count(), 0);
    assert_eq!(source.publish(task_created(json!({"userId": 1}))), 0);
    assert_eq!(handler.handled.load(Ordering::SeqCst), 0);
}
