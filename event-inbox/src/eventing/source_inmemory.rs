//! 内存版事件源（InMemoryEventSource）
//!
//! 基于 `tokio::sync::broadcast` 的轻量事件源，满足 `EventSource` 协议：
//! - `publish`：克隆并广播信封；
//! - `publish_json`：按线上格式解码后广播，解码失败以传输错误的形式送达订阅者；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 注意：无订阅者时发送将被忽略；同一信封可以重复发布以模拟重投递。

use super::consumer::EventSource;
use crate::envelope::EventEnvelope;
use crate::error::TransportError;
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

type Delivery<T> = Result<EventEnvelope<T>, TransportError>;

/// 内存事件源
pub struct InMemoryEventSource<T> {
    tx: broadcast::Sender<Delivery<T>>,
}

impl<T> Clone for InMemoryEventSource<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone> InMemoryEventSource<T> {
    /// `capacity` 为广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 广播信封，返回收到该信封的订阅者数量
    pub fn publish(&self, envelope: EventEnvelope<T>) -> usize {
        self.tx.send(Ok(envelope)).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + DeserializeOwned> InMemoryEventSource<T> {
    /// 解码线上 JSON 并广播
    pub fn publish_json(&self, raw: &str) -> usize {
        let delivery = EventEnvelope::from_json(raw).map_err(TransportError::from);
        self.tx.send(delivery).unwrap_or(0)
    }
}

#[async_trait]
impl<T> EventSource<T> for InMemoryEventSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn subscribe(&self) -> BoxStream<'static, Delivery<T>> {
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx).map(|r| match r {
            Ok(delivery) => delivery,
            Err(e) => Err(TransportError::new(e.to_string())),
        });
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn delivers_published_envelopes_and_decode_failures() {
        let source = InMemoryEventSource::<Value>::new(16);
        let unheard = EventEnvelope::builder()
            .event_type("task.created")
            .source_service("task-service")
            .build();
        assert_eq!(source.publish(unheard), 0);

        let mut stream = source.subscribe().await;
        assert_eq!(source.subscriber_count(), 1);

        let envelope = EventEnvelope::builder()
            .event_type("task.created")
            .source_service("task-service")
            .data(json!({"userId": 1}))
            .build();
        assert_eq!(source.publish(envelope.clone()), 1);
        assert_eq!(source.publish_json("{not json"), 1);

        assert_eq!(stream.next().await.unwrap().unwrap(), envelope);
        assert!(stream.next().await.unwrap().is_err());
    }
}
