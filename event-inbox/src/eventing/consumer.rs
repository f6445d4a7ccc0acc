//! 事件消费者（EventConsumer）
//!
//! 连接传输层与处理管线的长驻任务：
//! - 订阅 `EventSource` 的信封流；
//! - 以有界并发调用 `IncomingEventProcessor::process_event`；
//! - 将每个事件的结果交给 `DeliveryTracker`（提交位点、安排重投递或死信）；
//! - 传输层错误记录后跳过；流结束或关闭时停止，已开始的事件会处理完毕。
//!
use super::processor::{IncomingEventProcessor, ProcessOutcome};
use crate::config::ConsumerConfig;
use crate::envelope::EventEnvelope;
use crate::error::{ProcessingError, TransportError};
use async_trait::async_trait;
use bon::Builder;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 事件源：返回 'static 生命周期的信封流，便于在 tokio::spawn 中消费
#[async_trait]
pub trait EventSource<T>: Send + Sync {
    async fn subscribe(&self) -> BoxStream<'static, Result<EventEnvelope<T>, TransportError>>;
}

/// 投递结果回执：由传输层实现以确认或拒绝消息
#[async_trait]
pub trait DeliveryTracker<T>: Send + Sync {
    /// 事件已成功处理或被判定为重复
    async fn acknowledge(&self, envelope: &EventEnvelope<T>, outcome: ProcessOutcome);

    /// 事件处理失败；是否重投递可依据 `error.is_retryable()` 决定
    async fn reject(&self, envelope: &EventEnvelope<T>, error: &ProcessingError);
}

/// 不做任何回执
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDeliveryTracker;

#[async_trait]
impl<T> DeliveryTracker<T> for NoopDeliveryTracker
where
    T: Send + Sync,
{
    async fn acknowledge(&self, _envelope: &EventEnvelope<T>, _outcome: ProcessOutcome) {}

    async fn reject(&self, _envelope: &EventEnvelope<T>, _error: &ProcessingError) {}
}

/// 事件消费者
#[derive(Builder)]
pub struct EventConsumer<T> {
    source: Arc<dyn EventSource<T>>,
    processor: Arc<IncomingEventProcessor<T>>,
    tracker: Option<Arc<dyn DeliveryTracker<T>>>,
    #[builder(default)]
    config: ConsumerConfig,
}

impl<T> EventConsumer<T>
where
    T: Send + Sync + 'static,
{
    /// 订阅事件源并启动消费任务，返回可用于关闭/等待的句柄
    ///
    /// 返回时订阅已建立，此后发布到事件源的事件都会被消费。
    pub async fn start(self: Arc<Self>) -> ConsumerHandle {
        let token = CancellationToken::new();
        let stream = self.source.subscribe().await;

        info!(
            concurrency = self.config.concurrency,
            handlers = self.processor.handler_count(),
            "started incoming event consumer"
        );

        let task = tokio::spawn(Self::consume_loop(self, stream, token.clone()));

        ConsumerHandle {
            token,
            task: Some(task),
        }
    }

    async fn consume_loop(
        self: Arc<Self>,
        stream: BoxStream<'static, Result<EventEnvelope<T>, TransportError>>,
        token: CancellationToken,
    ) {
        let concurrency = self.config.concurrency.max(1);
        let this = &*self;

        stream
            .take_until(token.cancelled())
            .for_each_concurrent(Some(concurrency), move |item| async move {
                match item {
                    Ok(envelope) => this.dispatch(envelope).await,
                    Err(err) => {
                        warn!(error = %err, "skipping event that could not be received");
                    }
                }
            })
            .await;

        info!("incoming event consumer stopped");
    }

    async fn dispatch(&self, envelope: EventEnvelope<T>) {
        match self.processor.process_event(&envelope).await {
            Ok(outcome) => {
                if let Some(tracker) = &self.tracker {
                    tracker.acknowledge(&envelope, outcome).await;
                }
            }
            Err(err) => {
                debug!(event_id = %envelope.event_id(), error = %err, "rejecting event delivery");
                if let Some(tracker) = &self.tracker {
                    tracker.reject(&envelope, &err).await;
                }
            }
        }
    }
}

/// 消费者运行句柄：用于优雅关闭与等待任务结束
pub struct ConsumerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
