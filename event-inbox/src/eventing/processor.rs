//! 收件事件处理器（IncomingEventProcessor）
//!
//! 编排单个事件的完整管线：
//! 校验 → 路由查找 → 去重守卫内带重试地分发到唯一处理器。
//!
//! 状态：`RECEIVED → VALIDATED → {DUPLICATE | NOVEL} → DISPATCHING → {SUCCEEDED | FAILED}`。
//! 校验失败与缺少路由都视为非法输入，不重试、不记录；处理器最终失败时事件 ID 不被记录，
//! 以便传输层稍后重投递时从头再来。
//!
use super::deduplication::EventDeduplicator;
use super::registry::HandlerRegistry;
use super::retry::{RetryPolicy, with_retry};
use super::validation::EventValidator;
use super::IncomingEventHandler;
use crate::config::InboxConfig;
use crate::envelope::{EventEnvelope, EventRoute};
use crate::error::{ConfigResult, ProcessingError, ProcessingResult};
use bon::Builder;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::incoming_event_processor_builder::{IsUnset, SetRegistry, State as BuilderState};

/// 单个事件的终态（非错误）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 首次处理并成功
    Processed,
    /// 重复事件，已跳过
    Duplicate,
}

/// 收件事件处理器
#[derive(Builder)]
pub struct IncomingEventProcessor<T> {
    registry: HandlerRegistry<T>,
    deduplicator: Arc<EventDeduplicator>,
    #[builder(default)]
    validator: EventValidator,
    #[builder(default)]
    retry_policy: RetryPolicy,
}

impl<T, S: BuilderState> IncomingEventProcessorBuilder<T, S> {
    /// 由处理器列表构建路由表；重复路由立即报错
    pub fn event_handlers(
        self,
        handlers: Vec<Arc<dyn IncomingEventHandler<T>>>,
    ) -> ConfigResult<IncomingEventProcessorBuilder<T, SetRegistry<S>>>
    where
        <S as BuilderState>::Registry: IsUnset,
    {
        Ok(self.registry(HandlerRegistry::new(handlers)?))
    }
}

impl<T> IncomingEventProcessor<T>
where
    T: Send + Sync,
{
    /// 按配置装配处理器（校验规则与重试策略来自配置）
    pub fn from_config(
        config: &InboxConfig,
        handlers: Vec<Arc<dyn IncomingEventHandler<T>>>,
        deduplicator: Arc<EventDeduplicator>,
    ) -> ConfigResult<Self> {
        let processor = Self::builder()
            .event_handlers(handlers)?
            .deduplicator(deduplicator)
            .validator(config.validator()?)
            .retry_policy(config.retry_policy())
            .build();

        info!(
            handlers = processor.handler_count(),
            "initialized incoming event processor"
        );
        Ok(processor)
    }

    /// 处理一个收件事件
    #[instrument(
        name = "process_event",
        skip_all,
        fields(
            event_id = %envelope.event_id(),
            event_type = envelope.event_type(),
            source_service = envelope.source_service(),
        )
    )]
    pub async fn process_event(
        &self,
        envelope: &EventEnvelope<T>,
    ) -> ProcessingResult<ProcessOutcome> {
        debug!(version = envelope.version(), "processing incoming event");

        if let Err(err) = self.validator.validate(envelope) {
            warn!(reason = %err, "event validation failed");
            return Err(err.into());
        }

        let Some(handler) = self
            .registry
            .resolve(envelope.event_type(), envelope.source_service())
        else {
            warn!("no handler registered for event");
            return Err(ProcessingError::NoRoute {
                event_type: envelope.event_type().to_string(),
                source_service: envelope.source_service().to_string(),
            });
        };

        let executed = self
            .deduplicator
            .process_if_not_duplicate(envelope.event_id(), || {
                with_retry(&self.retry_policy, || handler.handle(envelope))
            })
            .await
            .map_err(|source| {
                error!(error = %source, retryable = source.is_retryable(), "failed to process event");
                ProcessingError::Handler {
                    event_id: envelope.event_id(),
                    event_type: envelope.event_type().to_string(),
                    source,
                }
            })?;

        if executed {
            info!("successfully processed event");
            Ok(ProcessOutcome::Processed)
        } else {
            debug!("duplicate event skipped");
            Ok(ProcessOutcome::Duplicate)
        }
    }
}

impl<T> IncomingEventProcessor<T> {
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    pub fn has_handler(&self, event_type: &str, source_service: &str) -> bool {
        self.registry.contains(event_type, source_service)
    }

    pub fn routes(&self) -> Vec<EventRoute> {
        self.registry.routes()
    }

    pub fn deduplicator(&self) -> &Arc<EventDeduplicator> {
        &self.deduplicator
    }

    pub fn validator(&self) -> &EventValidator {
        &self.validator
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}
