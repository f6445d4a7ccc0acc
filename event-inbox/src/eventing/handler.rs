//! 事件处理器（IncomingEventHandler）
//!
//! 定义消费某一路由 `(event_type, source_service)` 的业务处理逻辑与路由元信息。
//! 处理器需在任何应触发重试/重投递的失败上返回错误，且在同一事件被重试时保持幂等。
//!
use crate::envelope::{EventEnvelope, EventRoute};
use crate::error::HandlerError;
use async_trait::async_trait;
use serde_json::Value;

/// 事件处理器：处理某一来源服务的某一类型事件
#[async_trait]
pub trait IncomingEventHandler<T = Value>: Send + Sync {
    /// 处理的事件类型，例如 `task.created`
    fn event_type(&self) -> &str;
    /// 事件来源服务，例如 `task-service`
    fn source_service(&self) -> &str;
    /// 执行业务副作用
    async fn handle(&self, envelope: &EventEnvelope<T>) -> Result<(), HandlerError>;

    fn route(&self) -> EventRoute {
        EventRoute::new(self.event_type(), self.source_service())
    }
}
