//! 跨服务收件事件管线（event-inbox）
//!
//! 接收其他服务发布的事件信封，并保证每个事件最多一次地交给唯一匹配的业务处理器：
//! - 信封（`envelope`）：事件 ID、类型、来源服务、时间戳、版本与载荷；
//! - 校验（`eventing::validation`）：命名规范、新鲜度窗口与受支持版本；
//! - 去重（`eventing::deduplication`）：按事件 ID 至多一次执行，失败不记录；
//! - 重试（`eventing::retry`）：在去重边界内以退避策略吸收瞬时失败；
//! - 路由与编排（`eventing::registry`、`eventing::processor`）；
//! - 消费（`eventing::consumer`，feature `consumer`）：订阅事件源并发处理，回执传输层。
//!
//! 本 crate 不绑定具体消息中间件，传输层通过 `EventSource` / `DeliveryTracker` 接入。
//!
//! 典型用法：
//! 1. 为每个 `(event_type, source_service)` 实现 `IncomingEventHandler`；
//! 2. 通过 `InboxConfig` 加载配置并构建 `IncomingEventProcessor`；
//! 3. 直接调用 `process_event`，或由 `EventConsumer` 连接事件源自动消费。
//!
pub mod config;
pub mod envelope;
pub mod error;
pub mod eventing;
pub mod logging;

pub use config::{ConsumerConfig, InboxConfig};
pub use envelope::{EventEnvelope, EventRoute};
pub use error::{
    ConfigError, ConfigResult, HandlerError, ProcessingError, ProcessingResult, TransportError,
    ValidationError, Violation,
};
pub use eventing::{IncomingEventHandler, IncomingEventProcessor, ProcessOutcome};
