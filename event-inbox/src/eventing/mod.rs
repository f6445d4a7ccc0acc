//! 事件子系统（eventing）
//!
//! 收件事件从传输层到业务处理器的完整管线：
//! - `IncomingEventHandler`：按 `(event_type, source_service)` 路由的业务处理器；
//! - `EventValidator`：结构、命名、时效与版本校验；
//! - `EventDeduplicator`：按事件 ID 的至多一次执行守卫与过期淘汰；
//! - `RetryPolicy` / `with_retry`：去重边界内的有界退避重试；
//! - `HandlerRegistry`：启动期构建的不可变路由表；
//! - `IncomingEventProcessor`：编排校验、路由、去重与重试；
//! - `EventConsumer`（feature `consumer`）：订阅事件源并发消费，向传输层回执结果。
//!
pub mod deduplication;
pub mod handler;
pub mod processor;
pub mod registry;
pub mod retry;
pub mod validation;

#[cfg(feature = "consumer")]
pub mod consumer;
#[cfg(feature = "consumer")]
pub mod source_inmemory;

pub use deduplication::{
    DEFAULT_RETENTION, DeduplicationConfig, EventDeduplicator, EvictionHandle,
};
pub use handler::IncomingEventHandler;
pub use processor::{IncomingEventProcessor, ProcessOutcome};
pub use registry::HandlerRegistry;
pub use retry::{Backoff, RetryPolicy, Retryable, with_retry};
pub use validation::{EventValidator, ValidationConfig};

#[cfg(feature = "consumer")]
pub use consumer::{
    ConsumerHandle, DeliveryTracker, EventConsumer, EventSource, NoopDeliveryTracker,
};
#[cfg(feature = "consumer")]
pub use source_inmemory::InMemoryEventSource;
