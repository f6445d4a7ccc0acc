//! 事件信封（Event Envelope）与路由键
//!
//! 定义跨服务事件在管线各阶段间传递的不可变数据契约（`EventEnvelope`），
//! 以及由 `(event_type, source_service)` 组成的处理器路由键（`EventRoute`）。

mod event_envelope;
mod route;

pub use event_envelope::{DEFAULT_VERSION, EventEnvelope};
pub use route::EventRoute;
