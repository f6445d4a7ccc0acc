use serde::{Deserialize, Serialize};
use std::fmt;

/// 处理器路由：事件类型 + 来源服务，唯一确定一个处理器
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventRoute {
    event_type: String,
    source_service: String,
}

impl EventRoute {
    pub fn new(event_type: impl Into<String>, source_service: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source_service: source_service.into(),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source_service(&self) -> &str {
        &self.source_service
    }
}

impl fmt::Display for EventRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_service, self.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_source_then_type() {
        let route = EventRoute::new("task.created", "task-service");
        assert_eq!(route.to_string(), "task-service:task.created");
        assert_eq!(route.event_type(), "task.created");
        assert_eq!(route.source_service(), "task-service");
    }
}
