//! 处理器注册表（HandlerRegistry）
//!
//! 启动期一次性构建的不可变路由表：`(event_type, source_service) → handler`，
//! 重复路由在构建时即报错，分发时只做查找。
//!
use super::IncomingEventHandler;
use crate::envelope::EventRoute;
use crate::error::{ConfigError, ConfigResult};
use std::collections::HashMap;
use std::sync::Arc;

type HandlerRef<T> = Arc<dyn IncomingEventHandler<T>>;

pub struct HandlerRegistry<T> {
    // source_service → event_type → handler，便于以 &str 查找
    by_source: HashMap<String, HashMap<String, HandlerRef<T>>>,
    len: usize,
}

impl<T> Clone for HandlerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            by_source: self.by_source.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self {
            by_source: HashMap::new(),
            len: 0,
        }
    }
}

impl<T> std::fmt::Debug for HandlerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("routes", &self.routes())
            .finish()
    }
}

impl<T> HandlerRegistry<T> {
    pub fn new(handlers: impl IntoIterator<Item = HandlerRef<T>>) -> ConfigResult<Self> {
        let mut registry = Self::default();

        for handler in handlers {
            let event_type = handler.event_type().to_string();
            let source_service = handler.source_service().to_string();
            let by_type = registry.by_source.entry(source_service.clone()).or_default();

            if by_type.contains_key(&event_type) {
                return Err(ConfigError::DuplicateRoute {
                    event_type,
                    source_service,
                });
            }
            by_type.insert(event_type, handler);
            registry.len += 1;
        }

        Ok(registry)
    }

    pub fn resolve(&self, event_type: &str, source_service: &str) -> Option<&HandlerRef<T>> {
        self.by_source
            .get(source_service)
            .and_then(|by_type| by_type.get(event_type))
    }

    pub fn contains(&self, event_type: &str, source_service: &str) -> bool {
        self.resolve(event_type, source_service).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 已注册路由（有序）
    pub fn routes(&self) -> Vec<EventRoute> {
        let mut routes: Vec<EventRoute> = self
            .by_source
            .iter()
            .flat_map(|(source, by_type)| {
                by_type
                    .keys()
                    .map(move |event_type| EventRoute::new(event_type.as_str(), source.as_str()))
            })
            .collect();
        routes.sort();
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventEnvelope;
    use crate::error::HandlerError;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Noop {
        event_type: &'static str,
        source_service: &'static str,
    }

    #[async_trait]
    impl IncomingEventHandler for Noop {
        fn event_type(&self) -> &str {
            self.event_type
        }
        fn source_service(&self) -> &str {
            self.source_service
        }
        async fn handle(&self, _envelope: &EventEnvelope<Value>) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn noop(event_type: &'static str, source_service: &'static str) -> HandlerRef<Value> {
        Arc::new(Noop {
            event_type,
            source_service,
        })
    }

    #[test]
    fn resolves_by_type_and_source() {
        let registry = HandlerRegistry::new(vec![
            noop("task.created", "task-service"),
            noop("task.updated", "task-service"),
            noop("project.member.added", "project-service"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.contains("task.created", "task-service"));
        assert!(!registry.contains("task.created", "project-service"));
        assert!(registry.resolve("invalid.event", "task-service").is_none());
        assert_eq!(
            registry.routes().first(),
            Some(&EventRoute::new("project.member.added", "project-service"))
        );
    }

    #[test]
    fn same_type_from_different_sources_is_allowed() {
        let registry = HandlerRegistry::new(vec![
            noop("entity.deleted", "task-service"),
            noop("entity.deleted", "project-service"),
        ])
        .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_route_fails_fast() {
        let err = HandlerRegistry::new(vec![
            noop("task.created", "task-service"),
            noop("task.created", "task-service"),
        ])
        .unwrap_err();

        match err {
            ConfigError::DuplicateRoute {
                event_type,
                source_service,
            } => {
                assert_eq!(event_type, "task.created");
                assert_eq!(source_service, "task-service");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
