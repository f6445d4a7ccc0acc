//! 事件收件管线统一错误定义
//!
//! 按关注点拆分为校验（`Violation`/`ValidationError`）、处理器（`HandlerError`）、
//! 管线对外错误（`ProcessingError`）、装配/配置（`ConfigError`）与传输（`TransportError`），
//! 便于调用方按类别分支而非匹配错误文本。
//!
use thiserror::Error;
use uuid::Uuid;

/// 单条校验规则未通过的原因
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("Event ID cannot be null")]
    MissingEventId,
    #[error("Event type cannot be null or empty")]
    EmptyEventType,
    #[error("Event type must follow pattern 'domain.action' (e.g., 'task.created'), got '{event_type}'")]
    MalformedEventType { event_type: String },
    #[error("Source service cannot be null or empty")]
    EmptySourceService,
    #[error(
        "Source service must follow pattern 'name-service' (e.g., 'task-service'), got '{source_service}'"
    )]
    MalformedSourceService { source_service: String },
    #[error("Event timestamp cannot be more than {window} in the past")]
    TimestampTooOld { window: String },
    #[error("Event timestamp cannot be more than {window} in the future")]
    TimestampInFuture { window: String },
    #[error("Event version cannot be null or empty")]
    EmptyVersion,
    #[error("Unsupported event version: {version}. Supported versions: {}", .supported.join(", "))]
    UnsupportedVersion {
        version: String,
        supported: Vec<String>,
    },
    #[error("Event data cannot be null")]
    MissingData,
}

/// 一个信封上发现的全部校验失败（至少一条）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", join_reasons(.violations))]
pub struct ValidationError {
    violations: Vec<Violation>,
}

impl ValidationError {
    pub(crate) fn new(violations: Vec<Violation>) -> Self {
        debug_assert!(!violations.is_empty());
        Self { violations }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn contains(&self, violation: &Violation) -> bool {
        self.violations.contains(violation)
    }

    /// 以 `"; "` 连接的可读原因
    pub fn reason(&self) -> String {
        join_reasons(&self.violations)
    }
}

fn join_reasons(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 业务处理器失败：区分可重试（瞬时）与不可重试（致命）
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("transient handler failure: {0}")]
    Transient(#[source] anyhow::Error),
    #[error("fatal handler failure: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl HandlerError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Self::Fatal(err.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn cause(&self) -> &anyhow::Error {
        match self {
            Self::Transient(err) | Self::Fatal(err) => err,
        }
    }
}

/// 未显式分类的失败一律视为瞬时失败
impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transient(err)
    }
}

/// 管线对传输层暴露的唯一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Event validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Event validation failed: no handler registered for {event_type} from {source_service}")]
    NoRoute {
        event_type: String,
        source_service: String,
    },
    #[error("Failed to process event {event_id} ({event_type}): {source}")]
    Handler {
        event_id: Uuid,
        event_type: String,
        #[source]
        source: HandlerError,
    },
}

impl ProcessingError {
    /// 仅瞬时处理器失败值得由传输层重新投递
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handler { source, .. } => source.is_retryable(),
            Self::Validation(_) | Self::NoRoute { .. } => false,
        }
    }

    pub fn is_validation_failure(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NoRoute { .. })
    }
}

/// 装配与配置错误（启动期快速失败）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate handler registration: event_type={event_type}, source_service={source_service}")]
    DuplicateRoute {
        event_type: String,
        source_service: String,
    },
    #[error("invalid pattern for {field}: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("configuration load error: {0}")]
    Load(#[from] config::ConfigError),
}

/// 事件源（传输层）报告的错误，例如解码失败或消费滞后
#[derive(Debug, Clone, Error)]
#[error("transport error: {reason}")]
pub struct TransportError {
    reason: String,
}

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

pub type ProcessingResult<T> = Result<T, ProcessingError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_reasons_are_joined() {
        let err = ValidationError::new(vec![Violation::MissingEventId, Violation::MissingData]);
        assert_eq!(err.to_string(), "Event ID cannot be null; Event data cannot be null");

        let wrapped = ProcessingError::from(err);
        assert!(wrapped.to_string().starts_with("Event validation failed: "));
        assert!(wrapped.is_validation_failure());
        assert!(!wrapped.is_retryable());
    }

    #[test]
    fn unsupported_version_lists_supported() {
        let v = Violation::UnsupportedVersion {
            version: "99.0".into(),
            supported: vec!["1.0".into(), "1.1".into(), "2.0".into()],
        };
        assert_eq!(
            v.to_string(),
            "Unsupported event version: 99.0. Supported versions: 1.0, 1.1, 2.0"
        );
    }

    #[test]
    fn handler_error_classification() {
        let transient: HandlerError = anyhow::anyhow!("db timeout").into();
        assert!(transient.is_retryable());
        assert!(!HandlerError::fatal(anyhow::anyhow!("bad payload")).is_retryable());

        let err = ProcessingError::Handler {
            event_id: Uuid::new_v4(),
            event_type: "task.created".into(),
            source: transient,
        };
        assert!(err.is_retryable());
        assert!(!err.is_validation_failure());
    }

    #[test]
    fn no_route_reads_as_validation_failure() {
        let err = ProcessingError::NoRoute {
            event_type: "invalid.event".into(),
            source_service: "task-service".into(),
        };
        assert_eq!(
            err.to_string(),
            "Event validation failed: no handler registered for invalid.event from task-service"
        );
    }
}
