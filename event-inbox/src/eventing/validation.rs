//! 事件校验（EventValidator）
//!
//! 对信封做纯结构/业务规则检查，无副作用：
//! - `event_id` 非空；`event_type`、`source_service` 符合命名规范；
//! - 时间戳位于新鲜度窗口内（默认不早于 24 小时前、不晚于 5 分钟后）；
//! - 版本属于受支持列表（升序，最后一个为最新版本）；
//! - 载荷非空。
//!
//! 所有规则都会被求值，失败原因汇总在一个 `ValidationError` 中。
//!
use crate::envelope::EventEnvelope;
use crate::error::{ConfigError, ConfigResult, ValidationError, Violation};
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_EVENT_TYPE_PATTERN: &str = r"^[a-z]+(\.[a-z]+)+$";
pub const DEFAULT_SOURCE_SERVICE_PATTERN: &str = r"^[a-z]+-service$";
pub const DEFAULT_SUPPORTED_VERSIONS: [&str; 3] = ["1.0", "1.1", "2.0"];

static EVENT_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(DEFAULT_EVENT_TYPE_PATTERN).expect("default event type pattern compiles")
});
static SOURCE_SERVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(DEFAULT_SOURCE_SERVICE_PATTERN).expect("default source service pattern compiles")
});

/// 校验规则配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// 时间戳允许落后当前时间的最大跨度
    #[serde(with = "humantime_serde")]
    pub max_past: Duration,
    /// 时间戳允许超前当前时间的最大跨度（容忍时钟漂移）
    #[serde(with = "humantime_serde")]
    pub max_future: Duration,
    /// 受支持的版本，按升序排列，最后一个为最新版本
    pub supported_versions: Vec<String>,
    pub event_type_pattern: String,
    pub source_service_pattern: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_past: Duration::from_secs(24 * 60 * 60),
            max_future: Duration::from_secs(5 * 60),
            supported_versions: DEFAULT_SUPPORTED_VERSIONS.map(String::from).to_vec(),
            event_type_pattern: DEFAULT_EVENT_TYPE_PATTERN.to_string(),
            source_service_pattern: DEFAULT_SOURCE_SERVICE_PATTERN.to_string(),
        }
    }
}

/// 信封校验器
#[derive(Debug, Clone)]
pub struct EventValidator {
    event_type_pattern: Regex,
    source_service_pattern: Regex,
    max_past: TimeDelta,
    max_future: TimeDelta,
    max_past_label: String,
    max_future_label: String,
    supported_versions: Vec<String>,
}

impl Default for EventValidator {
    fn default() -> Self {
        let config = ValidationConfig::default();

        Self {
            event_type_pattern: EVENT_TYPE_RE.clone(),
            source_service_pattern: SOURCE_SERVICE_RE.clone(),
            max_past: TimeDelta::hours(24),
            max_future: TimeDelta::minutes(5),
            max_past_label: describe_window(config.max_past),
            max_future_label: describe_window(config.max_future),
            supported_versions: config.supported_versions,
        }
    }
}

impl EventValidator {
    pub fn new(config: &ValidationConfig) -> ConfigResult<Self> {
        let event_type_pattern =
            Regex::new(&config.event_type_pattern).map_err(|source| ConfigError::InvalidPattern {
                field: "validation.event_type_pattern",
                source,
            })?;
        let source_service_pattern = Regex::new(&config.source_service_pattern).map_err(
            |source| ConfigError::InvalidPattern {
                field: "validation.source_service_pattern",
                source,
            },
        )?;

        if config.supported_versions.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "validation.supported_versions",
                reason: "at least one version must be supported".to_string(),
            });
        }
        if config.supported_versions.iter().any(|v| v.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "validation.supported_versions",
                reason: "versions cannot be empty".to_string(),
            });
        }

        let max_past = to_time_delta("validation.max_past", config.max_past)?;
        let max_future = to_time_delta("validation.max_future", config.max_future)?;
        let now = Utc::now();
        if now.checked_sub_signed(max_past).is_none() {
            return Err(window_out_of_range("validation.max_past"));
        }
        if now.checked_add_signed(max_future).is_none() {
            return Err(window_out_of_range("validation.max_future"));
        }

        Ok(Self {
            event_type_pattern,
            source_service_pattern,
            max_past,
            max_future,
            max_past_label: describe_window(config.max_past),
            max_future_label: describe_window(config.max_future),
            supported_versions: config.supported_versions.clone(),
        })
    }

    /// 以当前时间校验信封
    pub fn validate<T>(&self, envelope: &EventEnvelope<T>) -> Result<(), ValidationError> {
        self.validate_at(envelope, Utc::now())
    }

    /// 以给定的“当前时间”校验信封
    pub fn validate_at<T>(
        &self,
        envelope: &EventEnvelope<T>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        if envelope.event_id().is_nil() {
            violations.push(Violation::MissingEventId);
        }

        let event_type = envelope.event_type();
        if event_type.trim().is_empty() {
            violations.push(Violation::EmptyEventType);
        } else if !self.event_type_pattern.is_match(event_type) {
            violations.push(Violation::MalformedEventType {
                event_type: event_type.to_string(),
            });
        }

        let source_service = envelope.source_service();
        if source_service.trim().is_empty() {
            violations.push(Violation::EmptySourceService);
        } else if !self.source_service_pattern.is_match(source_service) {
            violations.push(Violation::MalformedSourceService {
                source_service: source_service.to_string(),
            });
        }

        // 窗口越过可表示的时间范围时，该方向不设限
        let timestamp = envelope.timestamp();
        if now
            .checked_sub_signed(self.max_past)
            .is_some_and(|oldest| timestamp < oldest)
        {
            violations.push(Violation::TimestampTooOld {
                window: self.max_past_label.clone(),
            });
        }
        if now
            .checked_add_signed(self.max_future)
            .is_some_and(|latest| timestamp > latest)
        {
            violations.push(Violation::TimestampInFuture {
                window: self.max_future_label.clone(),
            });
        }

        let version = envelope.version();
        if version.trim().is_empty() {
            violations.push(Violation::EmptyVersion);
        } else if !self.is_version_supported(version) {
            violations.push(Violation::UnsupportedVersion {
                version: version.to_string(),
                supported: self.supported_versions.clone(),
            });
        }

        if envelope.data().is_none() {
            violations.push(Violation::MissingData);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }

    pub fn is_version_supported(&self, version: &str) -> bool {
        self.supported_versions.iter().any(|v| v == version)
    }

    pub fn supported_versions(&self) -> &[String] {
        &self.supported_versions
    }

    pub fn latest_supported_version(&self) -> &str {
        // 构造时保证非空
        self.supported_versions
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }
}

fn to_time_delta(field: &'static str, window: Duration) -> ConfigResult<TimeDelta> {
    TimeDelta::from_std(window).map_err(|e| ConfigError::InvalidValue {
        field,
        reason: e.to_string(),
    })
}

fn window_out_of_range(field: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: "window exceeds the representable date range".to_string(),
    }
}

/// 将窗口时长渲染为可读文本，例如 `24 hours`、`5 minutes`
fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    let (amount, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };

    if amount == 1 {
        format!("{amount} {unit}")
    } else {
        format!("{amount} {unit}s")
    }
}
