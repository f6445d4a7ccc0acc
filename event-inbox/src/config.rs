//! 收件箱配置（InboxConfig）
//!
//! 聚合管线各部分的配置段，所有段落都有默认值：
//! - `validation`：新鲜度窗口、受支持版本与命名规则；
//! - `retry`：最大尝试次数与退避形状；
//! - `deduplication`：已处理记录保留期与淘汰间隔；
//! - `consumer`：并发消费上限；
//! - `logging`：日志级别与格式。
//!
//! 可从 TOML/JSON/YAML 文件加载，并由 `EVENT_INBOX__<SECTION>__<KEY>` 环境变量覆盖，
//! 时长使用 humantime 字符串（如 `"24h"`、`"250ms"`）；
//! `EVENT_INBOX__VALIDATION__SUPPORTED_VERSIONS` 以逗号分隔（如 `1.0,1.1`）。
//!
use crate::error::ConfigResult;
use crate::eventing::{
    DeduplicationConfig, EventDeduplicator, EventValidator, RetryPolicy, ValidationConfig,
};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

const ENV_PREFIX: &str = "EVENT_INBOX";

/// 消费者配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// 同时处理的事件数上限
    pub concurrency: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    pub validation: ValidationConfig,
    pub retry: RetryPolicy,
    pub deduplication: DeduplicationConfig,
    pub consumer: ConsumerConfig,
    pub logging: LoggingConfig,
}

impl InboxConfig {
    /// 从可选的配置文件与环境变量加载
    pub fn load(path: &str) -> ConfigResult<Self> {
        Self::load_with(path, Self::environment())
    }

    fn load_with(path: &str, environment: config::Environment) -> ConfigResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(environment)
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// 从内嵌的 TOML 文本加载（不读取环境变量）
    pub fn from_toml(raw: &str) -> ConfigResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("validation.supported_versions")
    }

    pub fn validator(&self) -> ConfigResult<EventValidator> {
        EventValidator::new(&self.validation)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    /// 保留期短于新鲜度窗口（`max_past + max_future`）时按窗口放宽
    pub fn deduplicator(&self) -> Arc<EventDeduplicator> {
        let mut deduplication = self.deduplication;
        let window = self
            .validation
            .max_past
            .saturating_add(self.validation.max_future);

        if deduplication.retention < window {
            warn!(
                retention_secs = deduplication.retention.as_secs(),
                window_secs = window.as_secs(),
                "deduplication retention shorter than validation window, extending"
            );
            deduplication.retention = window;
        }

        Arc::new(EventDeduplicator::new(deduplication))
    }
}
