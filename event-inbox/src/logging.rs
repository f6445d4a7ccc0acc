//! 日志初始化（tracing-subscriber）
//!
//! - `RUST_LOG` 优先，否则使用配置中的 `level`；
//! - 支持 `pretty`（本地开发）、`compact` 与 `json`（生产环境结构化日志）；
//! - 全局只安装一次，重复或并发调用直接返回；
//! - 宿主程序已安装自己的订阅者时保留对方，不视为错误。
//!
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 全局级别或 EnvFilter 指令，例如 `info,event_inbox=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// 输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// 安装全局 tracing 订阅者
///
/// 进程内只尝试安装一次；已存在其他全局订阅者时沿用它并返回 `Ok`。
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    INITIALIZED.get_or_init(|| {
        if let Err(err) = install(filter, config.format) {
            tracing::debug!(error = %err, "global tracing subscriber already installed");
        }
    });
    Ok(())
}

fn install(filter: EnvFilter, format: LogFormat) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    }
}
