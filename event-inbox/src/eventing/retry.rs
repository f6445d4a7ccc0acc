//! 有界重试（RetryPolicy）
//!
//! 在去重边界之内吸收处理器的瞬时失败：按策略的退避间隔重新调用，
//! 至多 `max_attempts` 次；不可重试的失败立即返回；耗尽后原样返回最后一次错误。
//!
use crate::error::HandlerError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// 失败分类：是否值得再次尝试
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for HandlerError {
    fn is_retryable(&self) -> bool {
        HandlerError::is_retryable(self)
    }
}

/// 两次尝试之间的等待形状
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// 立即重试
    None,
    /// 固定间隔
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// 指数退避：`base * multiplier^(attempt-1)`，不超过 `max`，叠加 ±`jitter` 比例的抖动
    Exponential {
        #[serde(with = "humantime_serde")]
        base: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        multiplier: f64,
        jitter: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl Backoff {
    /// 第 `attempt` 次（从 1 开始）失败后、下一次尝试前的等待时长
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                base,
                max,
                multiplier,
                jitter,
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = base.as_secs_f64() * multiplier.max(1.0).powi(exponent);
                let capped = if secs.is_finite() && secs < max.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    *max
                };

                let jitter = jitter.clamp(0.0, 1.0);
                let jittered = if jitter > 0.0 {
                    let spread = rand::rng().random_range(-jitter..=jitter);
                    capped.mul_f64(1.0 + spread)
                } else {
                    capped
                };

                jittered.max(*base)
            }
        }
    }
}

/// 重试策略：最大尝试次数 + 退避形状
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次），0 按 1 处理
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, Backoff::Fixed { delay })
    }

    /// 只尝试一次
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::None)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// 按策略执行 `action`，返回首个成功结果或最后一次失败
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut action: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match action().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "action succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                warn!(attempt, error = %err, "non-retryable failure, giving up");
                return Err(err);
            }
            Err(err) if attempt >= max_attempts => {
                warn!(attempt, max_attempts, error = %err, "retry attempts exhausted");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.backoff.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
