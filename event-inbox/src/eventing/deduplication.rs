//! 事件去重（EventDeduplicator）
//!
//! 在“至少一次”投递之上保证同一 `event_id` 的受保护动作至多执行一次：
//! - 已处理集合 `event_id → processed_at` 只在动作成功后写入，写入后不再更新；
//! - 同一 `event_id` 的并发调用通过按键互斥串行化，后到者在锁内复查并观察到“已处理”；
//! - 动作失败不做记录，后续重投递可以干净地重试；
//! - 记录按保留期（`retention`）淘汰，可由后台任务周期执行，`shutdown` 停止该任务。
//!
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// 去重存储配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    /// 已处理记录的保留期，应覆盖传输层的最大重投递窗口
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// 后台淘汰任务的执行间隔
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

/// 默认保留期：覆盖默认新鲜度窗口（过去 24 小时 + 未来 5 分钟）
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60 + 5 * 60);

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            cleanup_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// 按事件 ID 的至多一次执行守卫
pub struct EventDeduplicator {
    processed: DashMap<Uuid, DateTime<Utc>>,
    in_flight: DashMap<Uuid, Arc<Mutex<()>>>,
    config: DeduplicationConfig,
    token: CancellationToken,
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DeduplicationConfig::default())
    }
}

impl EventDeduplicator {
    pub fn new(config: DeduplicationConfig) -> Self {
        Self {
            processed: DashMap::new(),
            in_flight: DashMap::new(),
            config,
            token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &DeduplicationConfig {
        &self.config
    }

    /// 若 `event_id` 未处理过则执行 `action`
    ///
    /// 返回 `Ok(true)` 表示本次执行了动作并已记录；`Ok(false)` 表示重复事件、动作未执行；
    /// 动作失败时原样返回其错误，且不记录该事件。
    pub async fn process_if_not_duplicate<F, Fut, E>(
        &self,
        event_id: Uuid,
        action: F,
    ) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        if self.is_processed(&event_id) {
            debug!(%event_id, "event already processed, skipping");
            return Ok(false);
        }

        let slot = InFlightSlot::acquire(&self.in_flight, event_id);
        let _guard = slot.lock.lock().await;

        // 持锁复查：并发的同 ID 调用在此观察到先行者的结果
        if self.is_processed(&event_id) {
            debug!(%event_id, "event processed concurrently, skipping");
            return Ok(false);
        }

        action().await?;

        let processed_at = Utc::now();
        self.processed.insert(event_id, processed_at);
        debug!(%event_id, %processed_at, "marked event as processed");

        Ok(true)
    }

    pub fn is_processed(&self, event_id: &Uuid) -> bool {
        self.processed.contains_key(event_id)
    }

    /// 显式标记为已处理（初始化/管理用途）；已存在的记录保持不变
    pub fn mark_processed(&self, event_id: Uuid) {
        self.processed.entry(event_id).or_insert_with(Utc::now);
    }

    pub fn processed_at(&self, event_id: &Uuid) -> Option<DateTime<Utc>> {
        self.processed.get(event_id).map(|at| *at)
    }

    pub fn size(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    pub fn clear(&self) {
        let cleared = self.processed.len();
        self.processed.clear();
        info!(cleared, "cleared deduplication cache");
    }

    /// 淘汰早于 `cutoff` 处理的记录，返回淘汰数量
    pub fn evict_processed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.processed.len();
        self.processed.retain(|_, processed_at| *processed_at >= cutoff);
        before.saturating_sub(self.processed.len())
    }

    /// 按保留期淘汰过期记录
    pub fn evict_expired(&self) -> usize {
        let retention = TimeDelta::from_std(self.config.retention).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let evicted = self.evict_processed_before(cutoff);
        if evicted > 0 {
            debug!(evicted, remaining = self.processed.len(), "evicted expired events");
        }
        evicted
    }

    /// 启动后台淘汰任务，按 `cleanup_interval` 周期执行 `evict_expired`
    pub fn spawn_eviction(self: &Arc<Self>) -> EvictionHandle {
        let token = self.token.child_token();
        let period = self.config.cleanup_interval.max(Duration::from_millis(1));
        let dedup = Arc::clone(self);
        let task_token = token.clone();

        info!(
            cleanup_interval_secs = period.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            "started deduplication eviction task"
        );

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        dedup.evict_expired();
                    }
                }
            }
        });

        EvictionHandle {
            token,
            task: Some(task),
        }
    }

    /// 停止所有后台淘汰任务；可重复调用
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
            info!("event deduplication shutdown completed");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// 同一 `event_id` 的执行槽位；释放时若无其他等待者则移除
struct InFlightSlot<'a> {
    map: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    event_id: Uuid,
    lock: Arc<Mutex<()>>,
}

impl<'a> InFlightSlot<'a> {
    fn acquire(map: &'a DashMap<Uuid, Arc<Mutex<()>>>, event_id: Uuid) -> Self {
        let lock = Arc::clone(&map.entry(event_id).or_default());
        Self {
            map,
            event_id,
            lock,
        }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // 映射与本槽位各持有一份引用
        self.map.remove_if(&self.event_id, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

/// 后台淘汰任务句柄：用于关闭与等待任务结束
pub struct EvictionHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EvictionHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for EvictionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn executes_once_then_reports_duplicate() {
        let dedup = EventDeduplicator::default();
        let calls = AtomicUsize::new(0);
        let id = Uuid::new_v4();

        let first = dedup
            .process_if_not_duplicate(id, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            })
            .await
            .unwrap();
        let second = dedup
            .process_if_not_duplicate(id, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            })
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(dedup.is_processed(&id));
        assert_eq!(dedup.size(), 1);
        assert!(dedup.in_flight.is_empty());
    }

    #[tokio::test]
    async fn failure_is_not_recorded() {
        let dedup = EventDeduplicator::default();
        let id = Uuid::new_v4();

        let result = dedup
            .process_if_not_duplicate(id, || async { Err(anyhow::anyhow!("boom")) })
            .await;

        assert_eq!(result.unwrap_err().to_string(), "boom");
        assert!(!dedup.is_processed(&id));
        assert!(dedup.is_empty());
        assert!(dedup.in_flight.is_empty());

        let retried = dedup
            .process_if_not_duplicate(id, || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert!(retried);
    }

    #[tokio::test]
    async fn mark_and_clear() {
        let dedup = EventDeduplicator::default();
        let id = Uuid::new_v4();

        dedup.mark_processed(id);
        let first_mark = dedup.processed_at(&id).unwrap();
        dedup.mark_processed(id);
        assert_eq!(dedup.processed_at(&id), Some(first_mark));

        let executed = dedup
            .process_if_not_duplicate(id, || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert!(!executed);

        dedup.clear();
        assert_eq!(dedup.size(), 0);
        assert!(!dedup.is_processed(&id));
    }

    #[test]
    fn evicts_by_cutoff_and_retention() {
        let dedup = EventDeduplicator::new(DeduplicationConfig {
            retention: Duration::from_secs(3600),
            ..Default::default()
        });
        let old = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        dedup
            .processed
            .insert(old, Utc::now() - TimeDelta::hours(2));
        dedup.mark_processed(fresh);

        assert_eq!(dedup.evict_expired(), 1);
        assert!(!dedup.is_processed(&old));
        assert!(dedup.is_processed(&fresh));

        assert_eq!(
            dedup.evict_processed_before(Utc::now() + TimeDelta::seconds(1)),
            1
        );
        assert!(dedup.is_empty());
    }

    #[test]
    fn default_retention_outlives_every_acceptable_redelivery() {
        use crate::envelope::EventEnvelope;
        use crate::eventing::EventValidator;
        use serde_json::json;

        let validator = EventValidator::default();
        let dedup = EventDeduplicator::default();
        let retention = TimeDelta::from_std(dedup.config().retention).unwrap();

        // 发布方时钟超前：信封时间戳接近未来窗口上限
        let received_at = Utc::now();
        let envelope = EventEnvelope::builder()
            .event_type("task.created")
            .source_service("task-service")
            .timestamp(received_at + TimeDelta::minutes(5))
            .data(json!({"userId": 1}))
            .build();
        assert!(validator.validate_at(&envelope, received_at).is_ok());
        dedup.processed.insert(envelope.event_id(), received_at);

        // 重投递在信封仍然有效的最后时刻到达
        let redelivered_at = envelope.timestamp() + TimeDelta::hours(24);
        assert!(validator.validate_at(&envelope, redelivered_at).is_ok());

        assert_eq!(dedup.evict_processed_before(redelivered_at - retention), 0);
        assert!(dedup.is_processed(&envelope.event_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn background_eviction_runs_until_shutdown() {
        let dedup = Arc::new(EventDeduplicator::new(DeduplicationConfig {
            retention: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
        }));
        let stale = Uuid::new_v4();
        dedup
            .processed
            .insert(stale, Utc::now() - TimeDelta::hours(3));

        let handle = dedup.spawn_eviction();
        time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(!dedup.is_processed(&stale));

        dedup.shutdown();
        dedup.shutdown();
        assert!(dedup.is_shutdown());
        handle.join().await;
    }
}
