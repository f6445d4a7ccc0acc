use super::route::EventRoute;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 未显式指定时使用的信封版本
pub const DEFAULT_VERSION: &str = "1.0";

/// 事件信封：发布方分配的事件标识、类型、来源、发布时间、版本与载荷
///
/// `event_id` 在重投递时保持不变，相同 `event_id` 的两个信封代表同一次业务发生。
/// 线上形态为 camelCase JSON（`eventId`、`eventType`、`sourceService` …），
/// 缺失的 `eventId`/`data` 反序列化为空值，交由校验阶段拒绝。
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<T> {
    /// 事件唯一标识（nil 视为缺失）
    #[builder(default = Uuid::new_v4())]
    #[serde(default)]
    event_id: Uuid,
    /// 事件类型，形如 `task.created`
    #[builder(into)]
    #[serde(default)]
    event_type: String,
    /// 来源服务，形如 `task-service`
    #[builder(into)]
    #[serde(default)]
    source_service: String,
    /// 发布时间
    #[builder(default = Utc::now())]
    timestamp: DateTime<Utc>,
    /// 载荷 schema 版本
    #[builder(into, default = String::from(DEFAULT_VERSION))]
    #[serde(default)]
    version: String,
    /// 业务载荷
    #[serde(default = "Option::default")]
    data: Option<T>,
}

impl<T> EventEnvelope<T> {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source_service(&self) -> &str {
        &self.source_service
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn route(&self) -> EventRoute {
        EventRoute::new(self.event_type.clone(), self.source_service.clone())
    }

    /// 保留信封头部，转换载荷
    pub fn map_data<U, F>(self, f: F) -> EventEnvelope<U>
    where
        F: FnOnce(T) -> U,
    {
        EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type,
            source_service: self.source_service,
            timestamp: self.timestamp,
            version: self.version,
            data: self.data.map(f),
        }
    }
}

impl<T> EventEnvelope<T>
where
    T: DeserializeOwned,
{
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

impl<T> EventEnvelope<T>
where
    T: Serialize,
{
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl EventEnvelope<Value> {
    /// 将 JSON 载荷解码为具体类型（不消耗信封）
    pub fn data_as<D>(&self) -> Result<Option<D>, serde_json::Error>
    where
        D: DeserializeOwned,
    {
        self.data
            .as_ref()
            .map(|value| D::deserialize(value))
            .transpose()
    }

    /// 将整个信封解码为具体载荷类型
    pub fn decode<D>(self) -> Result<EventEnvelope<D>, serde_json::Error>
    where
        D: DeserializeOwned,
    {
        let data = self.data.map(serde_json::from_value).transpose()?;

        Ok(EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type,
            source_service: self.source_service,
            timestamp: self.timestamp,
            version: self.version,
            data,
        })
    }
}
