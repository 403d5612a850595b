//! 触发Webhook投递的领域事件
//!
//! 每种事件携带在事件发生时捕获的快照；投递始终反映事件当时的状态，
//! 不会回读主体的实时数据。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{SubjectRef, SubjectType, UnitId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitSummary {
    pub id: UnitId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSummary {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// 线索登记快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitSummary>,
    pub registered_at: DateTime<Utc>,
}

/// 成交记录快照，连同客户、单元和创建人摘要
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaleSnapshot {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    pub client: ClientSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitSummary>,
    pub created_by: UserSummary,
    pub completed_at: DateTime<Utc>,
}

/// 事件负载
///
/// 序列化为 `{"event": "lead.registered", "data": {...}}`，该JSON即存入投递记录并原样POST给订阅方。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum EventPayload {
    #[serde(rename = "lead.registered")]
    LeadRegistered(LeadSnapshot),
    #[serde(rename = "sale.completed")]
    SaleCompleted(SaleSnapshot),
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::LeadRegistered(_) => "lead.registered",
            EventPayload::SaleCompleted(_) => "sale.completed",
        }
    }

    pub fn subject(&self) -> SubjectRef {
        match self {
            EventPayload::LeadRegistered(lead) => SubjectRef::new(SubjectType::Lead, lead.id.clone()),
            EventPayload::SaleCompleted(sale) => SubjectRef::new(SubjectType::Sale, sale.id.clone()),
        }
    }

    /// 事件所属的组织单元，决定哪些单元作用域的Endpoint会收到它
    pub fn unit_id(&self) -> Option<UnitId> {
        let unit = match self {
            EventPayload::LeadRegistered(lead) => lead.unit.as_ref(),
            EventPayload::SaleCompleted(sale) => sale.unit.as_ref(),
        };
        unit.map(|u| u.id)
    }

    pub fn to_snapshot(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
