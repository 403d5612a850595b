use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 组织单元ID
pub type UnitId = i64;

/// Endpoint作用域: 全局，或绑定到某个组织单元
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointScope {
    Global,
    Unit { unit_id: UnitId },
}

impl EndpointScope {
    /// 持久化形式: NULL 表示全局
    pub fn unit_id(&self) -> Option<UnitId> {
        match self {
            EndpointScope::Global => None,
            EndpointScope::Unit { unit_id } => Some(*unit_id),
        }
    }

    pub fn from_unit_id(unit_id: Option<UnitId>) -> Self {
        match unit_id {
            Some(unit_id) => EndpointScope::Unit { unit_id },
            None => EndpointScope::Global,
        }
    }

    /// 全局作用域覆盖所有事件；单元作用域只覆盖同一单元的事件
    pub fn covers(&self, event_unit: Option<UnitId>) -> bool {
        match self {
            EndpointScope::Global => true,
            EndpointScope::Unit { unit_id } => event_unit == Some(*unit_id),
        }
    }
}

impl fmt::Display for EndpointScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointScope::Global => write!(f, "global"),
            EndpointScope::Unit { unit_id } => write!(f, "unit:{unit_id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub id: i64,
    pub url: String,
    pub scope: EndpointScope,
    pub active: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    pub fn new(url: String, scope: EndpointScope) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            url,
            scope,
            active: true,
            last_success_at: None,
            last_failure_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 是否应接收指定单元的事件
    pub fn accepts(&self, event_unit: Option<UnitId>) -> bool {
        self.active && self.scope.covers(event_unit)
    }

    pub fn entity_description(&self) -> String {
        format!("Endpoint {} ({}, {})", self.id, self.url, self.scope)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EndpointFilter {
    pub active: Option<bool>,
    pub scope: Option<EndpointScope>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// 投递记录生命周期
///
/// `Pending`/`Retrying` 是可被认领的非终态，`InFlight` 表示已被某次调用认领，
/// `Succeeded`/`DeadLettered` 为终态，之后不再变化。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RETRYING")]
    Retrying,
    #[serde(rename = "IN_FLIGHT")]
    InFlight,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "DEAD_LETTERED")]
    DeadLettered,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 5] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Retrying,
        DeliveryStatus::InFlight,
        DeliveryStatus::Succeeded,
        DeliveryStatus::DeadLettered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Retrying => "RETRYING",
            DeliveryStatus::InFlight => "IN_FLIGHT",
            DeliveryStatus::Succeeded => "SUCCEEDED",
            DeliveryStatus::DeadLettered => "DEAD_LETTERED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Succeeded | DeliveryStatus::DeadLettered)
    }

    /// 可进入到期批次的状态
    pub fn is_claimable(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Retrying)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(DeliveryStatus::Pending),
            "RETRYING" => Ok(DeliveryStatus::Retrying),
            "IN_FLIGHT" => Ok(DeliveryStatus::InFlight),
            "SUCCEEDED" => Ok(DeliveryStatus::Succeeded),
            "DEAD_LETTERED" => Ok(DeliveryStatus::DeadLettered),
            _ => Err(format!("Invalid delivery status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Lead,
    Sale,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Lead => "lead",
            SubjectType::Sale => "sale",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lead" => Ok(SubjectType::Lead),
            "sale" => Ok(SubjectType::Sale),
            _ => Err(format!("Invalid subject type: {s}")),
        }
    }
}

/// 触发事件的领域对象引用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubjectRef {
    pub subject_type: SubjectType,
    pub subject_id: String,
}

impl SubjectRef {
    pub fn new(subject_type: SubjectType, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type,
            subject_id: subject_id.into(),
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.subject_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryRecord {
    pub id: i64,
    pub endpoint_id: i64,
    #[serde(flatten)]
    pub subject: SubjectRef,
    /// 事件发生时捕获的快照，创建后不可变
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn pending(endpoint_id: i64, subject: SubjectRef, payload: serde_json::Value) -> Self {
        Self {
            id: 0, // 将由数据库生成
            endpoint_id,
            subject,
            payload,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            next_retry_at: None,
            error_message: None,
            claimed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 非终态、未被认领，且 next_retry 为空或已到期
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_retry_at.map_or(true, |at| at <= now)
    }

    pub fn entity_description(&self) -> String {
        format!(
            "投递记录 {} (Endpoint: {}, 主体: {}, 尝试次数: {})",
            self.id, self.endpoint_id, self.subject, self.attempt_count
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub status: Option<DeliveryStatus>,
    pub endpoint_id: Option<i64>,
    pub subject_type: Option<SubjectType>,
    pub subject_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// 各状态的投递记录数量
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryStats {
    pub pending: i64,
    pub retrying: i64,
    pub in_flight: i64,
    pub succeeded: i64,
    pub dead_lettered: i64,
}

impl DeliveryStats {
    pub fn add(&mut self, status: DeliveryStatus, count: i64) {
        match status {
            DeliveryStatus::Pending => self.pending += count,
            DeliveryStatus::Retrying => self.retrying += count,
            DeliveryStatus::InFlight => self.in_flight += count,
            DeliveryStatus::Succeeded => self.succeeded += count,
            DeliveryStatus::DeadLettered => self.dead_lettered += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.retrying + self.in_flight + self.succeeded + self.dead_lettered
    }
}
