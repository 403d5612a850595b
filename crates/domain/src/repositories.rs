//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use webhook_errors::WebhookResult;

use crate::entities::{
    DeliveryFilter, DeliveryRecord, DeliveryStats, Endpoint, EndpointFilter, EndpointScope, UnitId,
};

/// Endpoint仓储抽象
#[async_trait]
pub trait EndpointRepository: Send + Sync {
    async fn create(&self, endpoint: &Endpoint) -> WebhookResult<Endpoint>;
    async fn get_by_id(&self, id: i64) -> WebhookResult<Option<Endpoint>>;
    async fn list(&self, filter: &EndpointFilter) -> WebhookResult<Vec<Endpoint>>;
    /// 修改URL和作用域，不触碰 active 和健康时间戳
    async fn update(&self, id: i64, url: &str, scope: EndpointScope) -> WebhookResult<Endpoint>;
    async fn set_active(&self, id: i64, active: bool) -> WebhookResult<Endpoint>;
    /// 所有活跃的全局Endpoint，加上单元匹配的活跃Endpoint
    async fn find_active_for_unit(&self, unit_id: Option<UnitId>) -> WebhookResult<Vec<Endpoint>>;
    async fn record_success(&self, id: i64, at: DateTime<Utc>) -> WebhookResult<()>;
    async fn record_failure(&self, id: i64, at: DateTime<Utc>) -> WebhookResult<()>;
}

/// 投递记录仓储抽象
///
/// 状态字段 (status, attempt_count, next_retry_at, error_message) 只允许通过
/// `claim_due` 和 `mark_*` 系列方法修改；`mark_*` 仅对 IN_FLIGHT 记录生效，
/// 其余情况返回 `InvalidStateTransition`。
#[async_trait]
pub trait DeliveryRecordRepository: Send + Sync {
    /// 同一次事件产生的记录在一个事务内写入
    async fn create_all(&self, records: &[DeliveryRecord]) -> WebhookResult<Vec<DeliveryRecord>>;
    async fn get_by_id(&self, id: i64) -> WebhookResult<Option<DeliveryRecord>>;
    async fn list(&self, filter: &DeliveryFilter) -> WebhookResult<Vec<DeliveryRecord>>;
    /// 只读地查看到期记录，按 created_at, id 排序
    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>>;
    /// 原子地认领到期记录: 置为 IN_FLIGHT，attempt_count 加一，记录 last_attempt_at
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>>;
    async fn mark_succeeded(&self, id: i64) -> WebhookResult<DeliveryRecord>;
    async fn mark_retrying(
        &self,
        id: i64,
        next_retry_at: DateTime<Utc>,
        error_message: &str,
    ) -> WebhookResult<DeliveryRecord>;
    async fn mark_dead_lettered(&self, id: i64, error_message: &str) -> WebhookResult<DeliveryRecord>;
    /// 认领时间早于 cutoff 的 IN_FLIGHT 记录
    async fn find_stale_claims(&self, cutoff: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>>;
    async fn status_counts(&self) -> WebhookResult<DeliveryStats>;
}
