use std::sync::Arc;

use tracing::{debug, info, instrument};
use webhook_domain::entities::{DeliveryRecord, SubjectRef, UnitId};
use webhook_domain::events::EventPayload;
use webhook_domain::repositories::{DeliveryRecordRepository, EndpointRepository};
use webhook_errors::WebhookResult;

/// 事件发射器
///
/// 为每个匹配的活跃Endpoint创建一条 PENDING 投递记录。只追加，不读取同一主体的历史记录，
/// 同一事件触发两次就会产生两组记录，去重由订阅方负责。
pub struct EventEmitter {
    endpoint_repository: Arc<dyn EndpointRepository>,
    delivery_repository: Arc<dyn DeliveryRecordRepository>,
}

impl EventEmitter {
    pub fn new(
        endpoint_repository: Arc<dyn EndpointRepository>,
        delivery_repository: Arc<dyn DeliveryRecordRepository>,
    ) -> Self {
        Self {
            endpoint_repository,
            delivery_repository,
        }
    }

    /// 发射类型化事件，主体和作用域都从负载中推导
    pub async fn emit_event(&self, event: &EventPayload) -> WebhookResult<Vec<DeliveryRecord>> {
        let snapshot = event.to_snapshot()?;
        let records = self.emit(event.subject(), snapshot, event.unit_id()).await?;

        metrics::counter!("webhook_events_emitted_total", "event" => event.event_type()).increment(1);
        Ok(records)
    }

    /// 没有匹配的Endpoint时返回空列表，不视为错误
    #[instrument(skip(self, payload), fields(subject = %subject))]
    pub async fn emit(
        &self,
        subject: SubjectRef,
        payload: serde_json::Value,
        unit_id: Option<UnitId>,
    ) -> WebhookResult<Vec<DeliveryRecord>> {
        let endpoints = self.endpoint_repository.find_active_for_unit(unit_id).await?;
        if endpoints.is_empty() {
            debug!(unit_id = ?unit_id, "没有匹配的Endpoint，跳过");
            return Ok(Vec::new());
        }

        let pending: Vec<DeliveryRecord> = endpoints
            .iter()
            .map(|endpoint| DeliveryRecord::pending(endpoint.id, subject.clone(), payload.clone()))
            .collect();

        let created = self.delivery_repository.create_all(&pending).await?;

        metrics::counter!("webhook_delivery_records_created_total").increment(created.len() as u64);
        info!(
            unit_id = ?unit_id,
            record_count = created.len(),
            "已创建投递记录"
        );
        Ok(created)
    }
}
