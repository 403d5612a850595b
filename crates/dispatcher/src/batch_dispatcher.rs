use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use webhook_config::DispatcherConfig;
use webhook_domain::entities::{DeliveryRecord, Endpoint};
use webhook_domain::ports::{Clock, WebhookSender};
use webhook_domain::repositories::{DeliveryRecordRepository, EndpointRepository};
use webhook_errors::{WebhookError, WebhookResult};

use crate::retry_policy::{RetryDecision, RetryPolicy};

const ABANDONED_ATTEMPT_MESSAGE: &str = "投递尝试被中断: 认领租约已过期";

/// 分发器运行参数
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub batch_size: i64,
    pub claim_lease: Duration,
    pub max_attempts: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}

impl From<&DispatcherConfig> for DispatchSettings {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            batch_size: config.batch_size as i64,
            claim_lease: Duration::seconds(config.claim_lease_seconds as i64),
            max_attempts: config.max_attempts,
        }
    }
}

/// 一次调用的结果摘要
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    /// 本次认领的记录数，包含因Endpoint加载失败而暂缓发送的记录
    pub processed_count: usize,
    pub success_count: usize,
    /// 失败次数，包含进入死信的记录
    pub failure_count: usize,
    pub dead_lettered_count: usize,
    /// 租约过期后按失败处理的遗留认领数，不计入 processed_count
    pub recovered_count: usize,
}

/// 单条记录的投递结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Succeeded,
    Retrying,
    DeadLettered,
    /// 未发出请求，认领保持 IN_FLIGHT，等待租约过期后恢复
    Deferred,
}

impl DeliveryOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Succeeded => "success",
            DeliveryOutcome::Retrying => "retrying",
            DeliveryOutcome::DeadLettered => "dead_lettered",
            DeliveryOutcome::Deferred => "deferred",
        }
    }
}

/// 批次分发器
///
/// 每次 `dispatch_batch` 调用处理一个有界批次后返回；认领在一条语句中完成，
/// attempt_count 在发出网络请求之前已经落库。单条记录的失败只写回该记录，
/// 只有认领本身失败才会让整个调用失败。
pub struct BatchDispatcher {
    endpoint_repository: Arc<dyn EndpointRepository>,
    delivery_repository: Arc<dyn DeliveryRecordRepository>,
    sender: Arc<dyn WebhookSender>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    settings: DispatchSettings,
}

impl BatchDispatcher {
    pub fn new(
        endpoint_repository: Arc<dyn EndpointRepository>,
        delivery_repository: Arc<dyn DeliveryRecordRepository>,
        sender: Arc<dyn WebhookSender>,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            endpoint_repository,
            delivery_repository,
            sender,
            clock,
            retry_policy: RetryPolicy::new(settings.max_attempts),
            settings,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    #[instrument(skip(self))]
    pub async fn dispatch_batch(&self) -> WebhookResult<DispatchSummary> {
        let now = self.clock.now();
        let recovered_count = self.recover_stale_claims(now).await;

        let claimed = match self
            .delivery_repository
            .claim_due(now, self.settings.batch_size)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!("认领到期投递记录失败: {}", e);
                return Err(e);
            }
        };

        let mut summary = DispatchSummary {
            processed_count: claimed.len(),
            recovered_count,
            ..Default::default()
        };

        if claimed.is_empty() {
            debug!("没有到期的投递记录");
            return Ok(summary);
        }

        info!(count = claimed.len(), "认领到期投递记录");

        let endpoints = self.load_endpoints(&claimed).await;
        let outcomes = join_all(
            claimed
                .iter()
                .map(|record| self.dispatch_record(record, endpoints.get(&record.endpoint_id))),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                DeliveryOutcome::Succeeded => summary.success_count += 1,
                DeliveryOutcome::Retrying => summary.failure_count += 1,
                DeliveryOutcome::DeadLettered => {
                    summary.failure_count += 1;
                    summary.dead_lettered_count += 1;
                }
                DeliveryOutcome::Deferred => {}
            }
        }

        info!(
            processed = summary.processed_count,
            succeeded = summary.success_count,
            failed = summary.failure_count,
            dead_lettered = summary.dead_lettered_count,
            recovered = summary.recovered_count,
            "投递批次完成"
        );
        Ok(summary)
    }

    /// 处理租约过期的 IN_FLIGHT 记录，每条都计为一次失败的尝试
    ///
    /// 只统计守卫写入成功的记录；并发调用已经恢复过的记录在这里会写入失败并被跳过。
    async fn recover_stale_claims(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.settings.claim_lease;
        let stale = match self
            .delivery_repository
            .find_stale_claims(cutoff, self.settings.batch_size)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!("查询过期认领失败: {}", e);
                return 0;
            }
        };

        if stale.is_empty() {
            return 0;
        }

        warn!(count = stale.len(), "发现租约过期的投递认领");
        let results = join_all(stale.iter().map(|record| async move {
            let (outcome, written) = self
                .write_failure(record, ABANDONED_ATTEMPT_MESSAGE, now)
                .await;
            match written {
                Ok(_) => {
                    self.touch_endpoint_failure(record.endpoint_id, now).await;
                    metrics::counter!("webhook_deliveries_total", "outcome" => outcome.as_label())
                        .increment(1);
                    true
                }
                Err(WebhookError::InvalidStateTransition { .. }) => {
                    debug!(delivery_id = record.id, "过期认领已被其他调用处理");
                    false
                }
                Err(e) => {
                    error!(delivery_id = record.id, "恢复过期认领失败: {}", e);
                    false
                }
            }
        }))
        .await;

        results.into_iter().filter(|recovered| *recovered).count()
    }

    /// 批量加载Endpoint；值为 None 表示Endpoint不存在，缺少的键表示加载失败
    async fn load_endpoints(&self, records: &[DeliveryRecord]) -> HashMap<i64, Option<Endpoint>> {
        let mut endpoints = HashMap::new();
        for record in records {
            if endpoints.contains_key(&record.endpoint_id) {
                continue;
            }
            match self.endpoint_repository.get_by_id(record.endpoint_id).await {
                Ok(endpoint) => {
                    if endpoint.is_none() {
                        warn!(endpoint_id = record.endpoint_id, "投递记录引用的Endpoint不存在");
                    }
                    endpoints.insert(record.endpoint_id, endpoint);
                }
                Err(e) => error!(endpoint_id = record.endpoint_id, "加载Endpoint失败: {}", e),
            }
        }
        endpoints
    }

    async fn dispatch_record(
        &self,
        record: &DeliveryRecord,
        endpoint: Option<&Option<Endpoint>>,
    ) -> DeliveryOutcome {
        let endpoint = match endpoint {
            Some(Some(endpoint)) => endpoint,
            Some(None) => {
                let now = self.clock.now();
                let message = format!("无法加载Endpoint {}", record.endpoint_id);
                let (outcome, written) = self.write_failure(record, &message, now).await;
                if let Err(e) = written {
                    error!(delivery_id = record.id, "写入投递失败状态失败: {}", e);
                }
                metrics::counter!("webhook_deliveries_total", "outcome" => outcome.as_label()).increment(1);
                return outcome;
            }
            None => {
                // 存储故障不算作订阅方的失败，保留认领由租约恢复处理
                warn!(
                    delivery_id = record.id,
                    endpoint_id = record.endpoint_id,
                    "Endpoint加载失败，本次不发送"
                );
                return DeliveryOutcome::Deferred;
            }
        };

        debug!(
            delivery_id = record.id,
            endpoint_id = endpoint.id,
            attempt = record.attempt_count,
            "发送Webhook"
        );

        let started = Instant::now();
        let result = self.sender.send(&endpoint.url, record).await;
        metrics::histogram!("webhook_delivery_duration_ms").record(started.elapsed().as_millis() as f64);

        let completed_at = self.clock.now();
        match result {
            Ok(response) => {
                if let Err(e) = self.delivery_repository.mark_succeeded(record.id).await {
                    error!(delivery_id = record.id, "写入投递成功状态失败: {}", e);
                }
                if let Err(e) = self
                    .endpoint_repository
                    .record_success(record.endpoint_id, completed_at)
                    .await
                {
                    error!(endpoint_id = record.endpoint_id, "更新Endpoint成功时间失败: {}", e);
                }

                info!(
                    delivery_id = record.id,
                    endpoint_id = record.endpoint_id,
                    attempt = record.attempt_count,
                    status = response.status_code,
                    elapsed_ms = response.elapsed_ms,
                    "Webhook投递成功"
                );
                metrics::counter!("webhook_deliveries_total", "outcome" => DeliveryOutcome::Succeeded.as_label())
                    .increment(1);
                DeliveryOutcome::Succeeded
            }
            Err(e) => self.record_failure(record, &e.to_string(), completed_at).await,
        }
    }

    /// 订阅方返回失败后写回记录，并更新Endpoint的失败时间
    async fn record_failure(&self, record: &DeliveryRecord, message: &str, failed_at: DateTime<Utc>) -> DeliveryOutcome {
        let (outcome, written) = self.write_failure(record, message, failed_at).await;
        if let Err(e) = written {
            error!(delivery_id = record.id, "写入投递失败状态失败: {}", e);
        }
        self.touch_endpoint_failure(record.endpoint_id, failed_at).await;

        metrics::counter!("webhook_deliveries_total", "outcome" => outcome.as_label()).increment(1);
        outcome
    }

    /// 按重试策略对记录做守卫写入，返回结论和写入结果
    async fn write_failure(
        &self,
        record: &DeliveryRecord,
        message: &str,
        failed_at: DateTime<Utc>,
    ) -> (DeliveryOutcome, WebhookResult<DeliveryRecord>) {
        match self.retry_policy.decide(record.attempt_count, failed_at) {
            RetryDecision::RetryAt(next_retry_at) => {
                let written = self
                    .delivery_repository
                    .mark_retrying(record.id, next_retry_at, message)
                    .await;
                if written.is_ok() {
                    warn!(
                        delivery_id = record.id,
                        endpoint_id = record.endpoint_id,
                        attempt = record.attempt_count,
                        next_retry_at = %next_retry_at,
                        "Webhook投递失败，等待重试: {}",
                        message
                    );
                }
                (DeliveryOutcome::Retrying, written)
            }
            RetryDecision::DeadLetter => {
                let written = self
                    .delivery_repository
                    .mark_dead_lettered(record.id, message)
                    .await;
                if written.is_ok() {
                    warn!(
                        delivery_id = record.id,
                        endpoint_id = record.endpoint_id,
                        attempt = record.attempt_count,
                        "Webhook投递重试次数耗尽，进入死信: {}",
                        message
                    );
                }
                (DeliveryOutcome::DeadLettered, written)
            }
        }
    }

    async fn touch_endpoint_failure(&self, endpoint_id: i64, failed_at: DateTime<Utc>) {
        if let Err(e) = self
            .endpoint_repository
            .record_failure(endpoint_id, failed_at)
            .await
        {
            error!(endpoint_id = endpoint_id, "更新Endpoint失败时间失败: {}", e);
        }
    }
}
