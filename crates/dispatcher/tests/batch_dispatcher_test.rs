use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use webhook_domain::entities::{
    DeliveryFilter, DeliveryRecord, DeliveryStats, DeliveryStatus, Endpoint,
};
use webhook_domain::repositories::DeliveryRecordRepository;
use webhook_errors::{DeliveryError, WebhookError, WebhookResult};
use webhook_testing_utils::{
    DeliveryRecordBuilder, EndpointBuilder, FixedClock, MockDeliveryRecordRepository,
    MockEndpointRepository, MockWebhookSender,
};

use webhook_dispatcher::batch_dispatcher::{BatchDispatcher, DispatchSettings, DispatchSummary};

const HOOK_A: &str = "https://a.example.com/hook";
const HOOK_B: &str = "https://b.example.com/hook";

struct Harness {
    dispatcher: BatchDispatcher,
    endpoints: MockEndpointRepository,
    deliveries: MockDeliveryRecordRepository,
    sender: MockWebhookSender,
    clock: FixedClock,
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

fn harness(endpoints: Vec<Endpoint>, settings: DispatchSettings) -> Harness {
    let endpoints = MockEndpointRepository::with_endpoints(endpoints);
    let deliveries = MockDeliveryRecordRepository::linked(&endpoints);
    build(endpoints, deliveries, settings)
}

fn build(
    endpoints: MockEndpointRepository,
    deliveries: MockDeliveryRecordRepository,
    settings: DispatchSettings,
) -> Harness {
    let sender = MockWebhookSender::default();
    let clock = FixedClock::new(start_time());
    let dispatcher = BatchDispatcher::new(
        Arc::new(endpoints.clone()),
        Arc::new(deliveries.clone()),
        Arc::new(sender.clone()),
        Arc::new(clock.clone()),
        settings,
    );
    Harness {
        dispatcher,
        endpoints,
        deliveries,
        sender,
        clock,
    }
}

impl Harness {
    fn clock_now(&self) -> DateTime<Utc> {
        use webhook_domain::ports::Clock;
        self.clock.now()
    }
}

fn endpoint(id: i64, url: &str) -> Endpoint {
    EndpointBuilder::new().with_id(id).with_url(url).build()
}

#[tokio::test]
async fn test_failed_delivery_schedules_first_retry() {
    let h = harness(vec![endpoint(1, HOOK_A)], DispatchSettings::default());
    h.sender.respond(HOOK_A, Ok(500));
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(1).build());

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 1);
    assert_eq!(summary.failure_count, 1);
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.dead_lettered_count, 0);

    let record = h.deliveries.snapshot(1).unwrap();
    assert_eq!(record.status, DeliveryStatus::Retrying);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.last_attempt_at, Some(start_time()));
    assert_eq!(record.next_retry_at, Some(start_time() + Duration::hours(1)));
    assert!(record.error_message.unwrap().contains("500"));
    assert!(record.claimed_at.is_none());

    let endpoint = h.endpoints.snapshot(1).unwrap();
    assert_eq!(endpoint.last_failure_at, Some(start_time()));
    assert!(endpoint.last_success_at.is_none());
}

#[tokio::test]
async fn test_successful_delivery_is_terminal() {
    let h = harness(vec![endpoint(1, HOOK_A)], DispatchSettings::default());
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(1).build());

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.success_count, 1);

    let record = h.deliveries.snapshot(1).unwrap();
    assert_eq!(record.status, DeliveryStatus::Succeeded);
    assert_eq!(record.attempt_count, 1);
    assert!(record.next_retry_at.is_none());
    assert_eq!(h.endpoints.snapshot(1).unwrap().last_success_at, Some(start_time()));

    h.clock.advance(Duration::days(3));
    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary, DispatchSummary::default());
    assert_eq!(h.sender.call_count(), 1);
}

#[tokio::test]
async fn test_retry_schedule_until_dead_letter() {
    let h = harness(vec![endpoint(1, HOOK_A)], DispatchSettings::default());
    h.sender.respond(HOOK_A, Ok(503));
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(1).build());

    h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(
        h.deliveries.snapshot(1).unwrap().next_retry_at,
        Some(start_time() + Duration::hours(1))
    );

    // 重试时间未到，不会被再次认领
    h.clock.advance(Duration::minutes(59));
    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 0);

    h.clock.advance(Duration::minutes(1));
    h.dispatcher.dispatch_batch().await.unwrap();
    let record = h.deliveries.snapshot(1).unwrap();
    assert_eq!(record.status, DeliveryStatus::Retrying);
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.next_retry_at, Some(h.clock_now() + Duration::hours(6)));

    h.clock.advance(Duration::hours(6));
    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.dead_lettered_count, 1);
    assert_eq!(summary.failure_count, 1);

    let record = h.deliveries.snapshot(1).unwrap();
    assert_eq!(record.status, DeliveryStatus::DeadLettered);
    assert_eq!(record.attempt_count, 3);
    assert!(record.next_retry_at.is_none());
    assert!(record.error_message.is_some());

    let attempts: Vec<i32> = h.sender.calls_for(1).iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    h.clock.advance(Duration::days(7));
    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 0);
    assert_eq!(h.sender.call_count(), 3);
}

#[tokio::test]
async fn test_single_attempt_budget_dead_letters_immediately() {
    let settings = DispatchSettings {
        max_attempts: 1,
        ..Default::default()
    };
    let h = harness(vec![endpoint(1, HOOK_A)], settings);
    h.sender.respond(HOOK_A, Ok(400));
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(1).build());

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.dead_lettered_count, 1);
    assert_eq!(h.deliveries.snapshot(1).unwrap().status, DeliveryStatus::DeadLettered);
}

#[tokio::test]
async fn test_failures_are_isolated_per_record() {
    let h = harness(
        vec![endpoint(1, HOOK_A), endpoint(2, HOOK_B)],
        DispatchSettings::default(),
    );
    h.sender.respond(HOOK_A, Ok(500));
    h.sender.respond(HOOK_B, Ok(204));
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(1).build());
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(2).with_endpoint(2).build());

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 2);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);

    assert_eq!(h.deliveries.snapshot(1).unwrap().status, DeliveryStatus::Retrying);
    assert_eq!(h.deliveries.snapshot(2).unwrap().status, DeliveryStatus::Succeeded);

    let a = h.endpoints.snapshot(1).unwrap();
    let b = h.endpoints.snapshot(2).unwrap();
    assert!(a.last_failure_at.is_some() && a.last_success_at.is_none());
    assert!(b.last_success_at.is_some() && b.last_failure_at.is_none());
}

#[tokio::test]
async fn test_transport_errors_are_recorded() {
    let h = harness(
        vec![endpoint(1, HOOK_A), endpoint(2, HOOK_B)],
        DispatchSettings::default(),
    );
    h.sender
        .respond(HOOK_A, Err(DeliveryError::Timeout(std::time::Duration::from_secs(10))));
    h.sender
        .respond(HOOK_B, Err(DeliveryError::Connection("connection refused".to_string())));
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(1).build());
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(2).with_endpoint(2).build());

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.failure_count, 2);

    let timed_out = h.deliveries.snapshot(1).unwrap();
    assert_eq!(timed_out.status, DeliveryStatus::Retrying);
    assert!(timed_out.error_message.unwrap().contains("超时"));

    let refused = h.deliveries.snapshot(2).unwrap();
    assert!(refused.error_message.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_claim_failure_fails_invocation() {
    let h = harness(vec![endpoint(1, HOOK_A)], DispatchSettings::default());
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(1).build());
    h.deliveries.fail_claims(true);

    let result = h.dispatcher.dispatch_batch().await;
    assert!(matches!(result, Err(WebhookError::DatabaseOperation(_))));
    assert_eq!(h.sender.call_count(), 0);
    assert_eq!(h.deliveries.snapshot(1).unwrap().status, DeliveryStatus::Pending);
}

#[tokio::test]
async fn test_store_write_failure_does_not_abort_siblings() {
    let h = harness(vec![endpoint(1, HOOK_A)], DispatchSettings::default());
    for id in 1..=3 {
        h.deliveries
            .insert(DeliveryRecordBuilder::new().with_id(id).with_endpoint(1).build());
    }
    h.deliveries.fail_writes_for(2);

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 3);
    assert_eq!(summary.success_count, 3);

    assert_eq!(h.deliveries.snapshot(1).unwrap().status, DeliveryStatus::Succeeded);
    assert_eq!(h.deliveries.snapshot(2).unwrap().status, DeliveryStatus::InFlight);
    assert_eq!(h.deliveries.snapshot(3).unwrap().status, DeliveryStatus::Succeeded);
}

#[tokio::test]
async fn test_batch_size_caps_and_orders_claims() {
    let settings = DispatchSettings {
        batch_size: 2,
        ..Default::default()
    };
    let h = harness(vec![endpoint(1, HOOK_A)], settings);
    for (id, minutes_ago) in [(1, 10), (2, 30), (3, 20), (4, 40), (5, 5)] {
        h.deliveries.insert(
            DeliveryRecordBuilder::new()
                .with_id(id)
                .with_endpoint(1)
                .with_created_at(start_time() - Duration::minutes(minutes_ago))
                .build(),
        );
    }

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 2);

    let mut sent: Vec<i64> = h.sender.calls().iter().map(|c| c.delivery_id).collect();
    sent.sort();
    assert_eq!(sent, vec![2, 4]);

    let pending = h
        .deliveries
        .all_records()
        .iter()
        .filter(|r| r.status == DeliveryStatus::Pending)
        .count();
    assert_eq!(pending, 3);
}

#[tokio::test]
async fn test_inactive_endpoint_records_stay_pending() {
    let h = harness(
        vec![
            endpoint(1, HOOK_A),
            EndpointBuilder::new().with_id(2).with_url(HOOK_B).inactive().build(),
        ],
        DispatchSettings::default(),
    );
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(2).build());

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 0);
    assert_eq!(h.sender.call_count(), 0);

    let record = h.deliveries.snapshot(1).unwrap();
    assert_eq!(record.status, DeliveryStatus::Pending);
    assert_eq!(record.attempt_count, 0);
}

#[tokio::test]
async fn test_missing_endpoint_counts_as_failure() {
    let h = build(
        MockEndpointRepository::new(),
        MockDeliveryRecordRepository::new(),
        DispatchSettings::default(),
    );
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(99).build());

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.failure_count, 1);
    assert_eq!(h.sender.call_count(), 0);

    let record = h.deliveries.snapshot(1).unwrap();
    assert_eq!(record.status, DeliveryStatus::Retrying);
    assert!(record.error_message.unwrap().contains("99"));
}

#[tokio::test]
async fn test_stale_claims_are_recovered_as_failed_attempts() {
    let h = harness(vec![endpoint(1, HOOK_A)], DispatchSettings::default());
    h.deliveries.insert(
        DeliveryRecordBuilder::new()
            .with_id(1)
            .with_endpoint(1)
            .with_attempt_count(1)
            .claimed_at(start_time() - Duration::minutes(10))
            .build(),
    );
    // 仍在租约内的认领不受影响
    h.deliveries.insert(
        DeliveryRecordBuilder::new()
            .with_id(2)
            .with_endpoint(1)
            .with_attempt_count(1)
            .claimed_at(start_time() - Duration::seconds(30))
            .build(),
    );

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.recovered_count, 1);
    assert_eq!(summary.processed_count, 0);
    assert_eq!(h.sender.call_count(), 0);

    let recovered = h.deliveries.snapshot(1).unwrap();
    assert_eq!(recovered.status, DeliveryStatus::Retrying);
    assert_eq!(recovered.attempt_count, 1);
    assert_eq!(recovered.next_retry_at, Some(start_time() + Duration::hours(1)));
    assert!(recovered.error_message.unwrap().contains("租约"));

    assert_eq!(h.deliveries.snapshot(2).unwrap().status, DeliveryStatus::InFlight);
}

/// 返回固定的过期认领快照，模拟另一调用在本次读取之后已经完成恢复
struct StaleSnapshotRepository {
    inner: MockDeliveryRecordRepository,
    snapshot: Vec<DeliveryRecord>,
}

#[async_trait]
impl DeliveryRecordRepository for StaleSnapshotRepository {
    async fn create_all(&self, records: &[DeliveryRecord]) -> WebhookResult<Vec<DeliveryRecord>> {
        self.inner.create_all(records).await
    }

    async fn get_by_id(&self, id: i64) -> WebhookResult<Option<DeliveryRecord>> {
        self.inner.get_by_id(id).await
    }

    async fn list(&self, filter: &DeliveryFilter) -> WebhookResult<Vec<DeliveryRecord>> {
        self.inner.list(filter).await
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>> {
        self.inner.fetch_due(now, limit).await
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>> {
        self.inner.claim_due(now, limit).await
    }

    async fn mark_succeeded(&self, id: i64) -> WebhookResult<DeliveryRecord> {
        self.inner.mark_succeeded(id).await
    }

    async fn mark_retrying(
        &self,
        id: i64,
        next_retry_at: DateTime<Utc>,
        error_message: &str,
    ) -> WebhookResult<DeliveryRecord> {
        self.inner.mark_retrying(id, next_retry_at, error_message).await
    }

    async fn mark_dead_lettered(&self, id: i64, error_message: &str) -> WebhookResult<DeliveryRecord> {
        self.inner.mark_dead_lettered(id, error_message).await
    }

    async fn find_stale_claims(&self, _cutoff: DateTime<Utc>, _limit: i64) -> WebhookResult<Vec<DeliveryRecord>> {
        Ok(self.snapshot.clone())
    }

    async fn status_counts(&self) -> WebhookResult<DeliveryStats> {
        self.inner.status_counts().await
    }
}

#[tokio::test]
async fn test_stale_claim_recovered_once_across_overlapping_invocations() {
    let h = harness(vec![endpoint(1, HOOK_A)], DispatchSettings::default());
    h.deliveries.insert(
        DeliveryRecordBuilder::new()
            .with_id(1)
            .with_endpoint(1)
            .with_attempt_count(1)
            .claimed_at(start_time() - Duration::minutes(10))
            .build(),
    );
    let stale_snapshot = vec![h.deliveries.snapshot(1).unwrap()];

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.recovered_count, 1);
    assert_eq!(
        h.endpoints.snapshot(1).unwrap().last_failure_at,
        Some(start_time())
    );

    // 第二个调用读到的是恢复之前的快照
    let later = FixedClock::new(start_time() + Duration::minutes(1));
    let overlapping = BatchDispatcher::new(
        Arc::new(h.endpoints.clone()),
        Arc::new(StaleSnapshotRepository {
            inner: h.deliveries.clone(),
            snapshot: stale_snapshot,
        }),
        Arc::new(h.sender.clone()),
        Arc::new(later),
        DispatchSettings::default(),
    );

    let summary = overlapping.dispatch_batch().await.unwrap();
    assert_eq!(summary.recovered_count, 0);
    assert_eq!(summary.processed_count, 0);

    let record = h.deliveries.snapshot(1).unwrap();
    assert_eq!(record.status, DeliveryStatus::Retrying);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.next_retry_at, Some(start_time() + Duration::hours(1)));
    assert_eq!(
        h.endpoints.snapshot(1).unwrap().last_failure_at,
        Some(start_time())
    );
}

#[tokio::test]
async fn test_endpoint_load_failure_leaves_claim_for_recovery() {
    let h = harness(vec![endpoint(1, HOOK_A)], DispatchSettings::default());
    h.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(1).build());
    h.endpoints.fail_reads(true);

    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 1);
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(h.sender.call_count(), 0);

    let record = h.deliveries.snapshot(1).unwrap();
    assert_eq!(record.status, DeliveryStatus::InFlight);
    assert_eq!(record.attempt_count, 1);
    assert!(record.error_message.is_none());
    assert_eq!(h.endpoints.snapshot(1).unwrap().last_failure_at, None);

    // 租约过期后由恢复流程按一次失败处理
    h.endpoints.fail_reads(false);
    h.clock.advance(Duration::hours(1));
    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.recovered_count, 1);
    assert_eq!(h.deliveries.snapshot(1).unwrap().status, DeliveryStatus::Retrying);
}

#[tokio::test]
async fn test_stale_claim_on_last_attempt_is_dead_lettered() {
    let h = harness(vec![endpoint(1, HOOK_A)], DispatchSettings::default());
    h.deliveries.insert(
        DeliveryRecordBuilder::new()
            .with_id(1)
            .with_endpoint(1)
            .with_attempt_count(3)
            .claimed_at(start_time() - Duration::hours(1))
            .build(),
    );

    h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(h.deliveries.snapshot(1).unwrap().status, DeliveryStatus::DeadLettered);
}

#[tokio::test]
async fn test_empty_batch() {
    let h = harness(vec![endpoint(1, HOOK_A)], DispatchSettings::default());
    let summary = h.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary, DispatchSummary::default());
}

#[test]
fn test_summary_serializes_camel_case() {
    let summary = DispatchSummary {
        processed_count: 3,
        success_count: 2,
        failure_count: 1,
        dead_lettered_count: 0,
        recovered_count: 0,
    };
    let json = serde_json::to_value(summary).unwrap();
    assert_eq!(json["processedCount"], 3);
    assert_eq!(json["successCount"], 2);
    assert_eq!(json["failureCount"], 1);
    assert_eq!(json["deadLetteredCount"], 0);
}
