//! Mock implementations for the repository and port traits
//!
//! In-memory implementations usable in unit tests without a database
//! or a live subscriber. The delivery mock follows the same state
//! transition rules as the SQL repositories.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use webhook_domain::entities::{
    DeliveryFilter, DeliveryRecord, DeliveryStats, DeliveryStatus, Endpoint, EndpointFilter,
    EndpointScope, UnitId,
};
use webhook_domain::ports::{Clock, DeliveryResponse, WebhookSender};
use webhook_domain::repositories::{DeliveryRecordRepository, EndpointRepository};
use webhook_errors::{DeliveryError, WebhookError, WebhookResult};

/// Mock implementation of EndpointRepository for testing
#[derive(Debug, Clone)]
pub struct MockEndpointRepository {
    endpoints: Arc<Mutex<HashMap<i64, Endpoint>>>,
    next_id: Arc<Mutex<i64>>,
    fail_reads: Arc<AtomicBool>,
}

impl MockEndpointRepository {
    pub fn new() -> Self {
        Self {
            endpoints: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            fail_reads: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_endpoints(endpoints: Vec<Endpoint>) -> Self {
        let max_id = endpoints.iter().map(|e| e.id).max().unwrap_or(0);
        let map = endpoints.into_iter().map(|e| (e.id, e)).collect();

        Self {
            endpoints: Arc::new(Mutex::new(map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
            fail_reads: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 让 get_by_id 返回数据库错误
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }

    pub fn snapshot(&self, id: i64) -> Option<Endpoint> {
        self.endpoints.lock().unwrap().get(&id).cloned()
    }

    fn is_active(&self, id: i64) -> bool {
        self.endpoints
            .lock()
            .unwrap()
            .get(&id)
            .map(|e| e.active)
            .unwrap_or(false)
    }

    fn modify<F>(&self, id: i64, f: F) -> WebhookResult<Endpoint>
    where
        F: FnOnce(&mut Endpoint),
    {
        let mut endpoints = self.endpoints.lock().unwrap();
        let endpoint = endpoints
            .get_mut(&id)
            .ok_or_else(|| WebhookError::endpoint_not_found(id))?;
        f(endpoint);
        Ok(endpoint.clone())
    }
}

impl Default for MockEndpointRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointRepository for MockEndpointRepository {
    async fn create(&self, endpoint: &Endpoint) -> WebhookResult<Endpoint> {
        let mut endpoints = self.endpoints.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut created = endpoint.clone();
        created.id = *next_id;
        *next_id += 1;

        endpoints.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> WebhookResult<Option<Endpoint>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(WebhookError::database_error(format!("模拟读取失败: {id}")));
        }
        Ok(self.endpoints.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self, filter: &EndpointFilter) -> WebhookResult<Vec<Endpoint>> {
        let mut result: Vec<Endpoint> = self.endpoints.lock().unwrap().values().cloned().collect();

        if let Some(active) = filter.active {
            result.retain(|e| e.active == active);
        }
        if let Some(scope) = filter.scope {
            result.retain(|e| e.scope == scope);
        }

        result.sort_by_key(|e| e.id);
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(result.into_iter().skip(offset).take(limit).collect())
    }

    async fn update(&self, id: i64, url: &str, scope: EndpointScope) -> WebhookResult<Endpoint> {
        self.modify(id, |e| {
            e.url = url.to_string();
            e.scope = scope;
            e.updated_at = Utc::now();
        })
    }

    async fn set_active(&self, id: i64, active: bool) -> WebhookResult<Endpoint> {
        self.modify(id, |e| {
            e.active = active;
            e.updated_at = Utc::now();
        })
    }

    async fn find_active_for_unit(&self, unit_id: Option<UnitId>) -> WebhookResult<Vec<Endpoint>> {
        let mut result: Vec<Endpoint> = self
            .endpoints
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.accepts(unit_id))
            .cloned()
            .collect();
        result.sort_by_key(|e| e.id);
        Ok(result)
    }

    async fn record_success(&self, id: i64, at: DateTime<Utc>) -> WebhookResult<()> {
        self.modify(id, |e| e.last_success_at = Some(at)).map(|_| ())
    }

    async fn record_failure(&self, id: i64, at: DateTime<Utc>) -> WebhookResult<()> {
        self.modify(id, |e| e.last_failure_at = Some(at)).map(|_| ())
    }
}

/// Mock implementation of DeliveryRecordRepository for testing
///
/// When linked to a [`MockEndpointRepository`], claims skip records whose
/// endpoint is inactive, matching the SQL repositories.
#[derive(Debug, Clone)]
pub struct MockDeliveryRecordRepository {
    records: Arc<Mutex<HashMap<i64, DeliveryRecord>>>,
    next_id: Arc<Mutex<i64>>,
    endpoints: Option<MockEndpointRepository>,
    fail_claims: Arc<AtomicBool>,
    failing_writes: Arc<Mutex<HashSet<i64>>>,
}

impl MockDeliveryRecordRepository {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            endpoints: None,
            fail_claims: Arc::new(AtomicBool::new(false)),
            failing_writes: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn linked(endpoints: &MockEndpointRepository) -> Self {
        Self {
            endpoints: Some(endpoints.clone()),
            ..Self::new()
        }
    }

    /// 插入记录，保留其ID和全部字段
    pub fn insert(&self, record: DeliveryRecord) {
        let mut next_id = self.next_id.lock().unwrap();
        if record.id >= *next_id {
            *next_id = record.id + 1;
        }
        self.records.lock().unwrap().insert(record.id, record);
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn all_records(&self) -> Vec<DeliveryRecord> {
        let mut records: Vec<DeliveryRecord> = self.records.lock().unwrap().values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn snapshot(&self, id: i64) -> Option<DeliveryRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    /// 让 claim_due 返回数据库错误
    pub fn fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }

    /// 让指定记录的结果写入返回数据库错误
    pub fn fail_writes_for(&self, id: i64) {
        self.failing_writes.lock().unwrap().insert(id);
    }

    fn endpoint_active(&self, endpoint_id: i64) -> bool {
        self.endpoints
            .as_ref()
            .map(|endpoints| endpoints.is_active(endpoint_id))
            .unwrap_or(true)
    }

    fn select_due(&self, records: &HashMap<i64, DeliveryRecord>, now: DateTime<Utc>, limit: i64) -> Vec<i64> {
        let mut due: Vec<&DeliveryRecord> = records.values().filter(|r| r.is_due(now)).collect();
        due.sort_by_key(|r| (r.created_at, r.id));
        due.into_iter()
            .take(limit.max(0) as usize)
            .map(|r| r.id)
            .collect()
    }

    fn transition<F>(&self, id: i64, f: F) -> WebhookResult<DeliveryRecord>
    where
        F: FnOnce(&mut DeliveryRecord),
    {
        if self.failing_writes.lock().unwrap().contains(&id) {
            return Err(WebhookError::database_error(format!("模拟写入失败: {id}")));
        }

        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| WebhookError::delivery_not_found(id))?;
        if record.status != DeliveryStatus::InFlight {
            return Err(WebhookError::invalid_transition(id, DeliveryStatus::InFlight.as_str()));
        }
        f(record);
        record.claimed_at = None;
        Ok(record.clone())
    }
}

impl Default for MockDeliveryRecordRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryRecordRepository for MockDeliveryRecordRepository {
    async fn create_all(&self, records: &[DeliveryRecord]) -> WebhookResult<Vec<DeliveryRecord>> {
        let mut stored = self.records.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut created = Vec::with_capacity(records.len());
        for record in records {
            let mut record = record.clone();
            record.id = *next_id;
            *next_id += 1;
            stored.insert(record.id, record.clone());
            created.push(record);
        }
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> WebhookResult<Option<DeliveryRecord>> {
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self, filter: &DeliveryFilter) -> WebhookResult<Vec<DeliveryRecord>> {
        let mut result = self.all_records();

        if let Some(status) = filter.status {
            result.retain(|r| r.status == status);
        }
        if let Some(endpoint_id) = filter.endpoint_id {
            result.retain(|r| r.endpoint_id == endpoint_id);
        }
        if let Some(subject_type) = filter.subject_type {
            result.retain(|r| r.subject.subject_type == subject_type);
        }
        if let Some(subject_id) = &filter.subject_id {
            result.retain(|r| &r.subject.subject_id == subject_id);
        }

        result.reverse();
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(result.into_iter().skip(offset).take(limit).collect())
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>> {
        let records = self.records.lock().unwrap();
        let ids = self.select_due(&records, now, limit);
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>> {
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(WebhookError::database_error("模拟认领失败"));
        }

        let mut records = self.records.lock().unwrap();
        let mut candidates: Vec<&DeliveryRecord> = records
            .values()
            .filter(|r| r.is_due(now) && self.endpoint_active(r.endpoint_id))
            .collect();
        candidates.sort_by_key(|r| (r.created_at, r.id));
        let ids: Vec<i64> = candidates
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|r| r.id)
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = records.get_mut(&id) {
                record.status = DeliveryStatus::InFlight;
                record.attempt_count += 1;
                record.last_attempt_at = Some(now);
                record.claimed_at = Some(now);
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_succeeded(&self, id: i64) -> WebhookResult<DeliveryRecord> {
        self.transition(id, |r| {
            r.status = DeliveryStatus::Succeeded;
            r.next_retry_at = None;
            r.error_message = None;
        })
    }

    async fn mark_retrying(
        &self,
        id: i64,
        next_retry_at: DateTime<Utc>,
        error_message: &str,
    ) -> WebhookResult<DeliveryRecord> {
        self.transition(id, |r| {
            r.status = DeliveryStatus::Retrying;
            r.next_retry_at = Some(next_retry_at);
            r.error_message = Some(error_message.to_string());
        })
    }

    async fn mark_dead_lettered(&self, id: i64, error_message: &str) -> WebhookResult<DeliveryRecord> {
        self.transition(id, |r| {
            r.status = DeliveryStatus::DeadLettered;
            r.next_retry_at = None;
            r.error_message = Some(error_message.to_string());
        })
    }

    async fn find_stale_claims(&self, cutoff: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>> {
        let mut stale: Vec<DeliveryRecord> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.status == DeliveryStatus::InFlight && r.claimed_at.map(|at| at <= cutoff).unwrap_or(true)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|r| (r.claimed_at, r.id));
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn status_counts(&self) -> WebhookResult<DeliveryStats> {
        let mut stats = DeliveryStats::default();
        for record in self.records.lock().unwrap().values() {
            stats.add(record.status, 1);
        }
        Ok(stats)
    }
}

/// 发送器收到的一次请求
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub url: String,
    pub delivery_id: i64,
    pub attempt: i32,
    pub payload: serde_json::Value,
}

/// Scripted WebhookSender
///
/// 每个URL可以排队若干个结果，队列耗尽后使用该URL的默认结果，
/// 再退回到全局默认状态码。
#[derive(Debug, Clone)]
pub struct MockWebhookSender {
    default_status: u16,
    per_url: Arc<Mutex<HashMap<String, Result<u16, DeliveryError>>>>,
    queued: Arc<Mutex<HashMap<String, VecDeque<Result<u16, DeliveryError>>>>>,
    calls: Arc<Mutex<Vec<SentRequest>>>,
    delay: Arc<Mutex<Option<std::time::Duration>>>,
}

impl MockWebhookSender {
    pub fn always(status: u16) -> Self {
        Self {
            default_status: status,
            per_url: Arc::new(Mutex::new(HashMap::new())),
            queued: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    /// 每次发送前先等待，模拟慢速订阅方
    pub fn with_delay(&self, delay: std::time::Duration) -> &Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn respond(&self, url: &str, outcome: Result<u16, DeliveryError>) -> &Self {
        self.per_url.lock().unwrap().insert(url.to_string(), outcome);
        self
    }

    pub fn enqueue(&self, url: &str, outcome: Result<u16, DeliveryError>) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn calls(&self) -> Vec<SentRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, delivery_id: i64) -> Vec<SentRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.delivery_id == delivery_id)
            .collect()
    }

    fn next_outcome(&self, url: &str) -> Result<u16, DeliveryError> {
        if let Some(outcome) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
        {
            return outcome;
        }
        self.per_url
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Ok(self.default_status))
    }
}

impl Default for MockWebhookSender {
    fn default() -> Self {
        Self::always(200)
    }
}

#[async_trait]
impl WebhookSender for MockWebhookSender {
    async fn send(&self, url: &str, record: &DeliveryRecord) -> Result<DeliveryResponse, DeliveryError> {
        self.calls.lock().unwrap().push(SentRequest {
            url: url.to_string(),
            delivery_id: record.id,
            attempt: record.attempt_count,
            payload: record.payload.clone(),
        });

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_outcome(url)? {
            status if (200..300).contains(&status) => Ok(DeliveryResponse {
                status_code: status,
                elapsed_ms: 1,
            }),
            status => Err(DeliveryError::Status {
                status,
                body: String::new(),
            }),
        }
    }
}

/// 可手动推进的时钟
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
