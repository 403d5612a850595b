use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use webhook_domain::entities::{
    DeliveryFilter, DeliveryRecord, DeliveryStats, DeliveryStatus, SubjectRef,
};
use webhook_domain::repositories::DeliveryRecordRepository;
use webhook_errors::{WebhookError, WebhookResult};

const RECORD_COLUMNS: &str = "id, endpoint_id, subject_type, subject_id, payload, status, attempt_count, \
     last_attempt_at, next_retry_at, error_message, claimed_at, created_at";

/// PostgreSQL 投递记录仓储实现
pub struct PostgresDeliveryRecordRepository {
    pool: PgPool,
}

impl PostgresDeliveryRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> WebhookResult<DeliveryRecord> {
        Ok(DeliveryRecord {
            id: row.try_get("id")?,
            endpoint_id: row.try_get("endpoint_id")?,
            subject: SubjectRef {
                subject_type: row.try_get("subject_type")?,
                subject_id: row.try_get("subject_id")?,
            },
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            attempt_count: row.try_get("attempt_count")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
            next_retry_at: row.try_get("next_retry_at")?,
            error_message: row.try_get("error_message")?,
            claimed_at: row.try_get("claimed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn finish(
        &self,
        id: i64,
        status: DeliveryStatus,
        next_retry_at: Option<DateTime<Utc>>,
        error_message: Option<&str>,
    ) -> WebhookResult<DeliveryRecord> {
        let sql = format!(
            r#"
            UPDATE delivery_records
            SET status = $2, next_retry_at = $3, error_message = $4, claimed_at = NULL
            WHERE id = $1 AND status = $5
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(status)
            .bind(next_retry_at)
            .bind(error_message)
            .bind(DeliveryStatus::InFlight)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                debug!("投递记录 {} 状态更新为 {}", id, status);
                Self::row_to_record(&row)
            }
            None => match self.get_by_id(id).await? {
                Some(_) => Err(WebhookError::invalid_transition(id, DeliveryStatus::InFlight.as_str())),
                None => Err(WebhookError::delivery_not_found(id)),
            },
        }
    }
}

#[async_trait]
impl DeliveryRecordRepository for PostgresDeliveryRecordRepository {
    async fn create_all(&self, records: &[DeliveryRecord]) -> WebhookResult<Vec<DeliveryRecord>> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(records.len());

        for record in records {
            let row = sqlx::query(
                r#"
                INSERT INTO delivery_records
                    (endpoint_id, subject_type, subject_id, payload, status, attempt_count, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(record.endpoint_id)
            .bind(record.subject.subject_type)
            .bind(&record.subject.subject_id)
            .bind(&record.payload)
            .bind(record.status)
            .bind(record.attempt_count)
            .bind(record.created_at)
            .fetch_one(&mut *tx)
            .await?;

            let mut stored = record.clone();
            stored.id = row.try_get("id")?;
            created.push(stored);
        }

        tx.commit().await?;
        debug!("批量创建投递记录: {} 条", created.len());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> WebhookResult<Option<DeliveryRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM delivery_records WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list(&self, filter: &DeliveryFilter) -> WebhookResult<Vec<DeliveryRecord>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM delivery_records WHERE TRUE"));

        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(endpoint_id) = filter.endpoint_id {
            builder.push(" AND endpoint_id = ").push_bind(endpoint_id);
        }
        if let Some(subject_type) = filter.subject_type {
            builder.push(" AND subject_type = ").push_bind(subject_type);
        }
        if let Some(subject_id) = &filter.subject_id {
            builder.push(" AND subject_id = ").push_bind(subject_id.clone());
        }

        builder.push(" ORDER BY id DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }
        builder.push(" OFFSET ").push_bind(filter.offset.unwrap_or(0));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM delivery_records
            WHERE status IN ('PENDING', 'RETRYING')
              AND (next_retry_at IS NULL OR next_retry_at <= $1)
            ORDER BY created_at, id
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>> {
        // SKIP LOCKED 让并发认领跳过彼此已锁定的行
        let sql = format!(
            r#"
            WITH due AS (
                SELECT d.id FROM delivery_records d
                JOIN webhook_endpoints e ON e.id = d.endpoint_id
                WHERE d.status IN ('PENDING', 'RETRYING')
                  AND e.active
                  AND (d.next_retry_at IS NULL OR d.next_retry_at <= $1)
                ORDER BY d.created_at, d.id
                LIMIT $2
                FOR UPDATE OF d SKIP LOCKED
            )
            UPDATE delivery_records r
            SET status = 'IN_FLIGHT',
                attempt_count = r.attempt_count + 1,
                last_attempt_at = $1,
                claimed_at = $1
            FROM due
            WHERE r.id = due.id
            RETURNING {}
            "#,
            RECORD_COLUMNS
                .split(", ")
                .map(|column| format!("r.{}", column.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut claimed = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<WebhookResult<Vec<_>>>()?;
        claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(claimed)
    }

    async fn mark_succeeded(&self, id: i64) -> WebhookResult<DeliveryRecord> {
        self.finish(id, DeliveryStatus::Succeeded, None, None).await
    }

    async fn mark_retrying(
        &self,
        id: i64,
        next_retry_at: DateTime<Utc>,
        error_message: &str,
    ) -> WebhookResult<DeliveryRecord> {
        self.finish(id, DeliveryStatus::Retrying, Some(next_retry_at), Some(error_message))
            .await
    }

    async fn mark_dead_lettered(&self, id: i64, error_message: &str) -> WebhookResult<DeliveryRecord> {
        self.finish(id, DeliveryStatus::DeadLettered, None, Some(error_message))
            .await
    }

    async fn find_stale_claims(&self, cutoff: DateTime<Utc>, limit: i64) -> WebhookResult<Vec<DeliveryRecord>> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM delivery_records
            WHERE status = 'IN_FLIGHT'
              AND (claimed_at IS NULL OR claimed_at <= $1)
            ORDER BY claimed_at NULLS FIRST, id
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn status_counts(&self) -> WebhookResult<DeliveryStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM delivery_records GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = DeliveryStats::default();
        for row in rows {
            let status: DeliveryStatus = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            stats.add(status, count);
        }
        Ok(stats)
    }
}
