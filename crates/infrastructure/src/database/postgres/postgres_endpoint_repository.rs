use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use webhook_domain::entities::{Endpoint, EndpointFilter, EndpointScope, UnitId};
use webhook_domain::repositories::EndpointRepository;
use webhook_errors::{WebhookError, WebhookResult};

const ENDPOINT_COLUMNS: &str =
    "id, url, unit_id, active, last_success_at, last_failure_at, created_at, updated_at";

/// PostgreSQL Endpoint仓储实现
pub struct PostgresEndpointRepository {
    pool: PgPool,
}

impl PostgresEndpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_endpoint(row: &sqlx::postgres::PgRow) -> WebhookResult<Endpoint> {
        Ok(Endpoint {
            id: row.try_get("id")?,
            url: row.try_get("url")?,
            scope: EndpointScope::from_unit_id(row.try_get("unit_id")?),
            active: row.try_get("active")?,
            last_success_at: row.try_get("last_success_at")?,
            last_failure_at: row.try_get("last_failure_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn touch_health(&self, id: i64, column: &str, at: DateTime<Utc>) -> WebhookResult<()> {
        let sql = format!("UPDATE webhook_endpoints SET {column} = $2 WHERE id = $1");
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(WebhookError::endpoint_not_found(id));
        }
        Ok(())
    }
}

#[async_trait]
impl EndpointRepository for PostgresEndpointRepository {
    async fn create(&self, endpoint: &Endpoint) -> WebhookResult<Endpoint> {
        let row = sqlx::query(
            r#"
            INSERT INTO webhook_endpoints (url, unit_id, active, last_success_at, last_failure_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&endpoint.url)
        .bind(endpoint.scope.unit_id())
        .bind(endpoint.active)
        .bind(endpoint.last_success_at)
        .bind(endpoint.last_failure_at)
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .fetch_one(&self.pool)
        .await?;

        let mut created = endpoint.clone();
        created.id = row.try_get("id")?;
        debug!("创建Endpoint成功: {}", created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> WebhookResult<Option<Endpoint>> {
        let sql = format!("SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_endpoint).transpose()
    }

    async fn list(&self, filter: &EndpointFilter) -> WebhookResult<Vec<Endpoint>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE TRUE"
        ));

        if let Some(active) = filter.active {
            builder.push(" AND active = ").push_bind(active);
        }
        match filter.scope {
            Some(EndpointScope::Global) => {
                builder.push(" AND unit_id IS NULL");
            }
            Some(EndpointScope::Unit { unit_id }) => {
                builder.push(" AND unit_id = ").push_bind(unit_id);
            }
            None => {}
        }

        builder.push(" ORDER BY id");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }
        builder.push(" OFFSET ").push_bind(filter.offset.unwrap_or(0));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_endpoint).collect()
    }

    async fn update(&self, id: i64, url: &str, scope: EndpointScope) -> WebhookResult<Endpoint> {
        let sql = format!(
            "UPDATE webhook_endpoints SET url = $2, unit_id = $3, updated_at = NOW() WHERE id = $1 RETURNING {ENDPOINT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(url)
            .bind(scope.unit_id())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| WebhookError::endpoint_not_found(id))?;

        debug!("更新Endpoint成功: {}", id);
        Self::row_to_endpoint(&row)
    }

    async fn set_active(&self, id: i64, active: bool) -> WebhookResult<Endpoint> {
        let sql = format!(
            "UPDATE webhook_endpoints SET active = $2, updated_at = NOW() WHERE id = $1 RETURNING {ENDPOINT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(active)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| WebhookError::endpoint_not_found(id))?;

        Self::row_to_endpoint(&row)
    }

    async fn find_active_for_unit(&self, unit_id: Option<UnitId>) -> WebhookResult<Vec<Endpoint>> {
        let sql = format!(
            "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE active AND (unit_id IS NULL OR unit_id = $1) ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_endpoint).collect()
    }

    async fn record_success(&self, id: i64, at: DateTime<Utc>) -> WebhookResult<()> {
        self.touch_health(id, "last_success_at", at).await
    }

    async fn record_failure(&self, id: i64, at: DateTime<Utc>) -> WebhookResult<()> {
        self.touch_health(id, "last_failure_at", at).await
    }
}
