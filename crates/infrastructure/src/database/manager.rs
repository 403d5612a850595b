use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{debug, info};
use webhook_config::DatabaseConfig;
use webhook_domain::repositories::{DeliveryRecordRepository, EndpointRepository};
use webhook_errors::{WebhookError, WebhookResult};

use super::migrations::{POSTGRES_MIGRATIONS, SQLITE_MIGRATIONS};
use super::postgres::{PostgresDeliveryRecordRepository, PostgresEndpointRepository};
use super::sqlite::{SqliteDeliveryRecordRepository, SqliteEndpointRepository};

/// Database type detection
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else {
            DatabaseType::SQLite
        }
    }
}

/// Database connection pool enum
#[derive(Clone)]
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    pub async fn connect(config: &DatabaseConfig) -> WebhookResult<Self> {
        match DatabaseType::from_url(&config.url) {
            DatabaseType::PostgreSQL => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                    .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                    .max_lifetime(Duration::from_secs(1800)) // 30分钟默认生命周期
                    .connect(&config.url)
                    .await?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&config.url)?
                    .create_if_missing(true)
                    .foreign_keys(true);

                let pool = if is_memory_url(&config.url) {
                    // 内存库按连接隔离，只能使用单连接且不能回收
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                        .connect_with(options)
                        .await?
                } else {
                    if let Some(parent) = sqlite_file_path(&config.url).and_then(|p| p.parent().map(PathBuf::from)) {
                        if !parent.as_os_str().is_empty() {
                            std::fs::create_dir_all(&parent).map_err(|e| {
                                WebhookError::database_error(format!(
                                    "创建数据库目录失败 {}: {e}",
                                    parent.display()
                                ))
                            })?;
                        }
                    }
                    SqlitePoolOptions::new()
                        .max_connections(config.max_connections)
                        .min_connections(config.min_connections)
                        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                        .connect_with(options)
                        .await?
                };
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn health_check(&self) -> WebhookResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// Unified database manager
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> WebhookResult<Self> {
        info!("连接数据库: {}", mask_database_url(&config.url));
        let pool = DatabasePool::connect(config).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    /// 运行建表语句
    pub async fn migrate(&self) -> WebhookResult<()> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                info!("运行PostgreSQL数据库迁移");
                for (name, sql) in POSTGRES_MIGRATIONS {
                    debug!("{}", name);
                    sqlx::query(sql).execute(pool).await.map_err(|e| {
                        WebhookError::database_error(format!("{name}失败: {e}"))
                    })?;
                }
            }
            DatabasePool::SQLite(pool) => {
                info!("运行SQLite数据库迁移");
                for (name, sql) in SQLITE_MIGRATIONS {
                    debug!("{}", name);
                    sqlx::query(sql).execute(pool).await.map_err(|e| {
                        WebhookError::database_error(format!("{name}失败: {e}"))
                    })?;
                }
            }
        }
        Ok(())
    }

    pub async fn health_check(&self) -> WebhookResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn endpoint_repository(&self) -> Arc<dyn EndpointRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresEndpointRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteEndpointRepository::new(pool.clone())),
        }
    }

    pub fn delivery_repository(&self) -> Arc<dyn DeliveryRecordRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresDeliveryRecordRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteDeliveryRecordRepository::new(pool.clone())),
        }
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || is_memory_url(path) {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// 屏蔽数据库URL中的密码
pub fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}
