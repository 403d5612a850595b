//! 建表语句
//!
//! 启动时按顺序执行，全部幂等。

pub const SQLITE_MIGRATIONS: &[(&str, &str)] = &[
    (
        "创建Endpoint表",
        r#"
        CREATE TABLE IF NOT EXISTS webhook_endpoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL,
            unit_id INTEGER,
            active BOOLEAN NOT NULL DEFAULT 1,
            last_success_at DATETIME,
            last_failure_at DATETIME,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "创建投递记录表",
        r#"
        CREATE TABLE IF NOT EXISTS delivery_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            endpoint_id INTEGER NOT NULL,
            subject_type TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_attempt_at DATETIME,
            next_retry_at DATETIME,
            error_message TEXT,
            claimed_at DATETIME,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (endpoint_id) REFERENCES webhook_endpoints (id)
        )
        "#,
    ),
    (
        "创建Endpoint索引",
        "CREATE INDEX IF NOT EXISTS idx_webhook_endpoints_active_unit ON webhook_endpoints (active, unit_id)",
    ),
    (
        "创建到期查询索引",
        "CREATE INDEX IF NOT EXISTS idx_delivery_records_status_retry ON delivery_records (status, next_retry_at)",
    ),
    (
        "创建Endpoint外键索引",
        "CREATE INDEX IF NOT EXISTS idx_delivery_records_endpoint ON delivery_records (endpoint_id)",
    ),
    (
        "创建主体索引",
        "CREATE INDEX IF NOT EXISTS idx_delivery_records_subject ON delivery_records (subject_type, subject_id)",
    ),
];

pub const POSTGRES_MIGRATIONS: &[(&str, &str)] = &[
    (
        "创建Endpoint表",
        r#"
        CREATE TABLE IF NOT EXISTS webhook_endpoints (
            id BIGSERIAL PRIMARY KEY,
            url TEXT NOT NULL,
            unit_id BIGINT,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            last_success_at TIMESTAMPTZ,
            last_failure_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "创建投递记录表",
        r#"
        CREATE TABLE IF NOT EXISTS delivery_records (
            id BIGSERIAL PRIMARY KEY,
            endpoint_id BIGINT NOT NULL REFERENCES webhook_endpoints (id),
            subject_type VARCHAR(32) NOT NULL,
            subject_id VARCHAR(255) NOT NULL,
            payload JSONB NOT NULL,
            status VARCHAR(32) NOT NULL DEFAULT 'PENDING',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TIMESTAMPTZ,
            next_retry_at TIMESTAMPTZ,
            error_message TEXT,
            claimed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "创建Endpoint索引",
        "CREATE INDEX IF NOT EXISTS idx_webhook_endpoints_active_unit ON webhook_endpoints (active, unit_id)",
    ),
    (
        "创建到期查询索引",
        "CREATE INDEX IF NOT EXISTS idx_delivery_records_due ON delivery_records (created_at, id) WHERE status IN ('PENDING', 'RETRYING')",
    ),
    (
        "创建Endpoint外键索引",
        "CREATE INDEX IF NOT EXISTS idx_delivery_records_endpoint ON delivery_records (endpoint_id)",
    ),
    (
        "创建主体索引",
        "CREATE INDEX IF NOT EXISTS idx_delivery_records_subject ON delivery_records (subject_type, subject_id)",
    ),
];
