use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("Endpoint未找到: {id}")]
    EndpointNotFound { id: i64 },
    #[error("投递记录未找到: {id}")]
    DeliveryNotFound { id: i64 },
    #[error("投递记录 {id} 状态转换无效: 期望 {expected}")]
    InvalidStateTransition { id: i64, expected: String },
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type WebhookResult<T> = Result<T, WebhookError>;

impl WebhookError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn endpoint_not_found(id: i64) -> Self {
        Self::EndpointNotFound { id }
    }
    pub fn delivery_not_found(id: i64) -> Self {
        Self::DeliveryNotFound { id }
    }
    pub fn invalid_transition<S: Into<String>>(id: i64, expected: S) -> Self {
        Self::InvalidStateTransition {
            id,
            expected: expected.into(),
        }
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    /// 存储层错误：投递失败时只记录日志，不中断同批次的其他记录
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            WebhookError::Database(_)
                | WebhookError::DatabaseOperation(_)
                | WebhookError::InvalidStateTransition { .. }
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::DatabaseOperation(_) | WebhookError::Network(_) | WebhookError::Timeout(_)
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            WebhookError::EndpointNotFound { .. } => "请求的Endpoint不存在",
            WebhookError::DeliveryNotFound { .. } => "请求的投递记录不存在",
            WebhookError::ValidationError(_) => "输入数据验证失败",
            WebhookError::InvalidStateTransition { .. } => "投递记录状态已变化",
            WebhookError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for WebhookError {
    fn from(err: anyhow::Error) -> Self {
        WebhookError::Internal(err.to_string())
    }
}

/// 单次出站投递失败（非2xx、超时、连接失败），按固定重试表重试
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("订阅方返回非2xx状态: {status}, 响应: {body}")]
    Status { status: u16, body: String },
    #[error("请求超时: {0:?}")]
    Timeout(Duration),
    #[error("连接失败: {0}")]
    Connection(String),
    #[error("请求失败: {0}")]
    Request(String),
}

impl DeliveryError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DeliveryError::Timeout(_))
    }
}
