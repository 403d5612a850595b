//! 投递端口: 出站HTTP发送和时钟
//!
//! 分发器只依赖这些trait，具体实现位于基础设施层。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use webhook_errors::DeliveryError;

use crate::entities::DeliveryRecord;

/// 订阅方返回的2xx响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status_code: u16,
    pub elapsed_ms: u64,
}

/// 出站Webhook发送器
///
/// 实现必须对每次调用施加超时；非2xx响应返回 `DeliveryError::Status`。
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, record: &DeliveryRecord) -> Result<DeliveryResponse, DeliveryError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
