use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::{debug, warn};
use webhook_config::DispatcherConfig;
use webhook_domain::entities::DeliveryRecord;
use webhook_domain::ports::{DeliveryResponse, WebhookSender};
use webhook_errors::{DeliveryError, WebhookError, WebhookResult};

/// 错误信息中保留的响应体最大字节数
pub const MAX_ERROR_BODY_BYTES: usize = 1024;

pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Delivery-Id";
pub const ATTEMPT_HEADER: &str = "X-Webhook-Attempt";

/// 基于reqwest的出站Webhook发送器
///
/// 请求体为投递记录中保存的payload原文，任何2xx响应视为成功。
pub struct HttpWebhookSender {
    client: Client,
    timeout: Duration,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration, user_agent: &str) -> WebhookResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            // 只有2xx算成功，重定向不跟随
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::config_error(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self { client, timeout })
    }

    pub fn from_config(config: &DispatcherConfig) -> WebhookResult<Self> {
        Self::new(
            Duration::from_secs(config.request_timeout_seconds),
            &config.user_agent,
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_error(&self, err: reqwest::Error) -> DeliveryError {
        if err.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else if err.is_connect() {
            DeliveryError::Connection(err.to_string())
        } else {
            DeliveryError::Request(err.to_string())
        }
    }

    /// 逐块读取错误响应体，达到上限即停止，不缓冲完整响应
    async fn read_error_body(mut response: Response) -> String {
        let mut body = Vec::new();
        while body.len() < MAX_ERROR_BODY_BYTES {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) if body.is_empty() => return format!("<无法读取响应体: {e}>"),
                Err(e) => {
                    debug!(error = %e, "读取错误响应体中断，保留已读取部分");
                    break;
                }
            }
        }
        body.truncate(MAX_ERROR_BODY_BYTES);
        String::from_utf8_lossy(&body).into_owned()
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, record: &DeliveryRecord) -> Result<DeliveryResponse, DeliveryError> {
        let body = serde_json::to_vec(&record.payload)
            .map_err(|e| DeliveryError::Request(format!("序列化payload失败: {e}")))?;

        debug!(url = %url, delivery_id = record.id, attempt = record.attempt_count, "发送Webhook");
        let start = Instant::now();

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(DELIVERY_ID_HEADER, record.id.to_string())
            .header(ATTEMPT_HEADER, record.attempt_count.to_string())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, delivery_id = record.id, error = %e, "Webhook请求失败");
                self.map_error(e)
            })?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if !status.is_success() {
            let body = Self::read_error_body(response).await;
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(
            url = %url,
            status = status.as_u16(),
            elapsed_ms,
            "收到Webhook响应"
        );
        Ok(DeliveryResponse {
            status_code: status.as_u16(),
            elapsed_ms,
        })
    }
}
