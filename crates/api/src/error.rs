use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;
use webhook_errors::WebhookError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Webhook错误: {0}")]
    Webhook(#[from] WebhookError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_type, suggestions) = match &self {
            ApiError::Webhook(WebhookError::EndpointNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("Endpoint ID {} 不存在", id),
                "ENDPOINT_NOT_FOUND",
                vec!["使用 GET /api/endpoints 查看已注册的Endpoint".to_string()],
            ),
            ApiError::Webhook(WebhookError::DeliveryNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("投递记录 ID {} 不存在", id),
                "DELIVERY_NOT_FOUND",
                vec!["使用 GET /api/deliveries 查看投递记录".to_string()],
            ),
            ApiError::Webhook(WebhookError::ValidationError(msg)) => (
                StatusCode::BAD_REQUEST,
                format!("数据验证失败: {}", msg),
                "VALIDATION_ERROR",
                vec!["URL必须是带主机名的 http/https 地址".to_string()],
            ),
            ApiError::Webhook(WebhookError::Serialization(msg)) => (
                StatusCode::BAD_REQUEST,
                "请求数据格式错误".to_string(),
                "SERIALIZATION_ERROR",
                vec![format!("详细错误: {}", msg)],
            ),
            ApiError::Webhook(WebhookError::InvalidStateTransition { .. }) => (
                StatusCode::CONFLICT,
                self.to_string(),
                "CONFLICT",
                vec!["投递记录状态已变化，请刷新后重试".to_string()],
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {}", msg),
                "BAD_REQUEST",
                vec!["请检查请求格式和参数".to_string()],
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "请求的资源不存在".to_string(),
                "NOT_FOUND",
                vec!["请检查请求URL是否正确".to_string()],
            ),
            ApiError::Webhook(e) => {
                error!("请求处理失败: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.user_message().to_string(),
                    "INTERNAL_ERROR",
                    vec!["查看 GET /health 检查系统状态".to_string()],
                )
            }
            ApiError::Internal(msg) => {
                error!("内部错误: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "系统内部错误".to_string(),
                    "INTERNAL_ERROR",
                    vec!["系统遇到内部错误，请稍后重试".to_string()],
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
                "code": status.as_u16(),
                "suggestions": suggestions,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_error_conversion() {
        let api_error: ApiError = WebhookError::endpoint_not_found(12).into();
        match api_error {
            ApiError::Webhook(WebhookError::EndpointNotFound { id }) => assert_eq!(id, 12),
            _ => panic!("Expected EndpointNotFound"),
        }
    }

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (ApiError::Webhook(WebhookError::delivery_not_found(1)), StatusCode::NOT_FOUND),
            (
                ApiError::Webhook(WebhookError::validation_error("bad url")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Webhook(WebhookError::invalid_transition(1, "IN_FLIGHT")),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Webhook(WebhookError::database_error("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::BadRequest("status".to_string()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound, StatusCode::NOT_FOUND),
            (ApiError::Internal("boom".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::Webhook(WebhookError::endpoint_not_found(3)).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["error"]["type"], "ENDPOINT_NOT_FOUND");
        assert_eq!(json["error"]["code"], 404);
        assert!(json["error"]["message"].as_str().unwrap().contains('3'));
        assert!(json["error"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        let response = ApiError::Webhook(WebhookError::database_error("password=secret")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("secret"));
    }
}
