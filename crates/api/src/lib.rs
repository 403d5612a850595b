//! # Webhook API
//!
//! Webhook中继的REST API，基于Axum构建：
//! - Endpoint注册与启停
//! - 领域事件接收（为匹配的Endpoint创建投递记录）
//! - 投递记录查询与统计
//! - 批次投递的调用入口 `POST /api/dispatch`
//! - 健康检查与 Prometheus 指标
//!
//! ## 响应格式
//!
//! 除 `/api/dispatch`（直接返回摘要对象）和 `/metrics` 外，成功响应统一包装为：
//!
//! ```json
//! { "success": true, "data": { ... }, "message": null, "timestamp": "2024-01-01T00:00:00Z" }
//! ```
//!
//! 错误响应：
//!
//! ```json
//! { "error": { "message": "...", "type": "ENDPOINT_NOT_FOUND", "code": 404, "suggestions": [], "timestamp": "..." } }
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;
use webhook_config::ApiConfig;

use middleware::{cors_layer, request_logging, timeout_layer, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let router = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(timeout_layer(api_config.request_timeout_seconds))
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
