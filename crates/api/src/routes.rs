use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use webhook_application::{EndpointRegistry, EventEmitter};
use webhook_dispatcher::BatchDispatcher;
use webhook_domain::repositories::DeliveryRecordRepository;

use crate::handlers::{
    deliveries::{delivery_stats, get_delivery, list_deliveries},
    dispatch::dispatch_batch,
    endpoints::{
        activate_endpoint, create_endpoint, deactivate_endpoint, get_endpoint, list_endpoints,
        update_endpoint,
    },
    events::emit_event,
    health::health_check,
    metrics::render_metrics,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<EndpointRegistry>,
    pub emitter: Arc<EventEmitter>,
    pub dispatcher: Arc<BatchDispatcher>,
    pub delivery_repo: Arc<dyn DeliveryRecordRepository>,
    pub metrics_handle: Option<PrometheusHandle>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        // Endpoint管理API
        .route("/api/endpoints", get(list_endpoints).post(create_endpoint))
        .route("/api/endpoints/{id}", get(get_endpoint).put(update_endpoint))
        .route("/api/endpoints/{id}/activate", post(activate_endpoint))
        .route("/api/endpoints/{id}/deactivate", post(deactivate_endpoint))
        // 事件与投递API
        .route("/api/events", post(emit_event))
        .route("/api/deliveries", get(list_deliveries))
        .route("/api/deliveries/stats", get(delivery_stats))
        .route("/api/deliveries/{id}", get(get_delivery))
        .route("/api/dispatch", post(dispatch_batch))
        .with_state(state)
}
