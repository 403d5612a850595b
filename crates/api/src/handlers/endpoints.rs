use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use webhook_domain::entities::{EndpointFilter, EndpointScope, UnitId};

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success},
    routes::AppState,
};

/// Endpoint注册请求，省略 unit_id 表示全局订阅
#[derive(Debug, Deserialize)]
pub struct EndpointRequest {
    pub url: String,
    pub unit_id: Option<UnitId>,
}

/// Endpoint查询参数
#[derive(Debug, Deserialize)]
pub struct EndpointQueryParams {
    pub active: Option<bool>,
    pub scope: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl EndpointQueryParams {
    fn into_filter(self) -> ApiResult<EndpointFilter> {
        Ok(EndpointFilter {
            active: self.active,
            scope: self.scope.as_deref().map(parse_scope).transpose()?,
            limit: self.limit.map(|limit| limit.clamp(1, 1000)),
            offset: self.offset.map(|offset| offset.max(0)),
        })
    }
}

fn parse_scope(raw: &str) -> ApiResult<EndpointScope> {
    if raw == "global" {
        return Ok(EndpointScope::Global);
    }
    raw.strip_prefix("unit:")
        .and_then(|id| id.parse::<UnitId>().ok())
        .map(|unit_id| EndpointScope::Unit { unit_id })
        .ok_or_else(|| ApiError::BadRequest(format!("无效的scope: {raw}，应为 global 或 unit:<id>")))
}

/// 获取Endpoint列表
pub async fn list_endpoints(
    State(state): State<AppState>,
    Query(params): Query<EndpointQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let endpoints = state.registry.list(&params.into_filter()?).await?;
    Ok(success(endpoints))
}

/// 注册Endpoint
pub async fn create_endpoint(
    State(state): State<AppState>,
    Json(request): Json<EndpointRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let endpoint = state
        .registry
        .register(&request.url, EndpointScope::from_unit_id(request.unit_id))
        .await?;
    Ok(created(endpoint))
}

/// 获取单个Endpoint
pub async fn get_endpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.registry.get(id).await?))
}

/// 更新Endpoint的URL和作用域
pub async fn update_endpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<EndpointRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let endpoint = state
        .registry
        .update(id, &request.url, EndpointScope::from_unit_id(request.unit_id))
        .await?;
    Ok(success(endpoint))
}

pub async fn activate_endpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.registry.activate(id).await?))
}

/// 停用后该Endpoint不再产生新记录，已有记录暂停投递
pub async fn deactivate_endpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.registry.deactivate(id).await?))
}
