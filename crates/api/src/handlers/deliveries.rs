use std::str::FromStr;

use axum::extract::{Path, Query, State};
use serde::Deserialize;
use webhook_domain::entities::{DeliveryFilter, DeliveryStatus, SubjectType};
use webhook_errors::WebhookError;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

/// 投递记录查询参数
#[derive(Debug, Deserialize)]
pub struct DeliveryQueryParams {
    pub status: Option<String>,
    pub endpoint_id: Option<i64>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl DeliveryQueryParams {
    fn into_filter(self) -> ApiResult<DeliveryFilter> {
        let status = self
            .status
            .as_deref()
            .map(DeliveryStatus::from_str)
            .transpose()
            .map_err(|e| ApiError::BadRequest(format!("无效的status: {e}")))?;
        let subject_type = self
            .subject_type
            .as_deref()
            .map(SubjectType::from_str)
            .transpose()
            .map_err(|e| ApiError::BadRequest(format!("无效的subject_type: {e}")))?;

        Ok(DeliveryFilter {
            status,
            endpoint_id: self.endpoint_id,
            subject_type,
            subject_id: self.subject_id,
            limit: Some(self.limit.unwrap_or(100).clamp(1, 1000)),
            // 负数偏移会让数据库报错，按0处理
            offset: self.offset.map(|offset| offset.max(0)),
        })
    }
}

/// 获取投递记录列表，按ID倒序
pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(params): Query<DeliveryQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let filter = params.into_filter()?;
    let records = state.delivery_repo.list(&filter).await?;
    Ok(success(records))
}

pub async fn get_delivery(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let record = state
        .delivery_repo
        .get_by_id(id)
        .await?
        .ok_or_else(|| WebhookError::delivery_not_found(id))?;
    Ok(success(record))
}

/// 各状态的记录数量
pub async fn delivery_stats(State(state): State<AppState>) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.delivery_repo.status_counts().await?))
}
