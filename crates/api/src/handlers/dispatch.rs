use std::sync::Arc;

use axum::{extract::State, Json};
use webhook_dispatcher::DispatchSummary;

use crate::{
    error::{ApiError, ApiResult},
    routes::AppState,
};

/// 执行一次批次投递，直接返回摘要对象
///
/// 批次在独立任务中运行。请求超时或客户端断开只会丢弃响应，
/// 已认领的记录仍会写入结果，不会停留在 IN_FLIGHT 等待租约恢复。
pub async fn dispatch_batch(State(state): State<AppState>) -> ApiResult<Json<DispatchSummary>> {
    let dispatcher = Arc::clone(&state.dispatcher);
    let summary = tokio::spawn(async move { dispatcher.dispatch_batch().await })
        .await
        .map_err(|e| ApiError::Internal(format!("投递批次任务异常退出: {e}")))??;
    Ok(Json(summary))
}
