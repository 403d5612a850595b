use axum::{extract::State, Json};
use serde::Serialize;
use webhook_domain::events::EventPayload;

use crate::{error::ApiResult, response::created, routes::AppState};

#[derive(Debug, Serialize)]
pub struct EmitEventResponse {
    pub event: &'static str,
    pub record_ids: Vec<i64>,
}

/// 接收领域事件并为匹配的Endpoint创建投递记录
pub async fn emit_event(
    State(state): State<AppState>,
    Json(event): Json<EventPayload>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let records = state.emitter.emit_event(&event).await?;
    Ok(created(EmitEventResponse {
        event: event.event_type(),
        record_ids: records.iter().map(|r| r.id).collect(),
    }))
}
