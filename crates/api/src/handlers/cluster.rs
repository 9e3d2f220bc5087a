use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use transfer_domain::{Offer, OfferDecision, StatusEvent, UrlUpdate};

use crate::{
    error::ApiResult,
    response::{ApiResponse, LossReport},
    routes::AppState,
};

/// 处理一次资源offer
///
/// 存储错误已在引擎内部转成拒绝，这里总是返回200。
pub async fn resource_offer(
    State(state): State<AppState>,
    Json(offer): Json<Offer>,
) -> Json<OfferDecision> {
    Json(state.service.handle_offer(&offer).await)
}

pub async fn status_update(
    State(state): State<AppState>,
    Json(event): Json<StatusEvent>,
) -> ApiResult<ApiResponse<()>> {
    state.service.handle_status_event(&event).await?;
    Ok(ApiResponse::success_empty_with_message(format!(
        "任务 {} 状态 {} 已处理",
        event.task_id, event.state
    )))
}

pub async fn framework_message(
    State(state): State<AppState>,
    Json(update): Json<UrlUpdate>,
) -> ApiResult<ApiResponse<()>> {
    state.service.handle_framework_message(&update).await?;
    Ok(ApiResponse::success_empty_with_message(format!(
        "任务 {} 的URL结果已记录",
        update.task_id
    )))
}

pub async fn slave_lost(
    State(state): State<AppState>,
    Path(slave_id): Path<String>,
) -> ApiResult<ApiResponse<LossReport>> {
    let affected_tasks = state.service.slave_lost(&slave_id).await?;
    info!("集群报告slave {} 丢失，影响 {} 个任务", slave_id, affected_tasks);
    Ok(ApiResponse::success(LossReport { affected_tasks }))
}

pub async fn executor_lost(
    State(state): State<AppState>,
    Path(executor_id): Path<String>,
) -> ApiResult<ApiResponse<LossReport>> {
    let affected_tasks = state.service.executor_lost(&executor_id).await?;
    Ok(ApiResponse::success(LossReport { affected_tasks }))
}
