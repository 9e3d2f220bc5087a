use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use transfer_domain::Span;

use crate::{
    error::{ApiError, ApiResult},
    response::ApiResponse,
    routes::AppState,
};

/// 整体替换客户的禁用时间段，空列表表示取消全部禁用
pub async fn replace_spans(
    State(state): State<AppState>,
    Path(customer): Path<String>,
    Json(spans): Json<Vec<Span>>,
) -> ApiResult<ApiResponse<Vec<Span>>> {
    if customer.trim().is_empty() {
        return Err(ApiError::BadRequest("客户名不能为空".to_string()));
    }
    Span::validate_list(&spans)?;

    state
        .service
        .update_customer_spans(&customer, spans.clone())
        .await?;
    info!("客户 {} 的禁用时间段更新为 {:?}", customer, spans);

    Ok(ApiResponse::success(spans))
}
