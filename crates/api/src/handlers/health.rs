use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::routes::AppState;

/// 存活检查，附带当前调度名单中的客户数
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "transfer-scheduler",
        "version": env!("CARGO_PKG_VERSION"),
        "roster_customers": state.service.selector().len().await,
    }))
}
