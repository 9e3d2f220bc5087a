use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use transfer_dispatcher::SchedulerService;

use crate::handlers::{
    cluster::{executor_lost, framework_message, resource_offer, slave_lost, status_update},
    customers::replace_spans,
    health::health_check,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SchedulerService>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 集群管理器回调
        .route("/cluster/offers", post(resource_offer))
        .route("/cluster/status", post(status_update))
        .route("/cluster/messages", post(framework_message))
        .route("/cluster/slaves/{slave_id}/lost", post(slave_lost))
        .route("/cluster/executors/{executor_id}/lost", post(executor_lost))
        // 客户配置
        .route("/customers/{customer}/spans", put(replace_spans))
        .with_state(state)
}
