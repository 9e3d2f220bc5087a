//! # Transfer API
//!
//! 集群管理器与调度引擎之间的HTTP桥接层。
//!
//! 集群侧的回调（资源offer、任务状态、worker消息、节点丢失）以JSON形式投递到这里，
//! 再转交给 [`SchedulerService`] 处理；运维侧可以通过它替换客户的禁用时间段。
//!
//! ## API 端点
//!
//! - `GET /health` - 健康检查
//! - `POST /cluster/offers` - 处理一次资源offer，返回启动指令或拒绝原因
//! - `POST /cluster/status` - 任务状态事件
//! - `POST /cluster/messages` - worker上报的单个URL传输结果
//! - `POST /cluster/slaves/{slave_id}/lost` - slave丢失
//! - `POST /cluster/executors/{executor_id}/lost` - executor丢失
//! - `PUT /customers/{customer}/spans` - 替换客户的禁用时间段
//!
//! ## 错误响应
//!
//! ```json
//! {
//!   "error": {
//!     "message": "无效的时间段配置: 时间段 [5, 3) 无效",
//!     "type": "INVALID_SPAN",
//!     "code": 400,
//!     "timestamp": "2024-01-01T00:00:00Z"
//!   }
//! }
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{request_logging, timeout_layer, trace_layer};
use routes::{create_routes, AppState};
use transfer_core::ApiConfig;
use transfer_dispatcher::SchedulerService;

/// 创建完整的API应用
pub fn create_app(service: Arc<SchedulerService>, api_config: &ApiConfig) -> Router {
    let state = AppState { service };

    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(timeout_layer(Duration::from_secs(
                api_config.request_timeout_seconds,
            )))
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
