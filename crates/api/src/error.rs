use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;
use transfer_core::SchedulerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Scheduler(err) => match err {
                SchedulerError::InvalidEvent(_) => (StatusCode::BAD_REQUEST, "INVALID_EVENT"),
                SchedulerError::InvalidSpan(_) => (StatusCode::BAD_REQUEST, "INVALID_SPAN"),
                SchedulerError::InvalidSubmission(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_SUBMISSION")
                }
                SchedulerError::Serialization(_) => {
                    (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR")
                }
                SchedulerError::JobNotFound { .. } => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
                SchedulerError::TaskNotFound { .. } => (StatusCode::NOT_FOUND, "TASK_NOT_FOUND"),
                SchedulerError::ExecutorNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "EXECUTOR_NOT_FOUND")
                }
                err if err.is_transient() => {
                    (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();

        let message = if status.is_server_error() {
            error!("请求处理失败: {}", self);
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "存储暂不可用，请稍后重试".to_string(),
                _ => "系统内部错误".to_string(),
            }
        } else {
            match &self {
                ApiError::Scheduler(err) => err.to_string(),
                ApiError::BadRequest(msg) => msg.clone(),
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_bad_request() {
        let cases = vec![
            SchedulerError::InvalidEvent("TASK_BOGUS".to_string()),
            SchedulerError::InvalidSpan("时间段 [5, 3) 无效".to_string()),
            SchedulerError::InvalidSubmission("空的URL列表".to_string()),
        ];

        for err in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_not_found_errors() {
        let response = ApiError::from(SchedulerError::TaskNotFound { id: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::from(SchedulerError::JobNotFound {
            id: "job-1".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_transient_store_errors_are_retryable() {
        let err = SchedulerError::DatabaseOperation("连接池耗尽".to_string());
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_internal_errors() {
        let response =
            ApiError::from(SchedulerError::Internal("boom".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError::BadRequest("客户名为空".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_api_error_display() {
        let error = ApiError::from(SchedulerError::TaskNotFound { id: 7 });
        assert_eq!(error.to_string(), "调度器错误: 任务未找到: 7");
    }
}
