use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("进度存储错误: {0}")]
    ProgressStore(String),

    #[error("完成回调错误: {0}")]
    Notification(String),

    #[error("作业未找到: {id}")]
    JobNotFound { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("Executor未找到: {id}")]
    ExecutorNotFound { id: String },

    #[error("无效的状态事件: {0}")]
    InvalidEvent(String),

    #[error("无效的时间段配置: {0}")]
    InvalidSpan(String),

    #[error("无效的作业提交: {0}")]
    InvalidSubmission(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

impl SchedulerError {
    /// 存储层的瞬时错误，本次调用放弃即可，由下一次offer或周期任务重新驱动
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_)
                | SchedulerError::DatabaseOperation(_)
                | SchedulerError::ProgressStore(_)
        )
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SchedulerError::DatabaseOperation("lock timeout".into()).is_transient());
        assert!(SchedulerError::ProgressStore("connection reset".into()).is_transient());
        assert!(!SchedulerError::InvalidEvent("TASK_BOGUS".into()).is_transient());
        assert!(!SchedulerError::TaskNotFound { id: 7 }.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = SchedulerError::JobNotFound {
            id: "job-1".to_string(),
        };
        assert_eq!(err.to_string(), "作业未找到: job-1");
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: SchedulerError = parse.unwrap_err().into();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }
}
