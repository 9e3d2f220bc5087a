use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use transfer_core::{SchedulerError, SchedulerResult};

pub type CustomerId = String;
pub type JobId = String;
pub type TaskId = i64;
pub type ExecutorId = String;
pub type SlaveId = String;

/// 每个客户最多允许配置的时间段数量
pub const MAX_SPANS_PER_CUSTOMER: usize = 4;

/// 为状态枚举生成与持久化字符串之间的双向映射
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = SchedulerError;

            fn from_str(s: &str) -> SchedulerResult<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(SchedulerError::Serialization(format!(
                        concat!("无效的", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(
    /// 作业聚合状态
    JobStatus {
        Pending => "Pending",
        Scheduled => "Scheduled",
        Suspended => "Suspended",
        Running => "Running",
        Finished => "Finished",
        Failed => "Failed",
    }
);

string_enum!(
    TaskStatus {
        Pending => "Pending",
        Scheduled => "Scheduled",
        Running => "Running",
        Suspended => "Suspended",
        Failed => "Failed",
        Finished => "Finished",
    }
);

string_enum!(
    SlaveStatus {
        Active => "Active",
        Lost => "Lost",
    }
);

string_enum!(
    ExecutorStatus {
        Scheduled => "Scheduled",
        Lost => "Lost",
    }
);

string_enum!(
    /// 单个源URL的传输状态，由worker通过framework message上报
    UrlStatus {
        Pending => "Pending",
        Suspended => "Suspended",
        Finished => "Finished",
        Failed => "Failed",
    }
);

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Failed)
    }

    /// Scheduled/Running 状态下任务必须且只能有一个executor
    pub fn holds_executor(&self) -> bool {
        matches!(self, TaskStatus::Scheduled | TaskStatus::Running)
    }
}

/// 作业完成回调目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackTarget {
    pub url: String,
    pub token: Option<String>,
}

impl CallbackTarget {
    /// token以查询串形式附加在回调地址后
    pub fn endpoint(&self) -> String {
        match self.token.as_deref() {
            Some(token) if !token.is_empty() => format!("{}?{}", self.url, token),
            _ => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub customer: CustomerId,
    pub status: JobStatus,
    pub callback: Option<CallbackTarget>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub finished_bytes: i64,
}

impl Job {
    pub fn new(id: JobId, customer: CustomerId, callback: Option<CallbackTarget>) -> Self {
        Self {
            id,
            customer,
            status: JobStatus::Pending,
            callback,
            created_at: Utc::now(),
            completed_at: None,
            finished_bytes: 0,
        }
    }
}

/// 目标存储配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub kind: String,
    pub bucket: String,
    pub acl: String,
    pub access_key: String,
    pub secret_key: String,
}

/// 一批共享同一目标配置的源URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub customer: CustomerId,
    pub source_urls: Vec<String>,
    pub destination: Destination,
    pub status: TaskStatus,
    pub executor_id: Option<ExecutorId>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl Task {
    /// 未指定executor时总是成立
    pub fn assigned_to(&self, executor_id: Option<&str>) -> bool {
        executor_id.map_or(true, |id| self.executor_id.as_deref() == Some(id))
    }
}

/// 待插入的任务
#[derive(Debug, Clone)]
pub struct NewTask {
    pub job_id: JobId,
    pub customer: CustomerId,
    pub source_urls: Vec<String>,
    pub destination: Destination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slave {
    pub id: SlaveId,
    pub hostname: String,
    pub status: SlaveStatus,
}

impl Slave {
    pub fn active(id: SlaveId, hostname: String) -> Self {
        Self {
            id,
            hostname,
            status: SlaveStatus::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executor {
    pub id: ExecutorId,
    pub slave_id: SlaveId,
    pub running_count: i32,
    pub status: ExecutorStatus,
}

impl Executor {
    pub fn is_idle(&self, idle_threshold: i32) -> bool {
        self.status != ExecutorStatus::Lost && self.running_count < idle_threshold
    }
}

/// 回收器使用的已分发任务视图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub task_id: TaskId,
    pub executor_id: Option<ExecutorId>,
    pub dispatched_at: DateTime<Utc>,
}

/// 被退回Pending（或在Fail策略下被标记失败）的任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimedTask {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub customer: CustomerId,
    pub status: TaskStatus,
}

/// 半开区间 [start, end) 的小时段，落在其中的客户作业被暂停
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        self.start <= hour && hour < self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// 任一时间段覆盖当前小时即为命中
    pub fn any_contains(spans: &[Span], hour: u32) -> bool {
        spans.iter().any(|span| span.contains(hour))
    }

    /// 边界校验：数量上限、start < end ≤ 24、互不重叠
    pub fn validate_list(spans: &[Span]) -> SchedulerResult<()> {
        if spans.len() > MAX_SPANS_PER_CUSTOMER {
            return Err(SchedulerError::InvalidSpan(format!(
                "时间段数量 {} 超过上限 {}",
                spans.len(),
                MAX_SPANS_PER_CUSTOMER
            )));
        }

        for (idx, span) in spans.iter().enumerate() {
            if span.start >= span.end || span.end > 24 {
                return Err(SchedulerError::InvalidSpan(format!(
                    "时间段 [{}, {}) 无效",
                    span.start, span.end
                )));
            }
            if let Some(other) = spans[idx + 1..].iter().find(|other| span.overlaps(other)) {
                return Err(SchedulerError::InvalidSpan(format!(
                    "时间段 [{}, {}) 与 [{}, {}) 重叠",
                    span.start, span.end, other.start, other.end
                )));
            }
        }

        Ok(())
    }
}

/// 作业下任务的终态统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub finished: i64,
    pub failed: i64,
    pub total: i64,
}

impl TaskCounts {
    pub fn all_terminal(&self) -> bool {
        self.finished + self.failed >= self.total
    }
}

/// 作业完成回调的内容
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    #[serde(rename = "jobid")]
    pub job_id: JobId,
    #[serde(rename = "success-files")]
    pub success_urls: Vec<String>,
    #[serde(rename = "failed-files")]
    pub failed_urls: Vec<String>,
    #[serde(rename = "queued-files")]
    pub pending_urls: Vec<String>,
    #[serde(rename = "suspended-files")]
    pub suspended_urls: Vec<String>,
}

impl JobSummary {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            ..Default::default()
        }
    }

    pub fn record(&mut self, url: String, status: UrlStatus) {
        match status {
            UrlStatus::Finished => self.success_urls.push(url),
            UrlStatus::Failed => self.failed_urls.push(url),
            UrlStatus::Pending => self.pending_urls.push(url),
            UrlStatus::Suspended => self.suspended_urls.push(url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_mapping() {
        assert_eq!(TaskStatus::Scheduled.as_str(), "Scheduled");
        assert_eq!("Suspended".parse::<JobStatus>().unwrap(), JobStatus::Suspended);
        assert!("scheduled".parse::<TaskStatus>().is_err());
        assert_eq!(ExecutorStatus::Lost.to_string(), "Lost");
    }

    #[test]
    fn test_span_half_open() {
        let span = Span::new(9, 17);
        assert!(!span.contains(8));
        assert!(span.contains(9));
        assert!(span.contains(16));
        assert!(!span.contains(17));
        assert!(Span::any_contains(&[Span::new(0, 2), span], 1));
        assert!(!Span::any_contains(&[], 1));
    }

    #[test]
    fn test_span_validation() {
        assert!(Span::validate_list(&[Span::new(0, 6), Span::new(6, 12)]).is_ok());
        assert!(Span::validate_list(&[Span::new(5, 5)]).is_err());
        assert!(Span::validate_list(&[Span::new(20, 25)]).is_err());
        assert!(Span::validate_list(&[Span::new(0, 6), Span::new(5, 8)]).is_err());
        let too_many: Vec<Span> = (0..5).map(|h| Span::new(h, h + 1)).collect();
        assert!(Span::validate_list(&too_many).is_err());
    }

    #[test]
    fn test_executor_idle() {
        let mut executor = Executor {
            id: "e-1".to_string(),
            slave_id: "s-1".to_string(),
            running_count: 1,
            status: ExecutorStatus::Scheduled,
        };
        assert!(executor.is_idle(2));
        executor.running_count = 2;
        assert!(!executor.is_idle(2));
        executor.running_count = 0;
        executor.status = ExecutorStatus::Lost;
        assert!(!executor.is_idle(2));
    }

    #[test]
    fn test_callback_endpoint() {
        let target = CallbackTarget {
            url: "http://cb.example.com/done".to_string(),
            token: Some("token=abc".to_string()),
        };
        assert_eq!(target.endpoint(), "http://cb.example.com/done?token=abc");

        let bare = CallbackTarget {
            url: "http://cb.example.com/done".to_string(),
            token: Some(String::new()),
        };
        assert_eq!(bare.endpoint(), "http://cb.example.com/done");
    }

    #[test]
    fn test_summary_wire_names() {
        let mut summary = JobSummary::new("job-1".to_string());
        summary.record("http://a/1".to_string(), UrlStatus::Finished);
        summary.record("http://a/2".to_string(), UrlStatus::Suspended);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["jobid"], "job-1");
        assert_eq!(json["success-files"][0], "http://a/1");
        assert_eq!(json["suspended-files"][0], "http://a/2");
        assert!(json["failed-files"].as_array().unwrap().is_empty());
    }
}
