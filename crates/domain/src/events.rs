//! 集群管理器契约：资源offer、任务状态事件、worker消息以及启动指令

use serde::{Deserialize, Serialize};

use crate::entities::{CustomerId, ExecutorId, JobId, SlaveId, TaskId, UrlStatus};
use crate::value_objects::ResourceTotals;
use transfer_core::{SchedulerError, SchedulerResult};

pub const RESOURCE_CPUS: &str = "cpus";
pub const RESOURCE_MEM: &str = "mem";
pub const RESOURCE_DISK: &str = "disk";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub scalar: f64,
}

/// 某个slave上一次性提供的资源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: String,
    pub slave_id: SlaveId,
    pub hostname: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Offer {
    /// 按名字累加cpus/mem/disk，未知资源忽略
    pub fn totals(&self) -> ResourceTotals {
        self.resources
            .iter()
            .fold(ResourceTotals::default(), |mut acc, resource| {
                match resource.name.as_str() {
                    RESOURCE_CPUS => acc.cpus += resource.scalar,
                    RESOURCE_MEM => acc.mem += resource.scalar,
                    RESOURCE_DISK => acc.disk += resource.scalar,
                    _ => {}
                }
                acc
            })
    }
}

/// 集群管理器上报的任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    #[serde(rename = "TASK_STAGING")]
    Staging,
    #[serde(rename = "TASK_STARTING")]
    Starting,
    #[serde(rename = "TASK_RUNNING")]
    Running,
    #[serde(rename = "TASK_FINISHED")]
    Finished,
    #[serde(rename = "TASK_FAILED")]
    Failed,
    #[serde(rename = "TASK_ERROR")]
    Error,
    #[serde(rename = "TASK_KILLED")]
    Killed,
    #[serde(rename = "TASK_LOST")]
    Lost,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Staging => "TASK_STAGING",
            TaskState::Starting => "TASK_STARTING",
            TaskState::Running => "TASK_RUNNING",
            TaskState::Finished => "TASK_FINISHED",
            TaskState::Failed => "TASK_FAILED",
            TaskState::Error => "TASK_ERROR",
            TaskState::Killed => "TASK_KILLED",
            TaskState::Lost => "TASK_LOST",
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = SchedulerError;

    fn from_str(s: &str) -> SchedulerResult<Self> {
        match s {
            "TASK_STAGING" => Ok(TaskState::Staging),
            "TASK_STARTING" => Ok(TaskState::Starting),
            "TASK_RUNNING" => Ok(TaskState::Running),
            "TASK_FINISHED" => Ok(TaskState::Finished),
            "TASK_FAILED" => Ok(TaskState::Failed),
            "TASK_ERROR" => Ok(TaskState::Error),
            "TASK_KILLED" => Ok(TaskState::Killed),
            "TASK_LOST" => Ok(TaskState::Lost),
            other => Err(SchedulerError::InvalidEvent(other.to_string())),
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub task_id: TaskId,
    #[serde(default)]
    pub executor_id: Option<ExecutorId>,
    pub state: TaskState,
    #[serde(default)]
    pub message: Option<String>,
}

/// worker在单个URL传输结束时发出的framework message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlUpdate {
    pub task_id: TaskId,
    pub origin_url: String,
    #[serde(default)]
    pub target_url: Option<String>,
    pub status: UrlStatus,
    #[serde(default)]
    pub size: Option<i64>,
}

/// 下发给worker的任务数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub id: TaskId,
    pub job_id: JobId,
    pub customer: CustomerId,
    pub source_urls: Vec<String>,
    pub destination_type: String,
    pub destination_bucket: String,
    pub destination_acl: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub destination_endpoint: Option<String>,
}

/// 执行器启动信息；reused为true时集群管理器复用已有进程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorLaunch {
    pub executor_id: ExecutorId,
    pub reused: bool,
    pub uri: String,
    pub command: String,
    pub args: Vec<String>,
    pub cpus: f64,
}

/// 单个任务的启动指令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchDirective {
    pub task_id: TaskId,
    pub name: String,
    pub slave_id: SlaveId,
    pub executor: ExecutorLaunch,
    pub mem: f64,
    pub disk: f64,
    pub payload: TransferPayload,
}

/// 对一次offer的处理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum OfferDecision {
    Launch { directives: Vec<LaunchDirective> },
    Decline { reason: String },
}

impl OfferDecision {
    pub fn decline(reason: impl Into<String>) -> Self {
        OfferDecision::Decline {
            reason: reason.into(),
        }
    }

    pub fn directives(&self) -> &[LaunchDirective] {
        match self {
            OfferDecision::Launch { directives } => directives,
            OfferDecision::Decline { .. } => &[],
        }
    }

    pub fn is_decline(&self) -> bool {
        matches!(self, OfferDecision::Decline { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_totals_sum_by_name() {
        let offer = Offer {
            offer_id: "o-1".to_string(),
            slave_id: "s-1".to_string(),
            hostname: "host-1".to_string(),
            resources: vec![
                Resource { name: "cpus".to_string(), scalar: 2.0 },
                Resource { name: "cpus".to_string(), scalar: 1.5 },
                Resource { name: "mem".to_string(), scalar: 1024.0 },
                Resource { name: "ports".to_string(), scalar: 100.0 },
            ],
        };
        let totals = offer.totals();
        assert_eq!(totals.cpus, 3.5);
        assert_eq!(totals.mem, 1024.0);
        assert_eq!(totals.disk, 0.0);
    }

    #[test]
    fn test_offer_wire_format() {
        let offer: Offer = serde_json::from_str(
            r#"{"offer_id":"o-1","slave_id":"s-1","hostname":"host-1",
                "resources":[{"name":"cpus","scalar":4.0},{"name":"disk","scalar":2048.0}]}"#,
        )
        .unwrap();
        assert_eq!(offer.resources[0].scalar, 4.0);
        assert_eq!(offer.totals().disk, 2048.0);
    }

    #[test]
    fn test_unknown_task_state_rejected() {
        assert_eq!("TASK_LOST".parse::<TaskState>().unwrap(), TaskState::Lost);
        let err = "TASK_GONE".parse::<TaskState>().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidEvent(_)));
    }

    #[test]
    fn test_status_event_wire_format() {
        let event: StatusEvent = serde_json::from_str(
            r#"{"task_id": 12, "executor_id": "e-1", "state": "TASK_FINISHED"}"#,
        )
        .unwrap();
        assert_eq!(event.state, TaskState::Finished);
        assert_eq!(event.message, None);

        let bad = serde_json::from_str::<StatusEvent>(r#"{"task_id": 12, "state": "TASK_BOGUS"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_url_update_wire_format() {
        let update: UrlUpdate = serde_json::from_str(
            r#"{"taskId": 3, "originUrl": "http://src/a", "targetUrl": "s3://b/a", "status": "Finished", "size": 42}"#,
        )
        .unwrap();
        assert_eq!(update.status, UrlStatus::Finished);
        assert_eq!(update.size, Some(42));
    }

    #[test]
    fn test_decline_decision_tag() {
        let json = serde_json::to_value(OfferDecision::decline("no capacity")).unwrap();
        assert_eq!(json["decision"], "decline");
        assert_eq!(json["reason"], "no capacity");
    }
}
