//! 引擎依赖的外部协作者抽象
//!
//! 关系存储、URL进度存储与完成回调通道均以trait对象注入，测试中使用内存实现替换。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{
    CallbackTarget, CustomerId, Executor, ExecutorId, Job, JobId, JobStatus, NewTask,
    JobSummary, ReclaimedTask, ScheduledTask, Slave, Span, Task, TaskCounts, TaskId, TaskStatus,
};
use crate::events::UrlUpdate;
use transfer_core::{ExecutorLossAction, SchedulerResult};

/// 启动恢复时重置的记录数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryCounts {
    pub executors_lost: u64,
    pub tasks_reset: u64,
}

/// 一次offer分配所用的事务
///
/// 查询方法对返回的行加锁，提交前其它分配事务无法拿到同一批executor或任务。
/// commit/rollback消费事务本身，事务被丢弃而未提交时等同回滚。
#[async_trait]
pub trait DispatchTransaction: Send {
    /// slave上running_count低于阈值且未丢失的executor
    async fn query_idle_executors(
        &mut self,
        slave_id: &str,
        idle_threshold: i32,
    ) -> SchedulerResult<Vec<Executor>>;

    /// 客户最早提交的Pending任务，至多limit个
    ///
    /// `destination_kinds` 非空时只返回目标类型在其中的任务。
    async fn query_pending_tasks(
        &mut self,
        customer: &str,
        destination_kinds: &[String],
        limit: usize,
    ) -> SchedulerResult<Vec<Task>>;

    /// 不存在时以running_count=1插入，存在时running_count+1
    async fn upsert_executor(&mut self, executor_id: &str, slave_id: &str) -> SchedulerResult<()>;

    async fn mark_task_scheduled(
        &mut self,
        task_id: TaskId,
        executor_id: &str,
        dispatched_at: DateTime<Utc>,
    ) -> SchedulerResult<()>;

    /// 仅当作业仍为Pending时推进到Scheduled
    async fn mark_job_scheduled(&mut self, job_id: &str) -> SchedulerResult<()>;

    async fn commit(self: Box<Self>) -> SchedulerResult<()>;

    async fn rollback(self: Box<Self>) -> SchedulerResult<()>;
}

/// 作业、任务、executor与客户数据的持久化
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> SchedulerResult<()>;

    /// 按传入顺序插入，返回分配的任务ID
    async fn insert_tasks(&self, tasks: &[NewTask]) -> SchedulerResult<Vec<TaskId>>;

    async fn upsert_slave(&self, slave: &Slave) -> SchedulerResult<()>;

    async fn begin_dispatch(&self) -> SchedulerResult<Box<dyn DispatchTransaction>>;

    /// Scheduled → Running，任务状态不符时返回false；作业随之由Scheduled进入Running
    ///
    /// 以下三个转换在给出 `executor_id` 时还要求任务当前分配给该executor，
    /// 上一次分发遗留的迟到事件因此不会作用在重新分发后的任务上。
    async fn mark_task_running(
        &self,
        task_id: TaskId,
        executor_id: Option<&str>,
    ) -> SchedulerResult<bool>;

    /// Scheduled/Running → Finished/Failed，条件更新
    ///
    /// 转换生效时所属executor的running_count减一，任务下仍为Pending的URL记为同样的终态；
    /// 重复事件返回false且不产生任何副作用。
    async fn complete_task(
        &self,
        task_id: TaskId,
        executor_id: Option<&str>,
        status: TaskStatus,
    ) -> SchedulerResult<bool>;

    /// Scheduled/Running → Pending并清除executor，executor的running_count减一
    async fn reclaim_task(
        &self,
        task_id: TaskId,
        executor_id: Option<&str>,
    ) -> SchedulerResult<Option<ReclaimedTask>>;

    /// 仅当任务仍为Scheduled且分发时间未变时退回Pending
    async fn reclaim_stale_task(
        &self,
        task_id: TaskId,
        dispatched_at: DateTime<Utc>,
    ) -> SchedulerResult<Option<ReclaimedTask>>;

    /// 标记executor丢失并按策略处理其Running（以及可选的Scheduled）任务
    async fn mark_executor_lost(
        &self,
        executor_id: &str,
        action: ExecutorLossAction,
        include_scheduled: bool,
    ) -> SchedulerResult<Vec<ReclaimedTask>>;

    /// 标记slave丢失，返回其上尚未丢失的executor
    async fn mark_slave_lost(&self, slave_id: &str) -> SchedulerResult<Vec<ExecutorId>>;

    async fn list_scheduled_tasks(&self) -> SchedulerResult<Vec<ScheduledTask>>;

    async fn job_id_of_task(&self, task_id: TaskId) -> SchedulerResult<Option<JobId>>;

    async fn query_job_task_counts(&self, job_id: &str) -> SchedulerResult<TaskCounts>;

    /// 作业下Finished URL的字节数之和
    async fn finished_bytes(&self, job_id: &str) -> SchedulerResult<i64>;

    /// 作业尚未终结时写入终态，已终结返回false
    async fn finalize_job(
        &self,
        job_id: &str,
        status: JobStatus,
        finished_bytes: i64,
        completed_at: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    async fn job_callback(&self, job_id: &str) -> SchedulerResult<Option<CallbackTarget>>;

    async fn job_summary(&self, job_id: &str) -> SchedulerResult<JobSummary>;

    /// 更新单个URL的状态、目标地址与大小，URL不存在时返回false
    async fn update_url_progress(&self, update: &UrlUpdate) -> SchedulerResult<bool>;

    async fn query_customer_spans(&self, customer: &str) -> SchedulerResult<Vec<Span>>;

    async fn replace_customer_spans(&self, customer: &str, spans: &[Span]) -> SchedulerResult<()>;

    /// 所有配置了时间段的客户
    async fn list_customer_spans(&self) -> SchedulerResult<HashMap<CustomerId, Vec<Span>>>;

    /// 存在Suspended作业的客户
    async fn list_suspended_customers(&self) -> SchedulerResult<Vec<CustomerId>>;

    /// 客户优先级，未知客户返回None
    async fn query_customer_priority(&self, customer: &str) -> SchedulerResult<Option<i32>>;

    /// 存在Pending任务的客户
    async fn list_pending_customers(&self) -> SchedulerResult<Vec<CustomerId>>;

    /// Pending作业及其Pending任务转为Suspended，返回受影响的作业数
    async fn suspend_customer_jobs(&self, customer: &str) -> SchedulerResult<u64>;

    /// Suspended作业及其Suspended任务转回Pending，返回受影响的作业数
    async fn resume_customer_jobs(&self, customer: &str) -> SchedulerResult<u64>;

    /// 进程启动时所有executor视为丢失，Running任务退回Pending
    async fn reset_cluster_state(&self) -> SchedulerResult<RecoveryCounts>;
}

/// worker写入的URL传输进度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlProgress {
    #[serde(rename = "Size", default)]
    pub size: i64,
    /// 字节/秒
    #[serde(rename = "Speed", default)]
    pub speed: i64,
    /// 0..50为下载阶段，50..100为上传阶段，-1表示未知
    #[serde(rename = "Percentage", default = "unknown_percentage")]
    pub percentage: i32,
}

fn unknown_percentage() -> i32 {
    -1
}

impl UrlProgress {
    pub fn is_known(&self) -> bool {
        self.percentage >= 0
    }
}

/// 以URL为键的进度存储
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get_url_progress(&self, url: &str) -> SchedulerResult<Option<UrlProgress>>;
}

/// 作业完成回调通道，尽力投递一次
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn deliver(&self, target: &CallbackTarget, summary: &JobSummary) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_wire_format() {
        let progress: UrlProgress =
            serde_json::from_str(r#"{"Size": 1024, "Speed": 300, "Percentage": 42}"#).unwrap();
        assert_eq!(progress.speed, 300);
        assert!(progress.is_known());

        let partial: UrlProgress = serde_json::from_str(r#"{"Size": 1024}"#).unwrap();
        assert_eq!(partial.percentage, -1);
        assert!(!partial.is_known());
    }
}
