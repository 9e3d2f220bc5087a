use serde::{Deserialize, Serialize};

/// Executor丢失时，其上任务的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorLossAction {
    /// 任务回到Pending，清除分配，等待重新分发
    #[default]
    Reclaim,
    /// 任务直接标记为Failed并计入作业完成统计
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 每个executor占用的cpu
    pub cpu_per_executor: f64,
    /// 每个任务占用的内存（MB）
    pub memory_per_task: f64,
    /// 每个任务占用的磁盘（MB）
    pub disk_per_task: f64,
    /// 运行任务数低于该值的executor视为空闲
    pub executor_idle_threshold: i32,
    /// 任务处于Scheduled超过该时间仍未Running，视为丢失并回收
    pub task_schedule_timeout_seconds: u64,
    /// 优先级层数，0为最高
    pub priority_tiers: usize,
    /// 作业拆分时每个任务包含的URL数量
    pub files_per_task: usize,
    pub executor_loss_action: ExecutorLossAction,
    /// executor丢失时是否连同Scheduled（尚未Running）的任务一起处理
    pub cascade_scheduled_on_executor_loss: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cpu_per_executor: 1.0,
            memory_per_task: 256.0,
            disk_per_task: 1024.0,
            executor_idle_threshold: 4,
            task_schedule_timeout_seconds: 300,
            priority_tiers: 10,
            files_per_task: 10,
            executor_loss_action: ExecutorLossAction::Reclaim,
            cascade_scheduled_on_executor_loss: false,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cpu_per_executor <= 0.0 {
            return Err(anyhow::anyhow!("每个executor的cpu必须大于0"));
        }

        if self.memory_per_task <= 0.0 || self.disk_per_task <= 0.0 {
            return Err(anyhow::anyhow!("每个任务的内存和磁盘必须大于0"));
        }

        if self.executor_idle_threshold <= 0 {
            return Err(anyhow::anyhow!("executor空闲阈值必须大于0"));
        }

        if self.task_schedule_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务调度超时时间必须大于0"));
        }

        if self.priority_tiers == 0 {
            return Err(anyhow::anyhow!("优先级层数必须大于0"));
        }

        if self.files_per_task == 0 {
            return Err(anyhow::anyhow!("每个任务的文件数必须大于0"));
        }

        Ok(())
    }
}
