use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use transfer_core::{SchedulerResult, ThrottleConfig};
use transfer_domain::{CustomerId, ProgressStore, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskInsStatus {
    Queued,
    Running,
    Exited,
}

/// 限速客户在途任务的进程内影子记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskIns {
    pub task_id: TaskId,
    pub customer: CustomerId,
    pub status: TaskInsStatus,
    pub source_urls: Vec<String>,
}

/// 吞吐量调节器
///
/// 按客户当前观测速度估算一次分配中还能放行多少任务，每次offer都会重新计算。
pub struct ThroughputGovernor {
    progress: Arc<dyn ProgressStore>,
    speed_caps: HashMap<CustomerId, u64>,
    completion_threshold_percent: i32,
    unlimited: usize,
    entries: Mutex<HashMap<TaskId, TaskIns>>,
}

impl ThroughputGovernor {
    pub fn new(progress: Arc<dyn ProgressStore>, config: &ThrottleConfig) -> Self {
        Self {
            progress,
            speed_caps: config.speed_caps.clone(),
            completion_threshold_percent: config.completion_threshold_percent,
            unlimited: config.unlimited_admission,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn unlimited(&self) -> usize {
        self.unlimited
    }

    pub fn is_capped(&self, customer: &str) -> bool {
        self.speed_caps.contains_key(customer)
    }

    /// 分发提交后登记，仅限速客户
    pub async fn record_queued(&self, customer: &str, task_id: TaskId, source_urls: Vec<String>) {
        if !self.is_capped(customer) {
            return;
        }
        self.entries.lock().await.insert(
            task_id,
            TaskIns {
                task_id,
                customer: customer.to_string(),
                status: TaskInsStatus::Queued,
                source_urls,
            },
        );
    }

    pub async fn mark_running(&self, task_id: TaskId) {
        if let Some(entry) = self.entries.lock().await.get_mut(&task_id) {
            entry.status = TaskInsStatus::Running;
        }
    }

    pub async fn mark_exited(&self, task_id: TaskId) {
        if let Some(entry) = self.entries.lock().await.get_mut(&task_id) {
            entry.status = TaskInsStatus::Exited;
        }
    }

    pub async fn entries_for(&self, customer: &str) -> Vec<TaskIns> {
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.customer == customer)
            .cloned()
            .collect()
    }

    fn counts_toward_speed(&self, percentage: i32) -> bool {
        percentage == -1 || (percentage > 0 && percentage < self.completion_threshold_percent)
    }

    /// 本次分配中该客户最多可放行的任务数
    pub async fn admission_limit(&self, customer: &str) -> SchedulerResult<usize> {
        let Some(&cap) = self.speed_caps.get(customer) else {
            return Ok(self.unlimited);
        };

        let (queued, running_urls) = {
            let mut entries = self.entries.lock().await;
            entries.retain(|_, entry| entry.status != TaskInsStatus::Exited);

            let mut queued = 0usize;
            let mut running_urls = Vec::new();
            for entry in entries.values().filter(|entry| entry.customer == customer) {
                match entry.status {
                    TaskInsStatus::Queued => queued += 1,
                    TaskInsStatus::Running => running_urls.push(entry.source_urls.clone()),
                    TaskInsStatus::Exited => {}
                }
            }
            (queued, running_urls)
        };

        let running = running_urls.len();
        let mut observed: u64 = 0;
        for url in running_urls.iter().flatten() {
            if let Some(progress) = self.progress.get_url_progress(url).await? {
                if self.counts_toward_speed(progress.percentage) {
                    observed += progress.speed.max(0) as u64;
                }
            }
        }

        let limit = compute_limit(cap, observed, running, queued, self.unlimited);
        debug!(
            "客户 {} 限速 {} 观测速度 {} 运行 {} 排队 {} 放行上限 {}",
            customer, cap, observed, running, queued, limit
        );
        Ok(limit)
    }
}

/// limit = ⌊(cap - observed) / (observed / running)⌋ - queued，下限为0
fn compute_limit(cap: u64, observed: u64, running: usize, queued: usize, unlimited: usize) -> usize {
    if observed >= cap {
        return 0;
    }
    if running == 0 || observed == 0 {
        return unlimited;
    }

    let avg_per_task = observed as f64 / running as f64;
    let headroom = ((cap - observed) as f64 / avg_per_task).floor() as usize;
    headroom.saturating_sub(queued)
}
