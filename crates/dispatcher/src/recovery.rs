use std::sync::Arc;

use tracing::{info, warn};

use transfer_core::SchedulerResult;
use transfer_domain::{RecoveryCounts, TaskStore};

use crate::blackout::{BlackoutReport, BlackoutScheduler};
use crate::fair_share::FairShareSelector;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub reset: RecoveryCounts,
    pub customers_registered: usize,
    pub blackout: BlackoutReport,
}

/// 进程启动恢复
///
/// 上一个实例的executor全部视为丢失，Running任务退回Pending，
/// 调度名单从存在Pending任务的客户重建，最后做一次禁用时段对账。
pub struct StartupRecovery {
    store: Arc<dyn TaskStore>,
    selector: Arc<FairShareSelector>,
    blackout: Arc<BlackoutScheduler>,
}

impl StartupRecovery {
    pub fn new(
        store: Arc<dyn TaskStore>,
        selector: Arc<FairShareSelector>,
        blackout: Arc<BlackoutScheduler>,
    ) -> Self {
        Self {
            store,
            selector,
            blackout,
        }
    }

    pub async fn run_at(&self, hour: u32) -> SchedulerResult<RecoveryReport> {
        info!("开始启动恢复");

        let reset = self.store.reset_cluster_state().await?;
        info!(
            "标记 {} 个executor为Lost，{} 个Running任务退回Pending",
            reset.executors_lost, reset.tasks_reset
        );

        let mut customers_registered = 0;
        for customer in self.store.list_pending_customers().await? {
            match self.selector.ensure_registered(&self.store, &customer).await {
                Ok(true) => customers_registered += 1,
                Ok(false) => {}
                Err(e) => warn!("客户 {} 加入调度名单失败: {}", customer, e),
            }
        }
        info!("调度名单重建完成，共 {} 个客户", customers_registered);

        let blackout = self.blackout.reconcile_at(hour).await?;

        Ok(RecoveryReport {
            reset,
            customers_registered,
            blackout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transfer_domain::{ExecutorStatus, JobStatus, Span, TaskStatus};
    use transfer_testing_utils::{new_tasks, ExecutorBuilder, JobBuilder, MockTaskStore};

    #[tokio::test]
    async fn test_recovery_resets_and_rebuilds_roster() {
        let store = MockTaskStore::new();
        store.add_customer("acme", 0).await;
        store.add_customer("night", 1).await;
        store.set_spans("night", vec![Span::new(0, 6)]).await;
        store
            .add_executor(ExecutorBuilder::new("e-old", "s-1").running(1).build())
            .await;

        let ids = store
            .seed_job(JobBuilder::new("job-a", "acme").build(), new_tasks("job-a", "acme", 2, 1))
            .await;
        store
            .update_task(ids[0], |task| {
                task.status = TaskStatus::Running;
                task.executor_id = Some("e-old".to_string());
            })
            .await;
        store
            .update_task(ids[1], |task| task.status = TaskStatus::Finished)
            .await;
        store
            .seed_job(JobBuilder::new("job-n", "night").build(), new_tasks("job-n", "night", 1, 1))
            .await;

        let shared: Arc<dyn TaskStore> = Arc::new(store.clone());
        let selector = Arc::new(FairShareSelector::new(3));
        let blackout = Arc::new(BlackoutScheduler::new(shared.clone(), selector.clone()));
        let recovery = StartupRecovery::new(shared, selector.clone(), blackout);

        let report = recovery.run_at(3).await.unwrap();

        assert_eq!(report.reset.executors_lost, 1);
        assert_eq!(report.reset.tasks_reset, 1);
        assert_eq!(report.customers_registered, 2);
        assert_eq!(report.blackout.suspended_jobs, 1);

        let reset_task = store.task(ids[0]).await.unwrap();
        assert_eq!(reset_task.status, TaskStatus::Pending);
        assert_eq!(reset_task.executor_id, None);
        assert_eq!(store.executor("e-old").await.unwrap().status, ExecutorStatus::Lost);
        assert_eq!(store.job("job-n").await.unwrap().status, JobStatus::Suspended);
        assert!(selector.exists("acme").await);
        assert!(selector.exists("night").await);
    }
}
