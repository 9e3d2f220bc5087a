use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use transfer_core::SchedulerResult;
use transfer_domain::TaskStore;

use crate::fair_share::FairShareSelector;
use crate::throughput::ThroughputGovernor;

/// 回收长时间停留在Scheduled而未上报Running的任务
pub struct StaleDispatchReaper {
    store: Arc<dyn TaskStore>,
    selector: Arc<FairShareSelector>,
    governor: Arc<ThroughputGovernor>,
    timeout: Duration,
}

impl StaleDispatchReaper {
    pub fn new(
        store: Arc<dyn TaskStore>,
        selector: Arc<FairShareSelector>,
        governor: Arc<ThroughputGovernor>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            selector,
            governor,
            timeout,
        }
    }

    /// 回收分发时间早于 now - timeout 的任务，返回回收数
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let timeout = chrono::Duration::from_std(self.timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let scheduled = self.store.list_scheduled_tasks().await?;

        let mut reclaimed = 0;
        for task in scheduled {
            if now - task.dispatched_at <= timeout {
                continue;
            }

            match self
                .store
                .reclaim_stale_task(task.task_id, task.dispatched_at)
                .await
            {
                Ok(Some(reclaimed_task)) => {
                    reclaimed += 1;
                    warn!(
                        "任务 {} 分发到 executor {:?} 后超时未运行，退回Pending",
                        task.task_id, task.executor_id
                    );
                    self.governor.mark_exited(task.task_id).await;
                    if let Err(e) = self
                        .selector
                        .ensure_registered(&self.store, &reclaimed_task.customer)
                        .await
                    {
                        warn!("客户 {} 重新加入调度名单失败: {}", reclaimed_task.customer, e);
                    }
                }
                Ok(None) => debug!("任务 {} 状态已变化，跳过回收", task.task_id),
                Err(e) => error!("回收任务 {} 失败: {}", task.task_id, e),
            }
        }

        if reclaimed > 0 {
            counter!("transfer_reaper_reclaimed_total").increment(reclaimed as u64);
        }
        Ok(reclaimed)
    }

    /// 以超时时间为周期运行，单次扫描超时则顺延下一次
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("启动超时分发回收循环，周期 {:?}", self.timeout);

        let mut ticker = tokio::time::interval(self.timeout);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次tick立即返回，启动时无需扫描
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_at(Utc::now()).await {
                        Ok(0) => debug!("没有超时的分发"),
                        Ok(count) => info!("回收了 {} 个超时任务", count),
                        Err(e) => error!("超时分发扫描失败: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    info!("收到停止信号，退出超时分发回收循环");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transfer_core::ThrottleConfig;
    use transfer_domain::TaskStatus;
    use transfer_testing_utils::{
        new_tasks, ExecutorBuilder, JobBuilder, MockProgressStore, MockTaskStore, TestEnv,
    };

    const TIMEOUT_SECS: u64 = 300;

    async fn scheduled_fixture(dispatched_at: DateTime<Utc>) -> (MockTaskStore, i64) {
        let store = MockTaskStore::new();
        store.add_customer("acme", 0).await;
        store
            .add_executor(ExecutorBuilder::new("e-1", "s-1").running(1).build())
            .await;
        let ids = store
            .seed_job(JobBuilder::new("job-1", "acme").build(), new_tasks("job-1", "acme", 1, 1))
            .await;
        store
            .update_task(ids[0], |task| {
                task.status = TaskStatus::Scheduled;
                task.executor_id = Some("e-1".to_string());
                task.dispatched_at = Some(dispatched_at);
            })
            .await;
        (store, ids[0])
    }

    fn build_reaper(
        store: &MockTaskStore,
        selector: Arc<FairShareSelector>,
        timeout: Duration,
    ) -> StaleDispatchReaper {
        let governor = Arc::new(ThroughputGovernor::new(
            Arc::new(MockProgressStore::new()),
            &ThrottleConfig::default(),
        ));
        StaleDispatchReaper::new(Arc::new(store.clone()), selector, governor, timeout)
    }

    #[tokio::test]
    async fn test_not_reclaimed_before_timeout() {
        let dispatched_at = Utc::now();
        let (store, task_id) = scheduled_fixture(dispatched_at).await;
        let reaper = build_reaper(
            &store,
            Arc::new(FairShareSelector::new(3)),
            Duration::from_secs(TIMEOUT_SECS),
        );

        let now = dispatched_at + chrono::Duration::seconds(TIMEOUT_SECS as i64)
            - chrono::Duration::milliseconds(1);
        assert_eq!(reaper.sweep_at(now).await.unwrap(), 0);
        assert_eq!(store.task(task_id).await.unwrap().status, TaskStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_reclaimed_after_timeout() {
        let dispatched_at = Utc::now();
        let (store, task_id) = scheduled_fixture(dispatched_at).await;
        let selector = Arc::new(FairShareSelector::new(3));
        let reaper = build_reaper(&store, selector.clone(), Duration::from_secs(TIMEOUT_SECS));

        let now = dispatched_at
            + chrono::Duration::seconds(TIMEOUT_SECS as i64)
            + chrono::Duration::milliseconds(1);
        assert_eq!(reaper.sweep_at(now).await.unwrap(), 1);

        let task = store.task(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.executor_id, None);
        assert_eq!(task.dispatched_at, None);
        assert_eq!(store.executor("e-1").await.unwrap().running_count, 0);
        assert!(selector.exists("acme").await);

        // 再次扫描不会重复回收
        assert_eq!(reaper.sweep_at(now).await.unwrap(), 0);
        assert_eq!(store.executor("e-1").await.unwrap().running_count, 0);
    }

    #[tokio::test]
    async fn test_run_loop_reclaims_and_stops() {
        let dispatched_at = Utc::now() - chrono::Duration::seconds(10);
        let (store, task_id) = scheduled_fixture(dispatched_at).await;
        let reaper = Arc::new(build_reaper(
            &store,
            Arc::new(FairShareSelector::new(3)),
            Duration::from_millis(50),
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = {
            let reaper = reaper.clone();
            tokio::spawn(async move { reaper.run(shutdown_rx).await })
        };

        let reclaimed = TestEnv::wait_for(
            || {
                let store = store.clone();
                async move {
                    store.task(task_id).await.map(|task| task.status) == Some(TaskStatus::Pending)
                }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(reclaimed);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper loop did not stop")
            .unwrap();
    }
}
