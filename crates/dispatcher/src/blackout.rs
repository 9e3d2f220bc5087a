use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use metrics::counter;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, instrument, warn};

use transfer_core::SchedulerResult;
use transfer_domain::{Span, TaskStore};

use crate::fair_share::FairShareSelector;

/// 一次对账的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlackoutReport {
    pub suspended_jobs: u64,
    pub resumed_jobs: u64,
}

/// 当前本地小时
pub fn current_hour() -> u32 {
    Local::now().hour()
}

/// 距下一个整点的时长
pub fn duration_until_next_hour(now: DateTime<Local>) -> Duration {
    let elapsed = u64::from(now.minute()) * 60 + u64::from(now.second());
    Duration::from_secs(3600 - elapsed.min(3599))
}

/// 禁用时段调度器
///
/// 每次都对所有客户做完整对账：当前小时落在时段内的客户，其Pending作业转为Suspended；
/// 不在任何时段内的客户，其Suspended作业恢复为Pending。重复执行结果不变。
pub struct BlackoutScheduler {
    store: Arc<dyn TaskStore>,
    selector: Arc<FairShareSelector>,
    notify: Notify,
}

impl BlackoutScheduler {
    pub fn new(store: Arc<dyn TaskStore>, selector: Arc<FairShareSelector>) -> Self {
        Self {
            store,
            selector,
            notify: Notify::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn reconcile_at(&self, hour: u32) -> SchedulerResult<BlackoutReport> {
        let spans = self.store.list_customer_spans().await?;
        let suspended = self.store.list_suspended_customers().await?;

        let customers: BTreeSet<&str> = spans
            .keys()
            .map(String::as_str)
            .chain(suspended.iter().map(String::as_str))
            .collect();

        let mut report = BlackoutReport::default();
        for customer in customers {
            let customer_spans = spans.get(customer).map(Vec::as_slice).unwrap_or(&[]);
            self.selector
                .update_spans(customer, customer_spans.to_vec())
                .await;

            if Span::any_contains(customer_spans, hour) {
                match self.store.suspend_customer_jobs(customer).await {
                    Ok(0) => {}
                    Ok(count) => {
                        info!("客户 {} 进入禁用时段，暂停 {} 个作业", customer, count);
                        report.suspended_jobs += count;
                    }
                    Err(e) => warn!("暂停客户 {} 的作业失败: {}", customer, e),
                }
            } else {
                match self.store.resume_customer_jobs(customer).await {
                    Ok(0) => {}
                    Ok(count) => {
                        info!("客户 {} 离开禁用时段，恢复 {} 个作业", customer, count);
                        report.resumed_jobs += count;
                        if let Err(e) = self.selector.ensure_registered(&self.store, customer).await
                        {
                            warn!("客户 {} 重新加入调度名单失败: {}", customer, e);
                        }
                    }
                    Err(e) => warn!("恢复客户 {} 的作业失败: {}", customer, e),
                }
            }
        }

        counter!("transfer_blackout_suspended_jobs_total").increment(report.suspended_jobs);
        counter!("transfer_blackout_resumed_jobs_total").increment(report.resumed_jobs);
        Ok(report)
    }

    /// 整体替换客户的时间段并触发一次立即对账
    pub async fn update_customer_spans(&self, customer: &str, spans: Vec<Span>) -> SchedulerResult<()> {
        self.store.replace_customer_spans(customer, &spans).await?;
        if self.selector.update_spans(customer, spans).await {
            debug!("更新调度名单中客户 {} 的时间段", customer);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// 在整点或收到时间段变更通知时对账
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("启动禁用时段调度循环");

        loop {
            let wait = duration_until_next_hour(Local::now());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    debug!("整点触发禁用时段对账");
                }
                _ = self.notify.notified() => {
                    debug!("时段配置变更触发对账");
                }
                _ = shutdown.recv() => {
                    info!("收到停止信号，退出禁用时段调度循环");
                    break;
                }
            }

            if let Err(e) = self.reconcile_at(current_hour()).await {
                error!("禁用时段对账失败: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use transfer_domain::{JobStatus, TaskStatus};
    use transfer_testing_utils::{new_tasks, JobBuilder, MockTaskStore, TestEnv};

    async fn fixture() -> (MockTaskStore, Arc<FairShareSelector>, BlackoutScheduler) {
        let store = MockTaskStore::new();
        store.add_customer("night", 0).await;
        store.set_spans("night", vec![Span::new(0, 6)]).await;
        store
            .seed_job(JobBuilder::new("job-1", "night").build(), new_tasks("job-1", "night", 2, 1))
            .await;
        let selector = Arc::new(FairShareSelector::new(3));
        selector.add("night", 0, Vec::new()).await;
        let scheduler = BlackoutScheduler::new(Arc::new(store.clone()), selector.clone());
        (store, selector, scheduler)
    }

    #[tokio::test]
    async fn test_suspend_then_resume() {
        let (store, selector, scheduler) = fixture().await;

        let report = scheduler.reconcile_at(2).await.unwrap();
        assert_eq!(report.suspended_jobs, 1);
        assert_eq!(store.job("job-1").await.unwrap().status, JobStatus::Suspended);
        assert_eq!(store.tasks_with_status(TaskStatus::Suspended).await.len(), 2);
        assert_eq!(selector.entry("night").await.unwrap().spans, vec![Span::new(0, 6)]);

        // 重复对账无副作用
        assert_eq!(scheduler.reconcile_at(3).await.unwrap(), BlackoutReport::default());

        selector.remove("night").await;
        let report = scheduler.reconcile_at(6).await.unwrap();
        assert_eq!(report.resumed_jobs, 1);
        assert_eq!(store.job("job-1").await.unwrap().status, JobStatus::Pending);
        assert_eq!(store.tasks_with_status(TaskStatus::Pending).await.len(), 2);
        assert!(selector.exists("night").await);
    }

    #[tokio::test]
    async fn test_running_tasks_untouched() {
        let (store, _selector, scheduler) = fixture().await;
        let running = store.tasks_with_status(TaskStatus::Pending).await[0].id;
        store
            .update_task(running, |task| task.status = TaskStatus::Running)
            .await;

        scheduler.reconcile_at(1).await.unwrap();
        assert_eq!(store.task(running).await.unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_removed_spans_resume_suspended_customer() {
        let (store, _selector, scheduler) = fixture().await;
        scheduler.reconcile_at(1).await.unwrap();

        scheduler.update_customer_spans("night", Vec::new()).await.unwrap();
        let report = scheduler.reconcile_at(1).await.unwrap();
        assert_eq!(report.resumed_jobs, 1);
        assert!(store.query_customer_spans("night").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_span_update_wakes_loop() {
        let (store, _selector, scheduler) = fixture().await;
        let scheduler = Arc::new(scheduler);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        let all_day = vec![Span::new(0, 24)];
        scheduler.update_customer_spans("night", all_day).await.unwrap();

        let suspended = TestEnv::wait_for(
            || {
                let store = store.clone();
                async move {
                    store.job("job-1").await.map(|job| job.status) == Some(JobStatus::Suspended)
                }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(suspended);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_duration_until_next_hour() {
        let now = Local.with_ymd_and_hms(2024, 3, 1, 10, 59, 30).unwrap();
        assert_eq!(duration_until_next_hour(now), Duration::from_secs(30));
        let now = Local.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(duration_until_next_hour(now), Duration::from_secs(3600));
    }
}
