use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use transfer_core::{DispatcherConfig, ExecutorLossAction, SchedulerResult};
use transfer_domain::{
    DispatchTransaction, LaunchDirective, ReclaimedTask, StatusEvent, TaskState, TaskStatus,
    TaskStore, UrlUpdate,
};

use crate::completion::CompletionAggregator;
use crate::fair_share::FairShareSelector;
use crate::throughput::ThroughputGovernor;

/// 在分配事务内记录分发：executor计数加一、任务进入Scheduled、作业由Pending进入Scheduled
pub async fn record_dispatch(
    tx: &mut dyn DispatchTransaction,
    directives: &[LaunchDirective],
    dispatched_at: DateTime<Utc>,
) -> SchedulerResult<()> {
    let mut jobs = HashSet::new();
    for directive in directives {
        tx.upsert_executor(&directive.executor.executor_id, &directive.slave_id)
            .await?;
        tx.mark_task_scheduled(
            directive.task_id,
            &directive.executor.executor_id,
            dispatched_at,
        )
        .await?;
        if jobs.insert(directive.payload.job_id.as_str()) {
            tx.mark_job_scheduled(&directive.payload.job_id).await?;
        }
    }
    Ok(())
}

/// 任务、executor与slave的状态机
///
/// 所有转换都是条件更新，重复或乱序的事件不会产生副作用。
pub struct LifecycleStateMachine {
    store: Arc<dyn TaskStore>,
    selector: Arc<FairShareSelector>,
    governor: Arc<ThroughputGovernor>,
    completion: Arc<CompletionAggregator>,
    loss_action: ExecutorLossAction,
    cascade_scheduled: bool,
}

impl LifecycleStateMachine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        selector: Arc<FairShareSelector>,
        governor: Arc<ThroughputGovernor>,
        completion: Arc<CompletionAggregator>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            store,
            selector,
            governor,
            completion,
            loss_action: config.executor_loss_action,
            cascade_scheduled: config.cascade_scheduled_on_executor_loss,
        }
    }

    #[instrument(skip(self), fields(task_id = event.task_id, state = %event.state))]
    pub async fn handle_status_event(&self, event: &StatusEvent) -> SchedulerResult<()> {
        counter!("transfer_status_events_total", "state" => event.state.as_str()).increment(1);
        let executor_id = event.executor_id.as_deref();

        match event.state {
            TaskState::Staging | TaskState::Starting | TaskState::Killed => {
                debug!("任务 {} 状态 {}，无需处理", event.task_id, event.state);
            }
            TaskState::Running => {
                if self.store.mark_task_running(event.task_id, executor_id).await? {
                    self.governor.mark_running(event.task_id).await;
                    debug!("任务 {} 开始运行", event.task_id);
                } else {
                    debug!("任务 {} 不处于Scheduled或已重新分发，忽略Running事件", event.task_id);
                }
            }
            TaskState::Finished => {
                self.complete(event.task_id, executor_id, TaskStatus::Finished)
                    .await?
            }
            TaskState::Failed | TaskState::Error => {
                if let Some(message) = &event.message {
                    warn!("任务 {} 失败: {}", event.task_id, message);
                }
                self.complete(event.task_id, executor_id, TaskStatus::Failed)
                    .await?
            }
            TaskState::Lost => match self.store.reclaim_task(event.task_id, executor_id).await? {
                Some(reclaimed) => {
                    info!("任务 {} 丢失，退回Pending等待重新分发", event.task_id);
                    self.governor.mark_exited(event.task_id).await;
                    self.reregister(&reclaimed.customer).await;
                }
                None => debug!("任务 {} 不在执行中，忽略Lost事件", event.task_id),
            },
        }

        Ok(())
    }

    async fn complete(
        &self,
        task_id: i64,
        executor_id: Option<&str>,
        status: TaskStatus,
    ) -> SchedulerResult<()> {
        if !self.store.complete_task(task_id, executor_id, status).await? {
            debug!("任务 {} 已处于终态或未分发，忽略重复的{}事件", task_id, status);
            return Ok(());
        }

        self.governor.mark_exited(task_id).await;
        self.completion.try_finish(task_id).await?;
        Ok(())
    }

    /// worker上报的单个URL结果
    pub async fn handle_url_update(&self, update: &UrlUpdate) -> SchedulerResult<()> {
        if self.store.update_url_progress(update).await? {
            debug!(
                "任务 {} 的URL {} 状态更新为 {}",
                update.task_id, update.origin_url, update.status
            );
        } else {
            warn!(
                "任务 {} 下不存在URL {}，忽略该消息",
                update.task_id, update.origin_url
            );
        }
        Ok(())
    }

    /// 返回受影响的任务数
    #[instrument(skip(self))]
    pub async fn handle_executor_lost(&self, executor_id: &str) -> SchedulerResult<usize> {
        let affected = self
            .store
            .mark_executor_lost(executor_id, self.loss_action, self.cascade_scheduled)
            .await?;

        info!(
            "Executor {} 丢失，{} 个任务按 {:?} 策略处理",
            executor_id,
            affected.len(),
            self.loss_action
        );
        self.settle(&affected).await;
        Ok(affected.len())
    }

    #[instrument(skip(self))]
    pub async fn handle_slave_lost(&self, slave_id: &str) -> SchedulerResult<usize> {
        let executors = self.store.mark_slave_lost(slave_id).await?;
        info!("Slave {} 丢失，级联处理 {} 个executor", slave_id, executors.len());

        let mut affected = 0;
        for executor_id in executors {
            affected += self.handle_executor_lost(&executor_id).await?;
        }
        Ok(affected)
    }

    async fn settle(&self, affected: &[ReclaimedTask]) {
        let mut customers = HashSet::new();
        let mut jobs = HashSet::new();

        for task in affected {
            self.governor.mark_exited(task.task_id).await;
            match task.status {
                TaskStatus::Pending => {
                    customers.insert(task.customer.as_str());
                }
                TaskStatus::Failed => {
                    jobs.insert(task.job_id.as_str());
                }
                _ => {}
            }
        }

        for customer in customers {
            self.reregister(customer).await;
        }

        for job_id in jobs {
            if let Err(e) = self.completion.try_finish_job(job_id).await {
                warn!("作业 {} 完成检查失败: {}", job_id, e);
            }
        }
    }

    /// 任务回到Pending后确保客户重新出现在调度名单中
    pub(crate) async fn reregister(&self, customer: &str) {
        if let Err(e) = self.selector.ensure_registered(&self.store, customer).await {
            warn!("客户 {} 重新加入调度名单失败: {}", customer, e);
        }
    }
}
