use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use transfer_core::SchedulerResult;
use transfer_domain::{CompletionNotifier, JobStatus, TaskId, TaskStore};

/// 作业完成聚合器
///
/// 作业下全部任务进入终态后写入作业终态，并在配置了回调时投递一次汇总。
pub struct CompletionAggregator {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn CompletionNotifier>,
}

impl CompletionAggregator {
    pub fn new(store: Arc<dyn TaskStore>, notifier: Arc<dyn CompletionNotifier>) -> Self {
        Self { store, notifier }
    }

    /// 任务进入Finished/Failed后调用
    pub async fn try_finish(&self, task_id: TaskId) -> SchedulerResult<Option<JobStatus>> {
        match self.store.job_id_of_task(task_id).await? {
            Some(job_id) => self.try_finish_job(&job_id).await,
            None => {
                warn!("任务 {} 没有对应的作业，跳过完成检查", task_id);
                Ok(None)
            }
        }
    }

    /// 返回本次调用写入的作业终态；作业仍在进行或已被其它调用终结时返回None
    #[instrument(skip(self))]
    pub async fn try_finish_job(&self, job_id: &str) -> SchedulerResult<Option<JobStatus>> {
        let counts = self.store.query_job_task_counts(job_id).await?;
        if !counts.all_terminal() {
            debug!(
                "作业 {} 尚未完成: 成功 {} 失败 {} 总数 {}",
                job_id, counts.finished, counts.failed, counts.total
            );
            return Ok(None);
        }

        let status = if counts.failed > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Finished
        };
        let finished_bytes = self.store.finished_bytes(job_id).await?;

        if !self
            .store
            .finalize_job(job_id, status, finished_bytes, Utc::now())
            .await?
        {
            debug!("作业 {} 已经终结，忽略重复的完成检查", job_id);
            return Ok(None);
        }

        counter!("transfer_jobs_finalized_total", "status" => status.as_str()).increment(1);
        info!(
            "作业 {} 完成，状态 {}，成功任务 {}，失败任务 {}，完成字节 {}",
            job_id, status, counts.finished, counts.failed, finished_bytes
        );

        self.notify(job_id).await;
        Ok(Some(status))
    }

    async fn notify(&self, job_id: &str) {
        let target = match self.store.job_callback(job_id).await {
            Ok(Some(target)) => target,
            Ok(None) => return,
            Err(e) => {
                warn!("读取作业 {} 的回调地址失败: {}", job_id, e);
                return;
            }
        };

        let summary = match self.store.job_summary(job_id).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("生成作业 {} 的完成汇总失败: {}", job_id, e);
                return;
            }
        };

        if self.notifier.deliver(&target, &summary).await {
            info!("作业 {} 完成回调已送达 {}", job_id, target.url);
        } else {
            warn!("作业 {} 完成回调投递失败: {}", job_id, target.url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transfer_domain::TaskStatus;
    use transfer_testing_utils::{new_tasks, JobBuilder, MockNotifier, MockTaskStore};

    #[tokio::test]
    async fn test_summary_delivered_once_after_last_task() {
        let store = MockTaskStore::new();
        let job = JobBuilder::new("job-1", "acme")
            .with_callback("http://cb.example.com/done", Some("token=t"))
            .build();
        let ids = store.seed_job(job, new_tasks("job-1", "acme", 2, 1)).await;
        for id in &ids {
            store
                .update_task(*id, |task| task.status = TaskStatus::Running)
                .await;
        }
        let notifier = MockNotifier::new();
        let aggregator = CompletionAggregator::new(Arc::new(store.clone()), Arc::new(notifier.clone()));

        store.complete_task(ids[0], None, TaskStatus::Finished).await.unwrap();
        assert_eq!(aggregator.try_finish(ids[0]).await.unwrap(), None);
        assert!(notifier.deliveries().is_empty());

        store.complete_task(ids[1], None, TaskStatus::Finished).await.unwrap();
        assert_eq!(
            aggregator.try_finish(ids[1]).await.unwrap(),
            Some(JobStatus::Finished)
        );
        assert_eq!(aggregator.try_finish(ids[1]).await.unwrap(), None);

        let deliveries = notifier.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0.endpoint(), "http://cb.example.com/done?token=t");
        assert_eq!(deliveries[0].1.success_urls.len(), 2);

        let job = store.job("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_fail_aggregation() {
        let store = MockTaskStore::new();
        let job = JobBuilder::new("job-2", "acme")
            .with_callback("http://cb.example.com/done", None)
            .build();
        let ids = store.seed_job(job, new_tasks("job-2", "acme", 1, 1)).await;
        store
            .update_task(ids[0], |task| task.status = TaskStatus::Running)
            .await;
        store.complete_task(ids[0], None, TaskStatus::Failed).await.unwrap();

        let aggregator =
            CompletionAggregator::new(Arc::new(store.clone()), Arc::new(MockNotifier::failing()));
        assert_eq!(
            aggregator.try_finish(ids[0]).await.unwrap(),
            Some(JobStatus::Failed)
        );
    }
}
