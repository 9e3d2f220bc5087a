use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use transfer_core::{SchedulerError, SchedulerResult};
use transfer_domain::{CallbackTarget, CustomerId, Destination, Job, JobId, NewTask, TaskStore};

use crate::fair_share::FairShareSelector;

/// 一次作业提交
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub customer: CustomerId,
    pub source_urls: Vec<String>,
    pub destination: Destination,
    #[serde(default)]
    pub callback: Option<CallbackTarget>,
}

/// 作业接收：写入作业、按批拆分任务并登记客户
pub struct JobIntake {
    store: Arc<dyn TaskStore>,
    selector: Arc<FairShareSelector>,
    files_per_task: usize,
}

impl JobIntake {
    pub fn new(store: Arc<dyn TaskStore>, selector: Arc<FairShareSelector>, files_per_task: usize) -> Self {
        Self {
            store,
            selector,
            files_per_task: files_per_task.max(1),
        }
    }

    #[instrument(skip(self, submission), fields(customer = %submission.customer))]
    pub async fn submit(&self, submission: JobSubmission) -> SchedulerResult<JobId> {
        if submission.customer.is_empty() {
            return Err(SchedulerError::InvalidSubmission("客户不能为空".to_string()));
        }
        if submission.source_urls.is_empty() {
            return Err(SchedulerError::InvalidSubmission("源URL列表不能为空".to_string()));
        }

        let job_id = Uuid::new_v4().to_string();
        let job = Job::new(job_id.clone(), submission.customer.clone(), submission.callback);
        self.store.insert_job(&job).await?;

        let tasks: Vec<NewTask> = submission
            .source_urls
            .chunks(self.files_per_task)
            .map(|urls| NewTask {
                job_id: job_id.clone(),
                customer: submission.customer.clone(),
                source_urls: urls.to_vec(),
                destination: submission.destination.clone(),
            })
            .collect();
        let task_ids = self.store.insert_tasks(&tasks).await?;
        info!(
            "作业 {} 已接收，{} 个URL拆分为 {} 个任务",
            job_id,
            submission.source_urls.len(),
            task_ids.len()
        );

        if let Err(e) = self
            .selector
            .ensure_registered(&self.store, &submission.customer)
            .await
        {
            warn!("客户 {} 加入调度名单失败: {}", submission.customer, e);
        }

        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transfer_domain::{JobStatus, TaskStatus};
    use transfer_testing_utils::{test_destination, MockTaskStore};

    fn submission(customer: &str, urls: usize) -> JobSubmission {
        JobSubmission {
            customer: customer.to_string(),
            source_urls: (0..urls).map(|i| format!("http://origin/{i}")).collect(),
            destination: test_destination(),
            callback: None,
        }
    }

    #[tokio::test]
    async fn test_submit_splits_into_batches() {
        let store = MockTaskStore::new();
        store.add_customer("acme", 1).await;
        let selector = Arc::new(FairShareSelector::new(3));
        let intake = JobIntake::new(Arc::new(store.clone()), selector.clone(), 10);

        let job_id = intake.submit(submission("acme", 25)).await.unwrap();

        assert_eq!(store.job(&job_id).await.unwrap().status, JobStatus::Pending);
        let mut sizes: Vec<usize> = store
            .tasks_with_status(TaskStatus::Pending)
            .await
            .iter()
            .map(|task| task.source_urls.len())
            .collect();
        sizes.sort();
        assert_eq!(sizes, vec![5, 10, 10]);
        assert_eq!(store.urls_of_job(&job_id).await.len(), 25);
        assert_eq!(selector.entry("acme").await.unwrap().tier, 1);
    }

    #[tokio::test]
    async fn test_empty_submission_rejected() {
        let store = MockTaskStore::new();
        let intake = JobIntake::new(Arc::new(store.clone()), Arc::new(FairShareSelector::new(3)), 10);

        let err = intake.submit(submission("acme", 0)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSubmission(_)));
        assert!(intake.submit(submission("", 3)).await.is_err());
    }
}
