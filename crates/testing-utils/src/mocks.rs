//! In-memory implementations of the store, progress and notifier traits
//!
//! `MockTaskStore` keeps all rows behind a single `tokio::sync::Mutex`. A dispatch
//! transaction holds the owned guard for its whole lifetime, so concurrent offers
//! serialize the same way row locks serialize them in Postgres. Rollback (explicit
//! or by dropping the transaction) restores the snapshot taken at `begin_dispatch`.
//! Code under test must not call other store methods while it holds a transaction.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use transfer_core::{ExecutorLossAction, SchedulerError, SchedulerResult};
use transfer_domain::{
    CallbackTarget, CompletionNotifier, CustomerId, DispatchTransaction, Executor, ExecutorId,
    ExecutorStatus, Job, JobId, JobStatus, JobSummary, NewTask, ProgressStore, ReclaimedTask,
    RecoveryCounts, ScheduledTask, Slave, SlaveId, SlaveStatus, Span, Task, TaskCounts, TaskId,
    TaskStatus, TaskStore, UrlProgress, UrlStatus, UrlUpdate,
};

/// One source URL row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRecord {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub origin_url: String,
    pub target_url: Option<String>,
    pub status: UrlStatus,
    pub size: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MockStoreState {
    pub jobs: HashMap<JobId, Job>,
    pub tasks: BTreeMap<TaskId, Task>,
    pub urls: Vec<UrlRecord>,
    pub slaves: HashMap<SlaveId, Slave>,
    pub executors: HashMap<ExecutorId, Executor>,
    pub customers: HashMap<CustomerId, i32>,
    pub spans: HashMap<CustomerId, Vec<Span>>,
    pub next_task_id: TaskId,
}

impl MockStoreState {
    fn decrement_executor(&mut self, executor_id: Option<&str>) {
        if let Some(executor) = executor_id.and_then(|id| self.executors.get_mut(id)) {
            executor.running_count = (executor.running_count - 1).max(0);
        }
    }

    fn set_url_status(&mut self, task_id: TaskId, from: UrlStatus, to: UrlStatus) {
        self.urls
            .iter_mut()
            .filter(|url| url.task_id == task_id && url.status == from)
            .for_each(|url| url.status = to);
    }

    /// Scheduled/Running -> Pending, releasing the executor slot
    fn reclaim(&mut self, task_id: TaskId) -> Option<ReclaimedTask> {
        let task = self.tasks.get_mut(&task_id)?;
        if !task.status.holds_executor() {
            return None;
        }
        task.status = TaskStatus::Pending;
        task.dispatched_at = None;
        let executor_id = task.executor_id.take();
        let reclaimed = ReclaimedTask {
            task_id,
            job_id: task.job_id.clone(),
            customer: task.customer.clone(),
            status: TaskStatus::Pending,
        };
        self.decrement_executor(executor_id.as_deref());
        Some(reclaimed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockTaskStore {
    state: Arc<Mutex<MockStoreState>>,
    failing: Arc<StdMutex<HashSet<&'static str>>>,
}

impl MockTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named operation return a database error until cleared
    pub fn fail_on(&self, operation: &'static str) {
        self.failing
            .lock()
            .expect("failure set poisoned")
            .insert(operation);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().expect("failure set poisoned").clear();
    }

    fn check(&self, operation: &'static str) -> SchedulerResult<()> {
        if self
            .failing
            .lock()
            .expect("failure set poisoned")
            .contains(operation)
        {
            return Err(SchedulerError::DatabaseOperation(format!(
                "injected failure: {operation}"
            )));
        }
        Ok(())
    }

    pub async fn add_customer(&self, customer: &str, priority: i32) {
        self.state
            .lock()
            .await
            .customers
            .insert(customer.to_string(), priority);
    }

    /// Insert a job and its tasks, one URL row per source url
    pub async fn seed_job(&self, job: Job, tasks: Vec<NewTask>) -> Vec<TaskId> {
        self.insert_job(&job).await.expect("seed job");
        self.insert_tasks(&tasks).await.expect("seed tasks")
    }

    pub async fn add_executor(&self, executor: Executor) {
        self.state
            .lock()
            .await
            .executors
            .insert(executor.id.clone(), executor);
    }

    pub async fn set_spans(&self, customer: &str, spans: Vec<Span>) {
        self.state
            .lock()
            .await
            .spans
            .insert(customer.to_string(), spans);
    }

    pub async fn task(&self, task_id: TaskId) -> Option<Task> {
        self.state.lock().await.tasks.get(&task_id).cloned()
    }

    pub async fn tasks_with_status(&self, status: TaskStatus) -> Vec<Task> {
        self.state
            .lock()
            .await
            .tasks
            .values()
            .filter(|task| task.status == status)
            .cloned()
            .collect()
    }

    pub async fn job(&self, job_id: &str) -> Option<Job> {
        self.state.lock().await.jobs.get(job_id).cloned()
    }

    pub async fn executor(&self, executor_id: &str) -> Option<Executor> {
        self.state.lock().await.executors.get(executor_id).cloned()
    }

    pub async fn executors(&self) -> Vec<Executor> {
        self.state.lock().await.executors.values().cloned().collect()
    }

    pub async fn slave(&self, slave_id: &str) -> Option<Slave> {
        self.state.lock().await.slaves.get(slave_id).cloned()
    }

    pub async fn urls_of_job(&self, job_id: &str) -> Vec<UrlRecord> {
        self.state
            .lock()
            .await
            .urls
            .iter()
            .filter(|url| url.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Direct mutation for arranging test fixtures
    pub async fn update_task<F>(&self, task_id: TaskId, f: F)
    where
        F: FnOnce(&mut Task),
    {
        if let Some(task) = self.state.lock().await.tasks.get_mut(&task_id) {
            f(task);
        }
    }
}

pub struct MockDispatchTransaction {
    guard: OwnedMutexGuard<MockStoreState>,
    snapshot: Option<MockStoreState>,
    fail_commit: bool,
}

impl Drop for MockDispatchTransaction {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl DispatchTransaction for MockDispatchTransaction {
    async fn query_idle_executors(
        &mut self,
        slave_id: &str,
        idle_threshold: i32,
    ) -> SchedulerResult<Vec<Executor>> {
        let mut idle: Vec<Executor> = self
            .guard
            .executors
            .values()
            .filter(|executor| executor.slave_id == slave_id && executor.is_idle(idle_threshold))
            .cloned()
            .collect();
        idle.sort_by(|a, b| {
            a.running_count
                .cmp(&b.running_count)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(idle)
    }

    async fn query_pending_tasks(
        &mut self,
        customer: &str,
        destination_kinds: &[String],
        limit: usize,
    ) -> SchedulerResult<Vec<Task>> {
        Ok(self
            .guard
            .tasks
            .values()
            .filter(|task| task.customer == customer && task.status == TaskStatus::Pending)
            .filter(|task| {
                destination_kinds.is_empty() || destination_kinds.contains(&task.destination.kind)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_executor(&mut self, executor_id: &str, slave_id: &str) -> SchedulerResult<()> {
        self.guard
            .executors
            .entry(executor_id.to_string())
            .and_modify(|executor| executor.running_count += 1)
            .or_insert_with(|| Executor {
                id: executor_id.to_string(),
                slave_id: slave_id.to_string(),
                running_count: 1,
                status: ExecutorStatus::Scheduled,
            });
        Ok(())
    }

    async fn mark_task_scheduled(
        &mut self,
        task_id: TaskId,
        executor_id: &str,
        dispatched_at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let task = self
            .guard
            .tasks
            .get_mut(&task_id)
            .ok_or(SchedulerError::TaskNotFound { id: task_id })?;
        task.status = TaskStatus::Scheduled;
        task.executor_id = Some(executor_id.to_string());
        task.dispatched_at = Some(dispatched_at);
        Ok(())
    }

    async fn mark_job_scheduled(&mut self, job_id: &str) -> SchedulerResult<()> {
        if let Some(job) = self.guard.jobs.get_mut(job_id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Scheduled;
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SchedulerResult<()> {
        let mut this = self;
        if this.fail_commit {
            return Err(SchedulerError::DatabaseOperation(
                "injected failure: commit".to_string(),
            ));
        }
        this.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> SchedulerResult<()> {
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn insert_job(&self, job: &Job) -> SchedulerResult<()> {
        self.check("insert_job")?;
        self.state
            .lock()
            .await
            .jobs
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn insert_tasks(&self, tasks: &[NewTask]) -> SchedulerResult<Vec<TaskId>> {
        self.check("insert_tasks")?;
        let mut state = self.state.lock().await;
        let mut ids = Vec::with_capacity(tasks.len());
        for new_task in tasks {
            state.next_task_id += 1;
            let id = state.next_task_id;
            for url in &new_task.source_urls {
                state.urls.push(UrlRecord {
                    task_id: id,
                    job_id: new_task.job_id.clone(),
                    origin_url: url.clone(),
                    target_url: None,
                    status: UrlStatus::Pending,
                    size: 0,
                });
            }
            state.tasks.insert(
                id,
                Task {
                    id,
                    job_id: new_task.job_id.clone(),
                    customer: new_task.customer.clone(),
                    source_urls: new_task.source_urls.clone(),
                    destination: new_task.destination.clone(),
                    status: TaskStatus::Pending,
                    executor_id: None,
                    dispatched_at: None,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn upsert_slave(&self, slave: &Slave) -> SchedulerResult<()> {
        self.check("upsert_slave")?;
        self.state
            .lock()
            .await
            .slaves
            .insert(slave.id.clone(), slave.clone());
        Ok(())
    }

    async fn begin_dispatch(&self) -> SchedulerResult<Box<dyn DispatchTransaction>> {
        self.check("begin_dispatch")?;
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MockDispatchTransaction {
            guard,
            snapshot: Some(snapshot),
            fail_commit: self.check("commit").is_err(),
        }))
    }

    async fn mark_task_running(
        &self,
        task_id: TaskId,
        executor_id: Option<&str>,
    ) -> SchedulerResult<bool> {
        self.check("mark_task_running")?;
        let mut state = self.state.lock().await;
        let job_id = match state.tasks.get_mut(&task_id) {
            Some(task)
                if task.status == TaskStatus::Scheduled && task.assigned_to(executor_id) =>
            {
                task.status = TaskStatus::Running;
                task.job_id.clone()
            }
            _ => return Ok(false),
        };
        if let Some(job) = state.jobs.get_mut(&job_id) {
            if job.status == JobStatus::Scheduled {
                job.status = JobStatus::Running;
            }
        }
        Ok(true)
    }

    async fn complete_task(
        &self,
        task_id: TaskId,
        executor_id: Option<&str>,
        status: TaskStatus,
    ) -> SchedulerResult<bool> {
        self.check("complete_task")?;
        let mut state = self.state.lock().await;
        let executor_id = match state.tasks.get_mut(&task_id) {
            Some(task) if task.status.holds_executor() && task.assigned_to(executor_id) => {
                task.status = status;
                task.executor_id.take()
            }
            _ => return Ok(false),
        };
        state.decrement_executor(executor_id.as_deref());
        let url_status = if status == TaskStatus::Finished {
            UrlStatus::Finished
        } else {
            UrlStatus::Failed
        };
        state.set_url_status(task_id, UrlStatus::Pending, url_status);
        Ok(true)
    }

    async fn reclaim_task(
        &self,
        task_id: TaskId,
        executor_id: Option<&str>,
    ) -> SchedulerResult<Option<ReclaimedTask>> {
        self.check("reclaim_task")?;
        let mut state = self.state.lock().await;
        let assigned = state
            .tasks
            .get(&task_id)
            .is_some_and(|task| task.assigned_to(executor_id));
        if !assigned {
            return Ok(None);
        }
        Ok(state.reclaim(task_id))
    }

    async fn reclaim_stale_task(
        &self,
        task_id: TaskId,
        dispatched_at: DateTime<Utc>,
    ) -> SchedulerResult<Option<ReclaimedTask>> {
        self.check("reclaim_stale_task")?;
        let mut state = self.state.lock().await;
        let stale = state.tasks.get(&task_id).is_some_and(|task| {
            task.status == TaskStatus::Scheduled && task.dispatched_at == Some(dispatched_at)
        });
        if !stale {
            return Ok(None);
        }
        Ok(state.reclaim(task_id))
    }

    async fn mark_executor_lost(
        &self,
        executor_id: &str,
        action: ExecutorLossAction,
        include_scheduled: bool,
    ) -> SchedulerResult<Vec<ReclaimedTask>> {
        self.check("mark_executor_lost")?;
        let mut state = self.state.lock().await;
        if let Some(executor) = state.executors.get_mut(executor_id) {
            executor.status = ExecutorStatus::Lost;
            executor.running_count = 0;
        }

        let affected: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|task| task.executor_id.as_deref() == Some(executor_id))
            .filter(|task| {
                task.status == TaskStatus::Running
                    || (include_scheduled && task.status == TaskStatus::Scheduled)
            })
            .map(|task| task.id)
            .collect();

        let mut result = Vec::with_capacity(affected.len());
        for task_id in affected {
            let Some(task) = state.tasks.get_mut(&task_id) else {
                continue;
            };
            task.executor_id = None;
            let status = match action {
                ExecutorLossAction::Reclaim => {
                    task.dispatched_at = None;
                    TaskStatus::Pending
                }
                ExecutorLossAction::Fail => TaskStatus::Failed,
            };
            task.status = status;
            result.push(ReclaimedTask {
                task_id,
                job_id: task.job_id.clone(),
                customer: task.customer.clone(),
                status,
            });
            if status == TaskStatus::Failed {
                state.set_url_status(task_id, UrlStatus::Pending, UrlStatus::Failed);
            }
        }
        Ok(result)
    }

    async fn mark_slave_lost(&self, slave_id: &str) -> SchedulerResult<Vec<ExecutorId>> {
        self.check("mark_slave_lost")?;
        let mut state = self.state.lock().await;
        if let Some(slave) = state.slaves.get_mut(slave_id) {
            slave.status = SlaveStatus::Lost;
        }
        let mut executors: Vec<ExecutorId> = state
            .executors
            .values()
            .filter(|executor| {
                executor.slave_id == slave_id && executor.status != ExecutorStatus::Lost
            })
            .map(|executor| executor.id.clone())
            .collect();
        executors.sort();
        Ok(executors)
    }

    async fn list_scheduled_tasks(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        self.check("list_scheduled_tasks")?;
        Ok(self
            .state
            .lock()
            .await
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Scheduled)
            .filter_map(|task| {
                task.dispatched_at.map(|dispatched_at| ScheduledTask {
                    task_id: task.id,
                    executor_id: task.executor_id.clone(),
                    dispatched_at,
                })
            })
            .collect())
    }

    async fn job_id_of_task(&self, task_id: TaskId) -> SchedulerResult<Option<JobId>> {
        self.check("job_id_of_task")?;
        Ok(self
            .state
            .lock()
            .await
            .tasks
            .get(&task_id)
            .map(|task| task.job_id.clone()))
    }

    async fn query_job_task_counts(&self, job_id: &str) -> SchedulerResult<TaskCounts> {
        self.check("query_job_task_counts")?;
        let state = self.state.lock().await;
        let mut counts = TaskCounts::default();
        for task in state.tasks.values().filter(|task| task.job_id == job_id) {
            counts.total += 1;
            match task.status {
                TaskStatus::Finished => counts.finished += 1,
                TaskStatus::Failed => counts.failed += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn finished_bytes(&self, job_id: &str) -> SchedulerResult<i64> {
        self.check("finished_bytes")?;
        Ok(self
            .state
            .lock()
            .await
            .urls
            .iter()
            .filter(|url| url.job_id == job_id && url.status == UrlStatus::Finished)
            .map(|url| url.size)
            .sum())
    }

    async fn finalize_job(
        &self,
        job_id: &str,
        status: JobStatus,
        finished_bytes: i64,
        completed_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        self.check("finalize_job")?;
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = status;
                job.finished_bytes = finished_bytes;
                job.completed_at = Some(completed_at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(SchedulerError::JobNotFound {
                id: job_id.to_string(),
            }),
        }
    }

    async fn job_callback(&self, job_id: &str) -> SchedulerResult<Option<CallbackTarget>> {
        self.check("job_callback")?;
        Ok(self
            .state
            .lock()
            .await
            .jobs
            .get(job_id)
            .and_then(|job| job.callback.clone()))
    }

    async fn job_summary(&self, job_id: &str) -> SchedulerResult<JobSummary> {
        self.check("job_summary")?;
        let state = self.state.lock().await;
        let mut summary = JobSummary::new(job_id.to_string());
        for url in state.urls.iter().filter(|url| url.job_id == job_id) {
            summary.record(url.origin_url.clone(), url.status);
        }
        Ok(summary)
    }

    async fn update_url_progress(&self, update: &UrlUpdate) -> SchedulerResult<bool> {
        self.check("update_url_progress")?;
        let mut state = self.state.lock().await;
        let Some(url) = state
            .urls
            .iter_mut()
            .find(|url| url.task_id == update.task_id && url.origin_url == update.origin_url)
        else {
            return Ok(false);
        };
        url.status = update.status;
        if update.target_url.is_some() {
            url.target_url = update.target_url.clone();
        }
        if let Some(size) = update.size {
            url.size = size;
        }
        Ok(true)
    }

    async fn query_customer_spans(&self, customer: &str) -> SchedulerResult<Vec<Span>> {
        self.check("query_customer_spans")?;
        Ok(self
            .state
            .lock()
            .await
            .spans
            .get(customer)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_customer_spans(&self, customer: &str, spans: &[Span]) -> SchedulerResult<()> {
        self.check("replace_customer_spans")?;
        let mut state = self.state.lock().await;
        if spans.is_empty() {
            state.spans.remove(customer);
        } else {
            state.spans.insert(customer.to_string(), spans.to_vec());
        }
        Ok(())
    }

    async fn list_customer_spans(&self) -> SchedulerResult<HashMap<CustomerId, Vec<Span>>> {
        self.check("list_customer_spans")?;
        Ok(self.state.lock().await.spans.clone())
    }

    async fn list_suspended_customers(&self) -> SchedulerResult<Vec<CustomerId>> {
        self.check("list_suspended_customers")?;
        let state = self.state.lock().await;
        let mut customers: Vec<CustomerId> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Suspended)
            .map(|job| job.customer.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        customers.sort();
        Ok(customers)
    }

    async fn query_customer_priority(&self, customer: &str) -> SchedulerResult<Option<i32>> {
        self.check("query_customer_priority")?;
        Ok(self.state.lock().await.customers.get(customer).copied())
    }

    async fn list_pending_customers(&self) -> SchedulerResult<Vec<CustomerId>> {
        self.check("list_pending_customers")?;
        let state = self.state.lock().await;
        let mut customers: Vec<CustomerId> = state
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending)
            .map(|task| task.customer.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        customers.sort();
        Ok(customers)
    }

    async fn suspend_customer_jobs(&self, customer: &str) -> SchedulerResult<u64> {
        self.check("suspend_customer_jobs")?;
        let mut state = self.state.lock().await;
        let mut jobs = HashSet::new();
        for job in state.jobs.values_mut() {
            if job.customer == customer && job.status == JobStatus::Pending {
                job.status = JobStatus::Suspended;
                jobs.insert(job.id.clone());
            }
        }
        let tasks: Vec<TaskId> = state
            .tasks
            .values_mut()
            .filter(|task| jobs.contains(&task.job_id) && task.status == TaskStatus::Pending)
            .map(|task| {
                task.status = TaskStatus::Suspended;
                task.id
            })
            .collect();
        for task_id in tasks {
            state.set_url_status(task_id, UrlStatus::Pending, UrlStatus::Suspended);
        }
        Ok(jobs.len() as u64)
    }

    async fn resume_customer_jobs(&self, customer: &str) -> SchedulerResult<u64> {
        self.check("resume_customer_jobs")?;
        let mut state = self.state.lock().await;
        let mut jobs = HashSet::new();
        for job in state.jobs.values_mut() {
            if job.customer == customer && job.status == JobStatus::Suspended {
                job.status = JobStatus::Pending;
                jobs.insert(job.id.clone());
            }
        }
        let tasks: Vec<TaskId> = state
            .tasks
            .values_mut()
            .filter(|task| jobs.contains(&task.job_id) && task.status == TaskStatus::Suspended)
            .map(|task| {
                task.status = TaskStatus::Pending;
                task.id
            })
            .collect();
        for task_id in tasks {
            state.set_url_status(task_id, UrlStatus::Suspended, UrlStatus::Pending);
        }
        Ok(jobs.len() as u64)
    }

    async fn reset_cluster_state(&self) -> SchedulerResult<RecoveryCounts> {
        self.check("reset_cluster_state")?;
        let mut state = self.state.lock().await;
        let mut counts = RecoveryCounts::default();
        for executor in state.executors.values_mut() {
            if executor.status != ExecutorStatus::Lost {
                executor.status = ExecutorStatus::Lost;
                executor.running_count = 0;
                counts.executors_lost += 1;
            }
        }
        for task in state.tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
                task.executor_id = None;
                task.dispatched_at = None;
                counts.tasks_reset += 1;
            }
        }
        Ok(counts)
    }
}

/// Progress store backed by a map; urls listed in `failing` return an error
#[derive(Debug, Clone, Default)]
pub struct MockProgressStore {
    progress: Arc<StdMutex<HashMap<String, UrlProgress>>>,
    failing: Arc<StdMutex<HashSet<String>>>,
}

impl MockProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, url: &str, speed: i64, percentage: i32) {
        self.progress.lock().expect("progress map poisoned").insert(
            url.to_string(),
            UrlProgress {
                size: 0,
                speed,
                percentage,
            },
        );
    }

    pub fn remove(&self, url: &str) {
        self.progress
            .lock()
            .expect("progress map poisoned")
            .remove(url);
    }

    pub fn fail_on(&self, url: &str) {
        self.failing
            .lock()
            .expect("failure set poisoned")
            .insert(url.to_string());
    }
}

#[async_trait]
impl ProgressStore for MockProgressStore {
    async fn get_url_progress(&self, url: &str) -> SchedulerResult<Option<UrlProgress>> {
        if self
            .failing
            .lock()
            .expect("failure set poisoned")
            .contains(url)
        {
            return Err(SchedulerError::ProgressStore(format!(
                "injected failure: {url}"
            )));
        }
        Ok(self
            .progress
            .lock()
            .expect("progress map poisoned")
            .get(url)
            .copied())
    }
}

/// Records every delivery attempt
#[derive(Debug, Clone)]
pub struct MockNotifier {
    deliveries: Arc<StdMutex<Vec<(CallbackTarget, JobSummary)>>>,
    succeed: bool,
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            deliveries: Arc::new(StdMutex::new(Vec::new())),
            succeed: true,
        }
    }

    pub fn failing() -> Self {
        Self {
            succeed: false,
            ..Self::new()
        }
    }

    pub fn deliveries(&self) -> Vec<(CallbackTarget, JobSummary)> {
        self.deliveries
            .lock()
            .expect("delivery log poisoned")
            .clone()
    }
}

#[async_trait]
impl CompletionNotifier for MockNotifier {
    async fn deliver(&self, target: &CallbackTarget, summary: &JobSummary) -> bool {
        self.deliveries
            .lock()
            .expect("delivery log poisoned")
            .push((target.clone(), summary.clone()));
        self.succeed
    }
}
