use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info, instrument};

use transfer_core::{ExecutorLossAction, SchedulerError, SchedulerResult};
use transfer_domain::{
    CallbackTarget, CustomerId, DispatchTransaction, ExecutorId, ExecutorStatus, Job, JobId,
    JobStatus, JobSummary, NewTask, ReclaimedTask, RecoveryCounts, ScheduledTask, Slave,
    SlaveStatus, Span, TaskCounts, TaskId, TaskStatus, TaskStore, UrlStatus, UrlUpdate,
};

use super::dispatch_transaction::PostgresDispatchTransaction;
use super::mapping::row_to_span;

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 释放任务占用的executor槽位
    async fn release_executor(
        conn: &mut PgConnection,
        executor_id: Option<&str>,
    ) -> SchedulerResult<()> {
        if let Some(executor_id) = executor_id {
            sqlx::query(
                "UPDATE executors SET running_count = GREATEST(running_count - 1, 0), \
                 updated_at = NOW() WHERE id = $1",
            )
            .bind(executor_id)
            .execute(conn)
            .await?;
        }
        Ok(())
    }

    /// 锁定任务行并退回Pending；`stale_at` 给定时要求任务仍为Scheduled且分发时间一致
    async fn reclaim(
        &self,
        task_id: TaskId,
        expected_executor: Option<&str>,
        stale_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Option<ReclaimedTask>> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query(
            "SELECT job_id, customer, executor_id, status, dispatched_at \
             FROM tasks WHERE id = $1 FOR UPDATE",
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let status: TaskStatus = row.try_get("status")?;
        let dispatched_at: Option<DateTime<Utc>> = row.try_get("dispatched_at")?;
        let executor_id: Option<String> = row.try_get("executor_id")?;
        let eligible = match stale_at {
            Some(expected) => status == TaskStatus::Scheduled && dispatched_at == Some(expected),
            None => status.holds_executor(),
        };
        let assigned = expected_executor.map_or(true, |expected| {
            executor_id.as_deref() == Some(expected)
        });
        if !eligible || !assigned {
            return Ok(None);
        }

        sqlx::query(
            "UPDATE tasks SET status = $2, executor_id = NULL, dispatched_at = NULL WHERE id = $1",
        )
        .bind(task_id)
        .bind(TaskStatus::Pending)
        .execute(&mut *tx)
        .await?;

        Self::release_executor(&mut *tx, executor_id.as_deref()).await?;
        tx.commit().await?;

        Ok(Some(ReclaimedTask {
            task_id,
            job_id: row.try_get("job_id")?,
            customer: row.try_get("customer")?,
            status: TaskStatus::Pending,
        }))
    }

    async fn distinct_customers(&self, sql: &str, status: &str) -> SchedulerResult<Vec<CustomerId>> {
        let customers = sqlx::query_scalar(sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(customers)
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, customer = %job.customer))]
    async fn insert_job(&self, job: &Job) -> SchedulerResult<()> {
        let (callback_url, callback_token) = match &job.callback {
            Some(target) => (Some(target.url.as_str()), target.token.as_deref()),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO jobs (id, customer, status, callback_url, callback_token, created_at, completed_at, finished_bytes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&job.id)
        .bind(&job.customer)
        .bind(job.status)
        .bind(callback_url)
        .bind(callback_token)
        .bind(job.created_at)
        .bind(job.completed_at)
        .bind(job.finished_bytes)
        .execute(&self.pool)
        .await?;

        debug!("创建作业成功: {}", job.id);
        Ok(())
    }

    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    async fn insert_tasks(&self, tasks: &[NewTask]) -> SchedulerResult<Vec<TaskId>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(tasks.len());

        for task in tasks {
            let id: TaskId = sqlx::query_scalar(
                r#"
                INSERT INTO tasks (job_id, customer, source_urls, dest_type, dest_bucket, dest_acl, access_key, secret_key, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING id
                "#,
            )
            .bind(&task.job_id)
            .bind(&task.customer)
            .bind(&task.source_urls)
            .bind(&task.destination.kind)
            .bind(&task.destination.bucket)
            .bind(&task.destination.acl)
            .bind(&task.destination.access_key)
            .bind(&task.destination.secret_key)
            .bind(TaskStatus::Pending)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO urls (task_id, job_id, origin_url, status)
                SELECT $1, $2, origin_url, $4 FROM UNNEST($3::TEXT[]) AS origin_url
                ON CONFLICT (task_id, origin_url) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(&task.job_id)
            .bind(&task.source_urls)
            .bind(UrlStatus::Pending)
            .execute(&mut *tx)
            .await?;

            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn upsert_slave(&self, slave: &Slave) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO slaves (id, hostname, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET hostname = EXCLUDED.hostname, status = EXCLUDED.status, updated_at = NOW()
            "#,
        )
        .bind(&slave.id)
        .bind(&slave.hostname)
        .bind(slave.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn begin_dispatch(&self) -> SchedulerResult<Box<dyn DispatchTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresDispatchTransaction::new(tx)))
    }

    #[instrument(skip(self))]
    async fn mark_task_running(
        &self,
        task_id: TaskId,
        executor_id: Option<&str>,
    ) -> SchedulerResult<bool> {
        let mut tx = self.pool.begin().await?;

        let job_id: Option<JobId> = sqlx::query_scalar(
            "UPDATE tasks SET status = $2 \
             WHERE id = $1 AND status = $3 AND ($4::text IS NULL OR executor_id = $4) \
             RETURNING job_id",
        )
        .bind(task_id)
        .bind(TaskStatus::Running)
        .bind(TaskStatus::Scheduled)
        .bind(executor_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = job_id else {
            return Ok(false);
        };

        sqlx::query("UPDATE jobs SET status = $2 WHERE id = $1 AND status = $3")
            .bind(&job_id)
            .bind(JobStatus::Running)
            .bind(JobStatus::Scheduled)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn complete_task(
        &self,
        task_id: TaskId,
        executor_id: Option<&str>,
        status: TaskStatus,
    ) -> SchedulerResult<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT executor_id FROM tasks \
             WHERE id = $1 AND status IN ($2, $3) AND ($4::text IS NULL OR executor_id = $4) \
             FOR UPDATE",
        )
        .bind(task_id)
        .bind(TaskStatus::Scheduled)
        .bind(TaskStatus::Running)
        .bind(executor_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(false);
        };
        let executor_id: Option<String> = row.try_get("executor_id")?;

        sqlx::query("UPDATE tasks SET status = $2, executor_id = NULL WHERE id = $1")
            .bind(task_id)
            .bind(status)
            .execute(&mut *tx)
            .await?;

        Self::release_executor(&mut *tx, executor_id.as_deref()).await?;

        let url_status = if status == TaskStatus::Finished {
            UrlStatus::Finished
        } else {
            UrlStatus::Failed
        };
        sqlx::query("UPDATE urls SET status = $2 WHERE task_id = $1 AND status = $3")
            .bind(task_id)
            .bind(url_status)
            .bind(UrlStatus::Pending)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn reclaim_task(
        &self,
        task_id: TaskId,
        executor_id: Option<&str>,
    ) -> SchedulerResult<Option<ReclaimedTask>> {
        self.reclaim(task_id, executor_id, None).await
    }

    async fn reclaim_stale_task(
        &self,
        task_id: TaskId,
        dispatched_at: DateTime<Utc>,
    ) -> SchedulerResult<Option<ReclaimedTask>> {
        self.reclaim(task_id, None, Some(dispatched_at)).await
    }

    #[instrument(skip(self))]
    async fn mark_executor_lost(
        &self,
        executor_id: &str,
        action: ExecutorLossAction,
        include_scheduled: bool,
    ) -> SchedulerResult<Vec<ReclaimedTask>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE executors SET status = $2, running_count = 0, updated_at = NOW() WHERE id = $1",
        )
        .bind(executor_id)
        .bind(ExecutorStatus::Lost)
        .execute(&mut *tx)
        .await?;

        let rows = sqlx::query(
            "SELECT id, job_id, customer FROM tasks \
             WHERE executor_id = $1 AND (status = $2 OR ($3 AND status = $4)) \
             ORDER BY id FOR UPDATE",
        )
        .bind(executor_id)
        .bind(TaskStatus::Running)
        .bind(include_scheduled)
        .bind(TaskStatus::Scheduled)
        .fetch_all(&mut *tx)
        .await?;

        let status = match action {
            ExecutorLossAction::Reclaim => TaskStatus::Pending,
            ExecutorLossAction::Fail => TaskStatus::Failed,
        };
        let mut affected = Vec::with_capacity(rows.len());
        for row in &rows {
            affected.push(ReclaimedTask {
                task_id: row.try_get("id")?,
                job_id: row.try_get("job_id")?,
                customer: row.try_get("customer")?,
                status,
            });
        }
        let ids: Vec<TaskId> = affected.iter().map(|task| task.task_id).collect();

        match action {
            ExecutorLossAction::Reclaim => {
                sqlx::query(
                    "UPDATE tasks SET status = $2, executor_id = NULL, dispatched_at = NULL \
                     WHERE id = ANY($1)",
                )
                .bind(&ids)
                .bind(status)
                .execute(&mut *tx)
                .await?;
            }
            ExecutorLossAction::Fail => {
                sqlx::query("UPDATE tasks SET status = $2, executor_id = NULL WHERE id = ANY($1)")
                    .bind(&ids)
                    .bind(status)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("UPDATE urls SET status = $2 WHERE task_id = ANY($1) AND status = $3")
                    .bind(&ids)
                    .bind(UrlStatus::Failed)
                    .bind(UrlStatus::Pending)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(affected)
    }

    async fn mark_slave_lost(&self, slave_id: &str) -> SchedulerResult<Vec<ExecutorId>> {
        sqlx::query("UPDATE slaves SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(slave_id)
            .bind(SlaveStatus::Lost)
            .execute(&self.pool)
            .await?;

        let executors = sqlx::query_scalar(
            "SELECT id FROM executors WHERE slave_id = $1 AND status <> $2 ORDER BY id",
        )
        .bind(slave_id)
        .bind(ExecutorStatus::Lost)
        .fetch_all(&self.pool)
        .await?;
        Ok(executors)
    }

    async fn list_scheduled_tasks(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        let rows = sqlx::query(
            "SELECT id, executor_id, dispatched_at FROM tasks \
             WHERE status = $1 AND dispatched_at IS NOT NULL ORDER BY dispatched_at",
        )
        .bind(TaskStatus::Scheduled)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ScheduledTask {
                    task_id: row.try_get("id")?,
                    executor_id: row.try_get("executor_id")?,
                    dispatched_at: row.try_get("dispatched_at")?,
                })
            })
            .collect()
    }

    async fn job_id_of_task(&self, task_id: TaskId) -> SchedulerResult<Option<JobId>> {
        let job_id = sqlx::query_scalar("SELECT job_id FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job_id)
    }

    async fn query_job_task_counts(&self, job_id: &str) -> SchedulerResult<TaskCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = $2) AS finished,
                COUNT(*) FILTER (WHERE status = $3) AS failed,
                COUNT(*) AS total
            FROM tasks WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(TaskStatus::Finished)
        .bind(TaskStatus::Failed)
        .fetch_one(&self.pool)
        .await?;

        Ok(TaskCounts {
            finished: row.try_get("finished")?,
            failed: row.try_get("failed")?,
            total: row.try_get("total")?,
        })
    }

    async fn finished_bytes(&self, job_id: &str) -> SchedulerResult<i64> {
        let bytes = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size), 0)::BIGINT FROM urls WHERE job_id = $1 AND status = $2",
        )
        .bind(job_id)
        .bind(UrlStatus::Finished)
        .fetch_one(&self.pool)
        .await?;
        Ok(bytes)
    }

    #[instrument(skip(self))]
    async fn finalize_job(
        &self,
        job_id: &str,
        status: JobStatus,
        finished_bytes: i64,
        completed_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, finished_bytes = $3, completed_at = $4 \
             WHERE id = $1 AND status NOT IN ($5, $6)",
        )
        .bind(job_id)
        .bind(status)
        .bind(finished_bytes)
        .bind(completed_at)
        .bind(JobStatus::Finished)
        .bind(JobStatus::Failed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(SchedulerError::JobNotFound {
                id: job_id.to_string(),
            }),
        }
    }

    async fn job_callback(&self, job_id: &str) -> SchedulerResult<Option<CallbackTarget>> {
        let row = sqlx::query("SELECT callback_url, callback_token FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let url: Option<String> = row.try_get("callback_url")?;
        let token: Option<String> = row.try_get("callback_token")?;
        Ok(url
            .filter(|url| !url.is_empty())
            .map(|url| CallbackTarget { url, token }))
    }

    async fn job_summary(&self, job_id: &str) -> SchedulerResult<JobSummary> {
        let rows = sqlx::query("SELECT origin_url, status FROM urls WHERE job_id = $1 ORDER BY id")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        let mut summary = JobSummary::new(job_id.to_string());
        for row in &rows {
            summary.record(row.try_get("origin_url")?, row.try_get("status")?);
        }
        Ok(summary)
    }

    async fn update_url_progress(&self, update: &UrlUpdate) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE urls SET status = $3, target_url = COALESCE($4, target_url), \
             size = COALESCE($5, size) WHERE task_id = $1 AND origin_url = $2",
        )
        .bind(update.task_id)
        .bind(&update.origin_url)
        .bind(update.status)
        .bind(update.target_url.as_deref())
        .bind(update.size)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_customer_spans(&self, customer: &str) -> SchedulerResult<Vec<Span>> {
        let rows = sqlx::query(
            "SELECT start_hour, end_hour FROM customer_spans WHERE customer = $1 ORDER BY start_hour",
        )
        .bind(customer)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_span).collect()
    }

    #[instrument(skip(self, spans), fields(count = spans.len()))]
    async fn replace_customer_spans(&self, customer: &str, spans: &[Span]) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM customer_spans WHERE customer = $1")
            .bind(customer)
            .execute(&mut *tx)
            .await?;

        for span in spans {
            sqlx::query(
                "INSERT INTO customer_spans (customer, start_hour, end_hour) VALUES ($1, $2, $3)",
            )
            .bind(customer)
            .bind(span.start as i16)
            .bind(span.end as i16)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("客户 {} 的时间段已更新为 {} 段", customer, spans.len());
        Ok(())
    }

    async fn list_customer_spans(&self) -> SchedulerResult<HashMap<CustomerId, Vec<Span>>> {
        let rows = sqlx::query(
            "SELECT customer, start_hour, end_hour FROM customer_spans ORDER BY customer, start_hour",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut spans: HashMap<CustomerId, Vec<Span>> = HashMap::new();
        for row in &rows {
            let customer: CustomerId = row.try_get("customer")?;
            spans.entry(customer).or_default().push(row_to_span(row)?);
        }
        Ok(spans)
    }

    async fn list_suspended_customers(&self) -> SchedulerResult<Vec<CustomerId>> {
        self.distinct_customers(
            "SELECT DISTINCT customer FROM jobs WHERE status = $1 ORDER BY customer",
            JobStatus::Suspended.as_str(),
        )
        .await
    }

    async fn query_customer_priority(&self, customer: &str) -> SchedulerResult<Option<i32>> {
        let priority = sqlx::query_scalar("SELECT priority FROM customers WHERE name = $1")
            .bind(customer)
            .fetch_optional(&self.pool)
            .await?;
        Ok(priority)
    }

    async fn list_pending_customers(&self) -> SchedulerResult<Vec<CustomerId>> {
        self.distinct_customers(
            "SELECT DISTINCT customer FROM tasks WHERE status = $1 ORDER BY customer",
            TaskStatus::Pending.as_str(),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn suspend_customer_jobs(&self, customer: &str) -> SchedulerResult<u64> {
        transition_customer_jobs(
            &self.pool,
            customer,
            (JobStatus::Pending, JobStatus::Suspended),
            (TaskStatus::Pending, TaskStatus::Suspended),
            (UrlStatus::Pending, UrlStatus::Suspended),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn resume_customer_jobs(&self, customer: &str) -> SchedulerResult<u64> {
        transition_customer_jobs(
            &self.pool,
            customer,
            (JobStatus::Suspended, JobStatus::Pending),
            (TaskStatus::Suspended, TaskStatus::Pending),
            (UrlStatus::Suspended, UrlStatus::Pending),
        )
        .await
    }

    async fn reset_cluster_state(&self) -> SchedulerResult<RecoveryCounts> {
        let mut tx = self.pool.begin().await?;

        let executors = sqlx::query(
            "UPDATE executors SET status = $1, running_count = 0, updated_at = NOW() \
             WHERE status <> $1",
        )
        .bind(ExecutorStatus::Lost)
        .execute(&mut *tx)
        .await?;

        let tasks = sqlx::query(
            "UPDATE tasks SET status = $1, executor_id = NULL, dispatched_at = NULL \
             WHERE status = $2",
        )
        .bind(TaskStatus::Pending)
        .bind(TaskStatus::Running)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RecoveryCounts {
            executors_lost: executors.rows_affected(),
            tasks_reset: tasks.rows_affected(),
        })
    }
}

/// 客户作业在Pending与Suspended之间整体切换，连带其任务与URL
async fn transition_customer_jobs(
    pool: &PgPool,
    customer: &str,
    jobs: (JobStatus, JobStatus),
    tasks: (TaskStatus, TaskStatus),
    urls: (UrlStatus, UrlStatus),
) -> SchedulerResult<u64> {
    let mut tx = pool.begin().await?;

    let job_ids: Vec<JobId> = sqlx::query_scalar(
        "UPDATE jobs SET status = $3 WHERE customer = $1 AND status = $2 RETURNING id",
    )
    .bind(customer)
    .bind(jobs.0)
    .bind(jobs.1)
    .fetch_all(&mut *tx)
    .await?;

    if job_ids.is_empty() {
        return Ok(0);
    }

    let task_ids: Vec<TaskId> = sqlx::query_scalar(
        "UPDATE tasks SET status = $3 WHERE job_id = ANY($1) AND status = $2 RETURNING id",
    )
    .bind(&job_ids)
    .bind(tasks.0)
    .bind(tasks.1)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query("UPDATE urls SET status = $3 WHERE task_id = ANY($1) AND status = $2")
        .bind(&task_ids)
        .bind(urls.0)
        .bind(urls.1)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(job_ids.len() as u64)
}
