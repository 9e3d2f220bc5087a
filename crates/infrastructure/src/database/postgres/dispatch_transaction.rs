use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use tracing::debug;

use transfer_core::{SchedulerError, SchedulerResult};
use transfer_domain::{
    DispatchTransaction, Executor, ExecutorStatus, JobStatus, Task, TaskId, TaskStatus,
};

use super::mapping::{row_to_executor, row_to_task, EXECUTOR_COLUMNS, TASK_COLUMNS};

/// 基于Postgres事务的分配事务
///
/// executor行与任务行都以 FOR UPDATE 加锁。并发offer拉取同一客户时后到者
/// 阻塞到前者提交或回滚，空结果因此总是表示客户确实没有可分发任务。
pub struct PostgresDispatchTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresDispatchTransaction {
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl DispatchTransaction for PostgresDispatchTransaction {
    async fn query_idle_executors(
        &mut self,
        slave_id: &str,
        idle_threshold: i32,
    ) -> SchedulerResult<Vec<Executor>> {
        let sql = format!(
            "SELECT {EXECUTOR_COLUMNS} FROM executors \
             WHERE slave_id = $1 AND status = $2 AND running_count < $3 \
             ORDER BY running_count, id FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(slave_id)
            .bind(ExecutorStatus::Scheduled)
            .bind(idle_threshold)
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter().map(row_to_executor).collect()
    }

    async fn query_pending_tasks(
        &mut self,
        customer: &str,
        destination_kinds: &[String],
        limit: usize,
    ) -> SchedulerResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE customer = $1 AND status = $2 \
               AND (cardinality($4::text[]) = 0 OR dest_type = ANY($4)) \
             ORDER BY id LIMIT $3 FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(customer)
            .bind(TaskStatus::Pending)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(destination_kinds)
            .fetch_all(&mut *self.tx)
            .await?;

        debug!("客户 {} 查询到 {} 个待分发任务", customer, rows.len());
        rows.iter().map(row_to_task).collect()
    }

    async fn upsert_executor(&mut self, executor_id: &str, slave_id: &str) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO executors (id, slave_id, running_count, status)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (id) DO UPDATE
            SET running_count = executors.running_count + 1, updated_at = NOW()
            "#,
        )
        .bind(executor_id)
        .bind(slave_id)
        .bind(ExecutorStatus::Scheduled)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_task_scheduled(
        &mut self,
        task_id: TaskId,
        executor_id: &str,
        dispatched_at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = $2, executor_id = $3, dispatched_at = $4 \
             WHERE id = $1 AND status = $5",
        )
        .bind(task_id)
        .bind(TaskStatus::Scheduled)
        .bind(executor_id)
        .bind(dispatched_at)
        .bind(TaskStatus::Pending)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id: task_id });
        }
        Ok(())
    }

    async fn mark_job_scheduled(&mut self, job_id: &str) -> SchedulerResult<()> {
        sqlx::query("UPDATE jobs SET status = $2 WHERE id = $1 AND status = $3")
            .bind(job_id)
            .bind(JobStatus::Scheduled)
            .bind(JobStatus::Pending)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SchedulerResult<()> {
        let PostgresDispatchTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> SchedulerResult<()> {
        let PostgresDispatchTransaction { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
