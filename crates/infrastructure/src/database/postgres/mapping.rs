//! 行到实体的转换

use sqlx::{postgres::PgRow, Row};
use transfer_core::SchedulerResult;
use transfer_domain::{Destination, Executor, Span, Task};

pub(crate) const TASK_COLUMNS: &str = "id, job_id, customer, source_urls, dest_type, dest_bucket, \
     dest_acl, access_key, secret_key, status, executor_id, dispatched_at";

pub(crate) const EXECUTOR_COLUMNS: &str = "id, slave_id, running_count, status";

pub(crate) fn row_to_task(row: &PgRow) -> SchedulerResult<Task> {
    Ok(Task {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        customer: row.try_get("customer")?,
        source_urls: row.try_get("source_urls")?,
        destination: Destination {
            kind: row.try_get("dest_type")?,
            bucket: row.try_get("dest_bucket")?,
            acl: row.try_get("dest_acl")?,
            access_key: row.try_get("access_key")?,
            secret_key: row.try_get("secret_key")?,
        },
        status: row.try_get("status")?,
        executor_id: row.try_get("executor_id")?,
        dispatched_at: row.try_get("dispatched_at")?,
    })
}

pub(crate) fn row_to_executor(row: &PgRow) -> SchedulerResult<Executor> {
    Ok(Executor {
        id: row.try_get("id")?,
        slave_id: row.try_get("slave_id")?,
        running_count: row.try_get("running_count")?,
        status: row.try_get("status")?,
    })
}

pub(crate) fn row_to_span(row: &PgRow) -> SchedulerResult<Span> {
    let start: i16 = row.try_get("start_hour")?;
    let end: i16 = row.try_get("end_hour")?;
    Ok(Span::new(start.max(0) as u32, end.max(0) as u32))
}
