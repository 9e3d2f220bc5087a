//! Test data builders with defaults that pass validation

use chrono::{DateTime, Utc};
use transfer_domain::{
    CallbackTarget, Destination, Executor, ExecutorStatus, Job, JobStatus, NewTask, Offer,
    Resource,
};

/// Builder for resource offers
pub struct OfferBuilder {
    offer: Offer,
}

impl OfferBuilder {
    pub fn new(slave_id: &str) -> Self {
        Self {
            offer: Offer {
                offer_id: format!("offer-{slave_id}"),
                slave_id: slave_id.to_string(),
                hostname: format!("{slave_id}.cluster.local"),
                resources: Vec::new(),
            },
        }
    }

    pub fn with_offer_id(mut self, offer_id: &str) -> Self {
        self.offer.offer_id = offer_id.to_string();
        self
    }

    pub fn cpus(self, value: f64) -> Self {
        self.resource("cpus", value)
    }

    pub fn mem(self, value: f64) -> Self {
        self.resource("mem", value)
    }

    pub fn disk(self, value: f64) -> Self {
        self.resource("disk", value)
    }

    pub fn resource(mut self, name: &str, value: f64) -> Self {
        self.offer.resources.push(Resource {
            name: name.to_string(),
            scalar: value,
        });
        self
    }

    /// cpus/mem/disk sized for exactly `executors` executors and `tasks` tasks
    /// under the default dispatcher configuration
    pub fn sized_for(self, executors: usize, tasks: usize) -> Self {
        self.cpus(executors as f64)
            .mem(256.0 * tasks as f64)
            .disk(1024.0 * tasks as f64)
    }

    pub fn build(self) -> Offer {
        self.offer
    }
}

/// Builder for Job entities
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(job_id: &str, customer: &str) -> Self {
        Self {
            job: Job::new(job_id.to_string(), customer.to_string(), None),
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn with_callback(mut self, url: &str, token: Option<&str>) -> Self {
        self.job.callback = Some(CallbackTarget {
            url: url.to_string(),
            token: token.map(str::to_string),
        });
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.job.created_at = created_at;
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

pub fn test_destination() -> Destination {
    Destination {
        kind: "s3".to_string(),
        bucket: "test-bucket".to_string(),
        acl: "private".to_string(),
        access_key: "ak".to_string(),
        secret_key: "sk".to_string(),
    }
}

/// `count` tasks for one job, each carrying `urls_per_task` generated urls
pub fn new_tasks(job_id: &str, customer: &str, count: usize, urls_per_task: usize) -> Vec<NewTask> {
    (0..count)
        .map(|task_idx| NewTask {
            job_id: job_id.to_string(),
            customer: customer.to_string(),
            source_urls: (0..urls_per_task)
                .map(|url_idx| format!("http://origin.example.com/{job_id}/{task_idx}/{url_idx}"))
                .collect(),
            destination: test_destination(),
        })
        .collect()
}

/// Builder for Executor rows
pub struct ExecutorBuilder {
    executor: Executor,
}

impl ExecutorBuilder {
    pub fn new(executor_id: &str, slave_id: &str) -> Self {
        Self {
            executor: Executor {
                id: executor_id.to_string(),
                slave_id: slave_id.to_string(),
                running_count: 0,
                status: ExecutorStatus::Scheduled,
            },
        }
    }

    pub fn running(mut self, running_count: i32) -> Self {
        self.executor.running_count = running_count;
        self
    }

    pub fn lost(mut self) -> Self {
        self.executor.status = ExecutorStatus::Lost;
        self
    }

    pub fn build(self) -> Executor {
        self.executor
    }
}
