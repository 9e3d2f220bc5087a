use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use transfer_core::{DispatcherConfig, LaunchConfig, SchedulerResult};
use transfer_domain::{
    Capacity, DispatchTransaction, ExecutorLaunch, LaunchDirective, Offer, OfferDecision, Slave,
    Task, TaskStore, TransferPayload,
};

use crate::admission::AdmissionController;
use crate::lifecycle::record_dispatch;
use crate::throughput::ThroughputGovernor;

/// 资源offer分配器
pub struct OfferAllocator {
    store: Arc<dyn TaskStore>,
    admission: AdmissionController,
    governor: Arc<ThroughputGovernor>,
    dispatcher: DispatcherConfig,
    launch: LaunchConfig,
}

impl OfferAllocator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        admission: AdmissionController,
        governor: Arc<ThroughputGovernor>,
        dispatcher: DispatcherConfig,
        launch: LaunchConfig,
    ) -> Self {
        Self {
            store,
            admission,
            governor,
            dispatcher,
            launch,
        }
    }

    /// 将一次offer转换为启动指令；任何存储错误都会放弃本次offer
    #[instrument(skip(self, offer), fields(offer_id = %offer.offer_id, slave_id = %offer.slave_id))]
    pub async fn handle_offer_at(
        &self,
        offer: &Offer,
        hour: u32,
        now: DateTime<Utc>,
    ) -> OfferDecision {
        let started = Instant::now();
        counter!("transfer_offers_received_total").increment(1);

        let decision = self.allocate(offer, hour, now).await;

        histogram!("transfer_offer_handling_seconds").record(started.elapsed().as_secs_f64());
        match &decision {
            OfferDecision::Launch { directives } => {
                let reused = directives.iter().filter(|d| d.executor.reused).count();
                counter!("transfer_tasks_dispatched_total").increment(directives.len() as u64);
                counter!("transfer_executors_reused_total").increment(reused as u64);
                counter!("transfer_executors_spawned_total")
                    .increment((directives.len() - reused) as u64);
                info!(
                    "offer {} 分发 {} 个任务到 slave {}（复用executor {} 个）",
                    offer.offer_id,
                    directives.len(),
                    offer.slave_id,
                    reused
                );
            }
            OfferDecision::Decline { reason } => {
                counter!("transfer_offers_declined_total").increment(1);
                debug!("拒绝offer {}: {}", offer.offer_id, reason);
            }
        }
        decision
    }

    async fn allocate(&self, offer: &Offer, hour: u32, now: DateTime<Utc>) -> OfferDecision {
        let slave = Slave::active(offer.slave_id.clone(), offer.hostname.clone());
        if let Err(e) = self.store.upsert_slave(&slave).await {
            warn!("更新slave {} 失败: {}", offer.slave_id, e);
            return OfferDecision::decline(format!("slave upsert failed: {e}"));
        }

        let capacity = Capacity::calculate(
            &offer.totals(),
            self.dispatcher.cpu_per_executor,
            self.dispatcher.memory_per_task,
            self.dispatcher.disk_per_task,
        );
        if capacity.is_empty() {
            return OfferDecision::decline("insufficient memory or disk");
        }

        let mut tx = match self.store.begin_dispatch().await {
            Ok(tx) => tx,
            Err(e) => {
                warn!("开启分配事务失败: {}", e);
                return OfferDecision::decline(format!("transaction unavailable: {e}"));
            }
        };

        let dispatched = self.dispatch(tx.as_mut(), offer, capacity, now, hour).await;
        match dispatched {
            Ok(directives) if !directives.is_empty() => match tx.commit().await {
                Ok(()) => {
                    for directive in &directives {
                        self.governor
                            .record_queued(
                                &directive.payload.customer,
                                directive.task_id,
                                directive.payload.source_urls.clone(),
                            )
                            .await;
                    }
                    OfferDecision::Launch { directives }
                }
                Err(e) => {
                    warn!("提交分配事务失败: {}", e);
                    OfferDecision::decline(format!("commit failed: {e}"))
                }
            },
            Ok(_) => {
                rollback(tx).await;
                OfferDecision::decline("no admissible pending tasks")
            }
            Err(e) => {
                warn!("分配offer {} 失败: {}", offer.offer_id, e);
                rollback(tx).await;
                OfferDecision::decline(format!("allocation failed: {e}"))
            }
        }
    }

    /// 容量读取与分发记录处于同一事务
    async fn dispatch(
        &self,
        tx: &mut dyn DispatchTransaction,
        offer: &Offer,
        capacity: Capacity,
        now: DateTime<Utc>,
        hour: u32,
    ) -> SchedulerResult<Vec<LaunchDirective>> {
        let idle = tx
            .query_idle_executors(&offer.slave_id, self.dispatcher.executor_idle_threshold)
            .await?;
        let slave_capacity = capacity.slave_capacity(idle.len());
        debug!(
            "slave {} 容量: 新executor {} 空闲executor {} 任务 {} => {}",
            offer.slave_id,
            capacity.executors,
            idle.len(),
            capacity.tasks,
            slave_capacity
        );
        if slave_capacity == 0 {
            return Ok(Vec::new());
        }

        let tasks = self.admission.pull(tx, slave_capacity, hour).await?;

        let mut idle_ids = idle.into_iter().map(|executor| executor.id);
        let mut directives = Vec::with_capacity(tasks.len());
        for task in tasks {
            let endpoint = self.launch.destinations.get(&task.destination.kind).cloned();
            let executor = match idle_ids.next() {
                Some(executor_id) => self.executor_launch(executor_id, true),
                None => self.executor_launch(Uuid::new_v4().to_string(), false),
            };
            directives.push(self.directive(&offer.slave_id, task, executor, endpoint));
        }

        if !directives.is_empty() {
            record_dispatch(tx, &directives, now).await?;
        }
        Ok(directives)
    }

    fn executor_launch(&self, executor_id: String, reused: bool) -> ExecutorLaunch {
        ExecutorLaunch {
            executor_id,
            reused,
            uri: self.launch.executor_uri.clone(),
            command: self.launch.executor_command.clone(),
            args: self.launch.executor_args.clone(),
            cpus: self.dispatcher.cpu_per_executor,
        }
    }

    fn directive(
        &self,
        slave_id: &str,
        task: Task,
        executor: ExecutorLaunch,
        destination_endpoint: Option<String>,
    ) -> LaunchDirective {
        LaunchDirective {
            task_id: task.id,
            name: format!("Transfer-{}", task.id),
            slave_id: slave_id.to_string(),
            executor,
            mem: self.dispatcher.memory_per_task,
            disk: self.dispatcher.disk_per_task,
            payload: TransferPayload {
                id: task.id,
                job_id: task.job_id,
                customer: task.customer,
                source_urls: task.source_urls,
                destination_type: task.destination.kind,
                destination_bucket: task.destination.bucket,
                destination_acl: task.destination.acl,
                access_key: task.destination.access_key,
                secret_key: task.destination.secret_key,
                destination_endpoint,
            },
        }
    }
}

async fn rollback(tx: Box<dyn DispatchTransaction>) {
    if let Err(e) = tx.rollback().await {
        warn!("回滚分配事务失败: {}", e);
    }
}
