use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use transfer_core::SchedulerResult;
use transfer_domain::{DispatchTransaction, Task};

use crate::fair_share::FairShareSelector;
use crate::throughput::ThroughputGovernor;

/// 在分配事务内按公平顺序与限速拉取待分发任务
pub struct AdmissionController {
    selector: Arc<FairShareSelector>,
    governor: Arc<ThroughputGovernor>,
    /// 已配置endpoint的目标类型，为空时不过滤
    destination_kinds: Vec<String>,
}

impl AdmissionController {
    pub fn new(
        selector: Arc<FairShareSelector>,
        governor: Arc<ThroughputGovernor>,
        destinations: &HashMap<String, String>,
    ) -> Self {
        let mut destination_kinds: Vec<String> = destinations.keys().cloned().collect();
        destination_kinds.sort();
        Self {
            selector,
            governor,
            destination_kinds,
        }
    }

    /// 逐个客户拉取，直到容量用尽或没有可调度客户，每个客户每轮至多处理一次
    ///
    /// 拉不到任务的客户从名单移除；限速为0或限速计算失败的客户本轮跳过。
    /// 目标类型未配置的任务不会被拉取，也不占用容量。
    pub async fn pull(
        &self,
        tx: &mut dyn DispatchTransaction,
        capacity: usize,
        hour: u32,
    ) -> SchedulerResult<Vec<Task>> {
        let mut pulled: Vec<Task> = Vec::new();
        let mut visited = HashSet::new();

        while pulled.len() < capacity {
            let Some(customer) = self.selector.next_customer_excluding(hour, &visited).await else {
                debug!("没有可调度的客户");
                break;
            };
            visited.insert(customer.clone());

            let remaining = capacity - pulled.len();
            let limit = match self.governor.admission_limit(&customer).await {
                Ok(limit) => limit.min(remaining),
                Err(e) => {
                    warn!("计算客户 {} 的放行上限失败，本轮跳过: {}", customer, e);
                    continue;
                }
            };
            if limit == 0 {
                debug!("客户 {} 已达到速度上限，本轮跳过", customer);
                continue;
            }

            let tasks = tx
                .query_pending_tasks(&customer, &self.destination_kinds, limit)
                .await?;
            if tasks.is_empty() {
                if !self.destination_kinds.is_empty() {
                    debug!(
                        "客户 {} 没有目标类型已配置的待分发任务，可用类型: {:?}",
                        customer, self.destination_kinds
                    );
                }
                self.selector.remove(&customer).await;
                continue;
            }

            debug!("客户 {} 拉取 {} 个任务", customer, tasks.len());
            pulled.extend(tasks);
        }

        Ok(pulled)
    }
}
