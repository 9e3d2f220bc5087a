use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use transfer_core::SchedulerResult;
use transfer_domain::{CustomerId, Span, TaskStore};

/// 调度名单中的客户条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedUserInfo {
    pub customer: CustomerId,
    pub spans: Vec<Span>,
    pub tier: usize,
}

#[derive(Debug, Default)]
struct Roster {
    tiers: Vec<Vec<SchedUserInfo>>,
    last_selected: Option<CustomerId>,
}

impl Roster {
    fn position(&self, customer: &str) -> Option<(usize, usize)> {
        self.tiers.iter().enumerate().find_map(|(tier, ring)| {
            ring.iter()
                .position(|entry| entry.customer == customer)
                .map(|idx| (tier, idx))
        })
    }

    fn remove(&mut self, customer: &str) -> bool {
        match self.position(customer) {
            Some((tier, idx)) => {
                self.tiers[tier].remove(idx);
                true
            }
            None => false,
        }
    }
}

/// 公平调度选择器
///
/// 各优先级层从0开始依次扫描，第一个存在未处于禁用时段客户的层胜出；
/// 层内按环形顺序从上次选中客户的下一位继续轮询。
pub struct FairShareSelector {
    roster: Mutex<Roster>,
    tier_count: usize,
}

impl FairShareSelector {
    pub fn new(tier_count: usize) -> Self {
        let tier_count = tier_count.max(1);
        Self {
            roster: Mutex::new(Roster {
                tiers: vec![Vec::new(); tier_count],
                last_selected: None,
            }),
            tier_count,
        }
    }

    pub fn tier_count(&self) -> usize {
        self.tier_count
    }

    /// 在给定小时选出下一个可调度客户
    pub async fn next_customer_at(&self, hour: u32) -> Option<CustomerId> {
        self.next_customer_excluding(hour, &HashSet::new()).await
    }

    /// 同上，但跳过本轮分配中已经处理过的客户
    pub async fn next_customer_excluding(
        &self,
        hour: u32,
        exclude: &HashSet<CustomerId>,
    ) -> Option<CustomerId> {
        let mut roster = self.roster.lock().await;

        for tier in 0..roster.tiers.len() {
            let ring = &roster.tiers[tier];
            if ring.is_empty() {
                continue;
            }

            let start = roster
                .last_selected
                .as_deref()
                .and_then(|last| ring.iter().position(|entry| entry.customer == last))
                .map(|idx| idx + 1)
                .unwrap_or(0);

            let selected = (0..ring.len())
                .map(|offset| &ring[(start + offset) % ring.len()])
                .find(|entry| {
                    !exclude.contains(&entry.customer) && !Span::any_contains(&entry.spans, hour)
                })
                .map(|entry| entry.customer.clone());

            if let Some(customer) = selected {
                debug!("选中客户 {} (优先级层 {})", customer, tier);
                roster.last_selected = Some(customer.clone());
                return Some(customer);
            }
        }

        None
    }

    /// 加入名单；已存在则先移除，新条目总是排在所在层的末尾
    pub async fn add(&self, customer: &str, tier: usize, spans: Vec<Span>) {
        let tier = if tier >= self.tier_count {
            warn!(
                "客户 {} 的优先级 {} 超出范围，按最低优先级 {} 处理",
                customer,
                tier,
                self.tier_count - 1
            );
            self.tier_count - 1
        } else {
            tier
        };

        let mut roster = self.roster.lock().await;
        roster.remove(customer);
        roster.tiers[tier].push(SchedUserInfo {
            customer: customer.to_string(),
            spans,
            tier,
        });
    }

    pub async fn remove(&self, customer: &str) -> bool {
        let removed = self.roster.lock().await.remove(customer);
        if removed {
            debug!("客户 {} 已从调度名单移除", customer);
        }
        removed
    }

    pub async fn exists(&self, customer: &str) -> bool {
        self.roster.lock().await.position(customer).is_some()
    }

    /// 原地替换客户的时间段，保持其在环中的位置
    pub async fn update_spans(&self, customer: &str, spans: Vec<Span>) -> bool {
        let mut roster = self.roster.lock().await;
        match roster.position(customer) {
            Some((tier, idx)) => {
                roster.tiers[tier][idx].spans = spans;
                true
            }
            None => false,
        }
    }

    pub async fn entry(&self, customer: &str) -> Option<SchedUserInfo> {
        let roster = self.roster.lock().await;
        roster
            .position(customer)
            .map(|(tier, idx)| roster.tiers[tier][idx].clone())
    }

    pub async fn len(&self) -> usize {
        self.roster.lock().await.tiers.iter().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 客户不在名单中时从存储读取优先级与时间段后加入
    ///
    /// 未知客户记录日志后跳过，返回false。
    pub async fn ensure_registered(
        &self,
        store: &Arc<dyn TaskStore>,
        customer: &str,
    ) -> SchedulerResult<bool> {
        if self.exists(customer).await {
            return Ok(false);
        }

        let Some(priority) = store.query_customer_priority(customer).await? else {
            warn!("未知客户 {}，跳过加入调度名单", customer);
            return Ok(false);
        };
        let spans = store.query_customer_spans(customer).await?;

        self.add(customer, priority.max(0) as usize, spans).await;
        info!("客户 {} 加入调度名单，优先级 {}", customer, priority);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transfer_testing_utils::MockTaskStore;

    async fn selector_with(customers: &[(&str, usize)]) -> FairShareSelector {
        let selector = FairShareSelector::new(3);
        for (customer, tier) in customers {
            selector.add(customer, *tier, Vec::new()).await;
        }
        selector
    }

    #[tokio::test]
    async fn test_round_robin_within_tier() {
        let selector = selector_with(&[("a", 1), ("b", 1), ("c", 1)]).await;

        let picks = vec![
            selector.next_customer_at(10).await.unwrap(),
            selector.next_customer_at(10).await.unwrap(),
            selector.next_customer_at(10).await.unwrap(),
            selector.next_customer_at(10).await.unwrap(),
        ];
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_higher_tier_wins() {
        let selector = selector_with(&[("low", 2), ("high", 0)]).await;
        assert_eq!(selector.next_customer_at(0).await.as_deref(), Some("high"));
        assert_eq!(selector.next_customer_at(0).await.as_deref(), Some("high"));

        selector.remove("high").await;
        assert_eq!(selector.next_customer_at(0).await.as_deref(), Some("low"));
    }

    #[tokio::test]
    async fn test_blacked_out_customer_never_selected() {
        let selector = FairShareSelector::new(3);
        selector.add("night", 0, vec![Span::new(0, 6)]).await;

        assert_eq!(selector.next_customer_at(3).await, None);
        assert_eq!(selector.next_customer_at(6).await.as_deref(), Some("night"));

        selector.add("fallback", 2, Vec::new()).await;
        assert_eq!(selector.next_customer_at(3).await.as_deref(), Some("fallback"));
    }

    #[tokio::test]
    async fn test_blackout_skips_within_ring() {
        let selector = FairShareSelector::new(1);
        selector.add("a", 0, Vec::new()).await;
        selector.add("b", 0, vec![Span::new(8, 12)]).await;
        selector.add("c", 0, Vec::new()).await;

        assert_eq!(selector.next_customer_at(9).await.as_deref(), Some("a"));
        assert_eq!(selector.next_customer_at(9).await.as_deref(), Some("c"));
        assert_eq!(selector.next_customer_at(9).await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_add_is_idempotent_and_moves_to_tail() {
        let selector = selector_with(&[("a", 0), ("b", 0)]).await;
        selector.add("a", 0, Vec::new()).await;
        assert_eq!(selector.len().await, 2);
        assert_eq!(selector.next_customer_at(0).await.as_deref(), Some("b"));
        assert_eq!(selector.next_customer_at(0).await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_removed_last_selected_restarts_ring() {
        let selector = selector_with(&[("a", 0), ("b", 0), ("c", 0)]).await;
        assert_eq!(selector.next_customer_at(0).await.as_deref(), Some("a"));
        selector.remove("a").await;
        assert_eq!(selector.next_customer_at(0).await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_excluded_customers_fall_through_to_lower_tier() {
        let selector = selector_with(&[("a", 0), ("b", 0), ("c", 2)]).await;
        let mut exclude = HashSet::new();
        exclude.insert("a".to_string());
        assert_eq!(
            selector.next_customer_excluding(0, &exclude).await.as_deref(),
            Some("b")
        );
        exclude.insert("b".to_string());
        assert_eq!(
            selector.next_customer_excluding(0, &exclude).await.as_deref(),
            Some("c")
        );
        exclude.insert("c".to_string());
        assert_eq!(selector.next_customer_excluding(0, &exclude).await, None);
    }

    #[tokio::test]
    async fn test_out_of_range_tier_is_clamped() {
        let selector = FairShareSelector::new(2);
        selector.add("x", 9, Vec::new()).await;
        assert_eq!(selector.entry("x").await.unwrap().tier, 1);
    }

    #[tokio::test]
    async fn test_ensure_registered_reads_store() {
        let store = MockTaskStore::new();
        store.add_customer("known", 1).await;
        store.set_spans("known", vec![Span::new(1, 2)]).await;
        let store: Arc<dyn TaskStore> = Arc::new(store);

        let selector = FairShareSelector::new(3);
        assert!(selector.ensure_registered(&store, "known").await.unwrap());
        assert!(!selector.ensure_registered(&store, "known").await.unwrap());
        assert!(!selector.ensure_registered(&store, "stranger").await.unwrap());

        let entry = selector.entry("known").await.unwrap();
        assert_eq!(entry.tier, 1);
        assert_eq!(entry.spans, vec![Span::new(1, 2)]);
        assert!(!selector.exists("stranger").await);
    }
}
