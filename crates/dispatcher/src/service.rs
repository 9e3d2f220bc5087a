use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use transfer_core::{AppConfig, SchedulerResult};
use transfer_domain::{
    CompletionNotifier, JobId, Offer, OfferDecision, ProgressStore, Span, StatusEvent, TaskStore,
    UrlUpdate,
};

use crate::admission::AdmissionController;
use crate::allocator::OfferAllocator;
use crate::blackout::{current_hour, BlackoutScheduler};
use crate::completion::CompletionAggregator;
use crate::fair_share::FairShareSelector;
use crate::intake::{JobIntake, JobSubmission};
use crate::lifecycle::LifecycleStateMachine;
use crate::reaper::StaleDispatchReaper;
use crate::recovery::{RecoveryReport, StartupRecovery};
use crate::throughput::ThroughputGovernor;

/// 调度引擎门面，持有各组件的进程级实例
pub struct SchedulerService {
    selector: Arc<FairShareSelector>,
    governor: Arc<ThroughputGovernor>,
    allocator: OfferAllocator,
    lifecycle: LifecycleStateMachine,
    intake: JobIntake,
    recovery: StartupRecovery,
    reaper: Arc<StaleDispatchReaper>,
    blackout: Arc<BlackoutScheduler>,
}

impl SchedulerService {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn TaskStore>,
        progress: Arc<dyn ProgressStore>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        let selector = Arc::new(FairShareSelector::new(config.dispatcher.priority_tiers));
        let governor = Arc::new(ThroughputGovernor::new(progress, &config.throttle));
        let completion = Arc::new(CompletionAggregator::new(store.clone(), notifier));
        let blackout = Arc::new(BlackoutScheduler::new(store.clone(), selector.clone()));

        let allocator = OfferAllocator::new(
            store.clone(),
            AdmissionController::new(
                selector.clone(),
                governor.clone(),
                &config.launch.destinations,
            ),
            governor.clone(),
            config.dispatcher.clone(),
            config.launch.clone(),
        );
        let lifecycle = LifecycleStateMachine::new(
            store.clone(),
            selector.clone(),
            governor.clone(),
            completion,
            &config.dispatcher,
        );
        let intake = JobIntake::new(store.clone(), selector.clone(), config.dispatcher.files_per_task);
        let recovery = StartupRecovery::new(store.clone(), selector.clone(), blackout.clone());
        let reaper = Arc::new(StaleDispatchReaper::new(
            store,
            selector.clone(),
            governor.clone(),
            Duration::from_secs(config.dispatcher.task_schedule_timeout_seconds),
        ));

        Self {
            selector,
            governor,
            allocator,
            lifecycle,
            intake,
            recovery,
            reaper,
            blackout,
        }
    }

    pub async fn handle_offer(&self, offer: &Offer) -> OfferDecision {
        self.allocator
            .handle_offer_at(offer, current_hour(), Utc::now())
            .await
    }

    pub async fn handle_status_event(&self, event: &StatusEvent) -> SchedulerResult<()> {
        self.lifecycle.handle_status_event(event).await
    }

    pub async fn handle_framework_message(&self, update: &UrlUpdate) -> SchedulerResult<()> {
        self.lifecycle.handle_url_update(update).await
    }

    pub async fn slave_lost(&self, slave_id: &str) -> SchedulerResult<usize> {
        self.lifecycle.handle_slave_lost(slave_id).await
    }

    pub async fn executor_lost(&self, executor_id: &str) -> SchedulerResult<usize> {
        self.lifecycle.handle_executor_lost(executor_id).await
    }

    pub async fn update_customer_spans(&self, customer: &str, spans: Vec<Span>) -> SchedulerResult<()> {
        self.blackout.update_customer_spans(customer, spans).await
    }

    pub async fn submit_job(&self, submission: JobSubmission) -> SchedulerResult<JobId> {
        self.intake.submit(submission).await
    }

    pub async fn recover(&self) -> SchedulerResult<RecoveryReport> {
        self.recovery.run_at(current_hour()).await
    }

    pub fn selector(&self) -> Arc<FairShareSelector> {
        self.selector.clone()
    }

    pub fn governor(&self) -> Arc<ThroughputGovernor> {
        self.governor.clone()
    }

    pub fn reaper(&self) -> Arc<StaleDispatchReaper> {
        self.reaper.clone()
    }

    pub fn blackout(&self) -> Arc<BlackoutScheduler> {
        self.blackout.clone()
    }

    pub fn allocator(&self) -> &OfferAllocator {
        &self.allocator
    }

    pub fn lifecycle(&self) -> &LifecycleStateMachine {
        &self.lifecycle
    }
}
