//! 传输调度引擎
//!
//! 公平调度选择、吞吐量调节、资源offer分配、任务生命周期状态机，
//! 以及超时回收、禁用时段对账和作业完成聚合。

pub mod admission;
pub mod allocator;
pub mod blackout;
pub mod completion;
pub mod fair_share;
pub mod intake;
pub mod lifecycle;
pub mod reaper;
pub mod recovery;
pub mod service;
pub mod throughput;

pub use admission::AdmissionController;
pub use allocator::OfferAllocator;
pub use blackout::{current_hour, duration_until_next_hour, BlackoutReport, BlackoutScheduler};
pub use completion::CompletionAggregator;
pub use fair_share::{FairShareSelector, SchedUserInfo};
pub use intake::{JobIntake, JobSubmission};
pub use lifecycle::{record_dispatch, LifecycleStateMachine};
pub use reaper::StaleDispatchReaper;
pub use recovery::{RecoveryReport, StartupRecovery};
pub use service::SchedulerService;
pub use throughput::{TaskIns, TaskInsStatus, ThroughputGovernor};
