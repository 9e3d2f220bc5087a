//! Polling and setup helpers shared by dispatcher and api tests

use std::time::Duration;

use tokio::time::sleep;
use transfer_core::{AppConfig, ExecutorLossAction};

pub struct TestEnv;

impl TestEnv {
    /// Poll `condition` every 20ms until it holds or `timeout` elapses
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        condition().await
    }

    /// Set up logging for tests (safe to call repeatedly)
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }
}

/// Default configuration with a single capped customer
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.dispatcher.priority_tiers = 3;
    config.dispatcher.executor_idle_threshold = 2;
    config.dispatcher.task_schedule_timeout_seconds = 60;
    config.dispatcher.executor_loss_action = ExecutorLossAction::Reclaim;
    config
        .throttle
        .speed_caps
        .insert("capped".to_string(), 100);
    config
}
