//! 作业完成回调

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use transfer_core::{CallbackConfig, SchedulerError, SchedulerResult};
use transfer_domain::{CallbackTarget, CompletionNotifier, JobSummary};

/// 以HTTP PUT发送JSON汇总，只尝试一次
pub struct HttpCompletionNotifier {
    client: Client,
}

impl HttpCompletionNotifier {
    pub fn new(config: &CallbackConfig) -> SchedulerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SchedulerError::Notification(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CompletionNotifier for HttpCompletionNotifier {
    async fn deliver(&self, target: &CallbackTarget, summary: &JobSummary) -> bool {
        let endpoint = target.endpoint();

        match self.client.put(&endpoint).json(summary).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("作业 {} 回调响应 {}", summary.job_id, response.status());
                true
            }
            Ok(response) => {
                warn!(
                    "作业 {} 回调 {} 返回状态码 {}",
                    summary.job_id,
                    endpoint,
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("作业 {} 回调 {} 发送失败: {}", summary.job_id, endpoint, e);
                false
            }
        }
    }
}
