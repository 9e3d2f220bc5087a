use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tracing::{error, info};

use transfer_api::create_app;
use transfer_core::AppConfig;
use transfer_dispatcher::SchedulerService;
use transfer_infrastructure::{
    init_metrics, DatabaseManager, HttpCompletionNotifier, RedisProgressStore,
};

/// 主应用程序
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    service: Arc<SchedulerService>,
}

impl Application {
    /// 连接外部依赖并装配调度引擎
    pub async fn new(config: AppConfig) -> Result<Self> {
        init_metrics(&config.observability).context("初始化指标导出失败")?;

        info!("连接数据库: {}", mask_database_url(&config.database.url));
        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("运行数据库迁移失败")?;
        info!("数据库连接成功");

        let progress = RedisProgressStore::connect(&config.redis)
            .await
            .context("连接Redis失败")?;
        let notifier =
            HttpCompletionNotifier::new(&config.callback).context("创建完成回调客户端失败")?;

        let service = Arc::new(SchedulerService::new(
            &config,
            Arc::new(database.task_store()),
            Arc::new(progress),
            Arc::new(notifier),
        ));

        Ok(Self {
            config,
            database,
            service,
        })
    }

    /// 先做启动恢复，再运行后台循环与HTTP服务直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let report = self.service.recover().await.context("启动恢复失败")?;
        info!(
            "启动恢复完成: {} 个executor标记丢失，{} 个任务退回Pending，{} 个客户加入调度名单",
            report.reset.executors_lost, report.reset.tasks_reset, report.customers_registered
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        handles.push({
            let reaper = self.service.reaper();
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { reaper.run(shutdown_rx).await })
        });

        handles.push({
            let blackout = self.service.blackout();
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { blackout.run(shutdown_rx).await })
        });

        if self.config.api.enabled {
            handles.push(self.spawn_api(shutdown_rx.resubscribe()).await?);
        }

        let _ = shutdown_rx.recv().await;
        info!("调度服务收到关闭信号");

        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务异常退出: {}", e);
            }
        }

        info!("所有组件已停止");
        Ok(())
    }

    async fn spawn_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let app = create_app(Arc::clone(&self.service), &self.config.api);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        Ok(tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("API服务器运行失败: {}", e);
            }
        }))
    }

    pub async fn close(&self) {
        self.database.close().await;
        info!("数据库连接池已关闭");
    }
}

/// 屏蔽数据库URL中的密码
fn mask_database_url(url: &str) -> String {
    let authority_start = url.find("://").map_or(0, |pos| pos + 3);
    if let Some(at_pos) = url[authority_start..].find('@').map(|pos| pos + authority_start) {
        if let Some(colon_pos) = url[authority_start..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(authority_start + colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_database_url() {
        assert_eq!(
            mask_database_url("postgresql://transfer:secret@db:5432/transfer"),
            "postgresql://transfer:***@db:5432/transfer"
        );
        assert_eq!(
            mask_database_url("postgresql://localhost/transfer"),
            "postgresql://localhost/transfer"
        );
        assert_eq!(
            mask_database_url("postgresql://transfer@db:5432/transfer"),
            "postgresql://transfer@db:5432/transfer"
        );
    }
}
