//! Prometheus指标导出

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use transfer_core::ObservabilityConfig;

/// 安装全局recorder并在 `metrics_bind` 上提供 /metrics
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.metrics_enabled {
        info!("指标导出已关闭");
        return Ok(());
    }

    let addr: SocketAddr = config
        .metrics_bind
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.metrics_bind))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus导出器失败")?;

    describe_metrics();
    info!("Prometheus指标导出已启动: {}", addr);
    Ok(())
}

fn describe_metrics() {
    describe_counter!("transfer_offers_received_total", "收到的资源offer数");
    describe_counter!("transfer_offers_declined_total", "拒绝的资源offer数");
    describe_histogram!("transfer_offer_handling_seconds", "单个offer的处理耗时");
    describe_counter!("transfer_tasks_dispatched_total", "下发的任务数");
    describe_counter!("transfer_executors_reused_total", "复用空闲executor的次数");
    describe_counter!("transfer_executors_spawned_total", "新建executor的次数");
    describe_counter!("transfer_status_events_total", "按状态统计的任务状态事件");
    describe_counter!("transfer_jobs_finalized_total", "按终态统计的完成作业");
    describe_counter!("transfer_reaper_reclaimed_total", "超时回收的任务数");
    describe_counter!("transfer_blackout_suspended_jobs_total", "进入禁用时段而暂停的作业数");
    describe_counter!("transfer_blackout_resumed_jobs_total", "离开禁用时段而恢复的作业数");
}
