//! worker写入Redis的URL传输进度

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, warn};

use transfer_core::{RedisConfig, SchedulerError, SchedulerResult};
use transfer_domain::{ProgressStore, UrlProgress};

/// 以 `key_prefix + url` 为键读取JSON格式的进度
#[derive(Clone)]
pub struct RedisProgressStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisProgressStore {
    pub async fn connect(config: &RedisConfig) -> SchedulerResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| SchedulerError::ProgressStore(format!("创建Redis客户端失败: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SchedulerError::ProgressStore(format!("连接Redis失败: {e}")))?;

        debug!("已连接Redis进度存储 {}", config.url);
        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, url: &str) -> String {
        format!("{}{}", self.key_prefix, url)
    }
}

/// 无法解析的进度按未知处理
fn parse_progress(url: &str, raw: &str) -> Option<UrlProgress> {
    match serde_json::from_str(raw) {
        Ok(progress) => Some(progress),
        Err(e) => {
            warn!("URL {} 的进度数据无法解析，按未知处理: {}", url, e);
            None
        }
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn get_url_progress(&self, url: &str) -> SchedulerResult<Option<UrlProgress>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.key(url))
            .await
            .map_err(|e| SchedulerError::ProgressStore(format!("读取URL {url} 的进度失败: {e}")))?;

        Ok(raw.and_then(|raw| parse_progress(url, &raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        let progress = parse_progress(
            "http://origin/a",
            r#"{"Size": 2048, "Speed": 512, "Percentage": 30}"#,
        )
        .unwrap();
        assert_eq!(progress.speed, 512);
        assert_eq!(progress.percentage, 30);

        assert_eq!(parse_progress("http://origin/a", "not json"), None);
    }
}
