use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 按客户限速配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// 客户 -> 总速度上限（字节/秒）
    pub speed_caps: HashMap<String, u64>,
    /// 进度低于该百分比的URL才计入观测速度
    pub completion_threshold_percent: i32,
    /// 无法估算时返回的准入上限
    pub unlimited_admission: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            speed_caps: HashMap::new(),
            completion_threshold_percent: 50,
            unlimited_admission: 1000,
        }
    }
}

impl ThrottleConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=100).contains(&self.completion_threshold_percent) {
            return Err(anyhow::anyhow!(
                "完成阈值必须在1到100之间: {}",
                self.completion_threshold_percent
            ));
        }

        if self.unlimited_admission == 0 {
            return Err(anyhow::anyhow!("准入上限哨兵值必须大于0"));
        }

        if let Some((customer, _)) = self.speed_caps.iter().find(|(_, cap)| **cap == 0) {
            return Err(anyhow::anyhow!("客户 {customer} 的速度上限必须大于0"));
        }

        Ok(())
    }
}
