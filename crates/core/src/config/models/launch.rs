use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// executor启动模板以及目标存储地址
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub executor_uri: String,
    pub executor_command: String,
    pub executor_args: Vec<String>,
    /// 目标类型 -> 对象存储地址；为空时不做解析
    pub destinations: HashMap<String, String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            executor_uri: "http://localhost/transfer-executor".to_string(),
            executor_command: "./transfer-executor".to_string(),
            executor_args: Vec::new(),
            destinations: HashMap::new(),
        }
    }
}

impl LaunchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.executor_command.is_empty() {
            return Err(anyhow::anyhow!("executor启动命令不能为空"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub timeout_seconds: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { timeout_seconds: 10 }
    }
}
