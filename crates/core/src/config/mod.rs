//! 配置模块
//!
//! 配置加载顺序：默认值 -> TOML配置文件 -> 环境变量（前缀 `TRANSFER__`）

pub mod models;

pub use models::*;
