//! 传输调度领域模型
//!
//! 实体与封闭状态枚举、集群offer/launch契约类型，以及引擎依赖的外部协作者接口。

pub mod entities;
pub mod events;
pub mod repositories;
pub mod sqlx_impls;
pub mod value_objects;

pub use entities::*;
pub use events::*;
pub use repositories::*;
pub use transfer_core::{SchedulerError, SchedulerResult};
pub use value_objects::*;
