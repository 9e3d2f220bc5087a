pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod launch;
pub mod throttle;

// Re-export main types for easier imports
pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::{DatabaseConfig, RedisConfig};
pub use dispatcher::{DispatcherConfig, ExecutorLossAction};
pub use launch::{CallbackConfig, LaunchConfig};
pub use throttle::ThrottleConfig;
