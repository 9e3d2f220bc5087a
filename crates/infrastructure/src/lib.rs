pub mod database;
pub mod notifier;
pub mod observability;
pub mod progress;

pub use database::*;
pub use notifier::HttpCompletionNotifier;
pub use observability::init_metrics;
pub use progress::RedisProgressStore;
